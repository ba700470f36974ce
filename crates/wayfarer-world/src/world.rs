//! The server-lifetime world state.

use rand::SeedableRng;
use rand_pcg::Pcg64;
use wayfarer_index::entity::{
    BlockId, CharId, CharName, Entity, EntityData, EntityKey, EntityKind, MobData, NpcData,
    PlayerData, SpellData,
};
use wayfarer_index::guard::QueryHost;
use wayfarer_index::index::SpatialIndex;
use wayfarer_index::map::{MapFlags, MapName};
use wayfarer_index::query::{query_rect, Rect};
use wayfarer_index::time::Tick;
use wayfarer_index::IndexError;

use crate::collab::{Broadcast, NullBroadcast, RemovalReason, TileLoadError, TileLoader};
use crate::config::WorldConfig;
use crate::session::{SessionId, SessionTable};
use crate::timer::{Scheduler, TickScheduler, TimerEvent};
use crate::WorldError;

/// First id handed to NPCs and mobs. Player ids are account ids and stay
/// below it.
pub const START_DURABLE_ID: u32 = 110_000_000;

/// Owns the spatial index and everything that drives it.
pub struct WorldState {
    pub(crate) index: SpatialIndex,
    pub(crate) config: WorldConfig,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) broadcast: Box<dyn Broadcast>,
    pub(crate) rng: Pcg64,
    sessions: SessionTable,
    next_durable_id: u32,
    users: usize,
}

impl std::fmt::Debug for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldState")
            .field("entities", &self.index.entities().len())
            .field("maps", &self.index.maps().len())
            .field("now", &self.scheduler.now())
            .field("pending_timers", &self.scheduler.pending())
            .finish_non_exhaustive()
    }
}

impl QueryHost for WorldState {
    fn index(&self) -> &SpatialIndex {
        &self.index
    }

    fn index_mut(&mut self) -> &mut SpatialIndex {
        &mut self.index
    }
}

impl WorldState {
    /// A world with a [`TickScheduler`] starting at tick zero and no
    /// broadcast sink.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_collaborators(config, Box::new(TickScheduler::new()), Box::new(NullBroadcast))
    }

    pub fn with_collaborators(
        config: WorldConfig,
        scheduler: Box<dyn Scheduler>,
        broadcast: Box<dyn Broadcast>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            index: SpatialIndex::new(config.index_settings()),
            rng: Pcg64::seed_from_u64(config.rng_seed),
            config,
            scheduler,
            broadcast,
            sessions: SessionTable::new(),
            next_durable_id: START_DURABLE_ID,
            users: 0,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current tick of the scheduler clock.
    pub fn now(&self) -> Tick {
        self.scheduler.now()
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionTable {
        &mut self.sessions
    }

    /// Users online across all map servers, as last reported by the
    /// character server.
    pub fn users(&self) -> usize {
        self.users
    }

    pub fn set_users(&mut self, users: usize) {
        self.users = users;
    }

    fn allocate_durable_id(&mut self) -> BlockId {
        let id = BlockId(self.next_durable_id);
        self.next_durable_id += 1;
        id
    }

    // -- maps -----------------------------------------------------------------

    /// Load and register every map in `names`.
    ///
    /// All maps are loaded before any is registered; if one fails, nothing is
    /// registered and every failure is reported.
    pub fn load_maps(&mut self, loader: &mut dyn TileLoader, names: &[MapName]) -> Result<usize, WorldError> {
        let mut loaded = Vec::with_capacity(names.len());
        let mut failures: Vec<TileLoadError> = Vec::new();
        for name in names {
            match loader.load(name) {
                Ok(tiles) => loaded.push((name.clone(), tiles)),
                Err(err) => {
                    tracing::error!(map = %name, error = %err, "map failed to load");
                    failures.push(err);
                }
            }
        }
        if !failures.is_empty() {
            return Err(WorldError::MapLoad { failures });
        }

        let flags = MapFlags { pvp: self.config.pk_mode };
        let count = loaded.len();
        for (name, tiles) in loaded {
            self.index.register_local_map(name, tiles, flags)?;
        }
        tracing::info!(maps = count, pvp = flags.pvp, "maps loaded");
        Ok(count)
    }

    // -- players --------------------------------------------------------------

    /// Put an authenticated player into the world and bind it to `session`.
    ///
    /// The id, name and character-id tables are written together. Returns
    /// the new key and whoever was waiting for this character's nickname.
    pub fn add_player(
        &mut self,
        session: SessionId,
        id: BlockId,
        player: PlayerData,
        map: &MapName,
        x: i32,
        y: i32,
    ) -> Result<(EntityKey, Option<BlockId>), WorldError> {
        if self.index.lookup(id).is_some() {
            return Err(WorldError::AlreadyRegistered { id });
        }
        let local = self.index.local_map(map)?;
        if !local.grid().contains(x, y) {
            return Err(IndexError::OutOfBounds { map: map.clone(), x, y }.into());
        }

        let PlayerData { name, char_id } = player.clone();
        let data = EntityData::Player(player);
        let key = self
            .index
            .entities_mut()
            .insert(Entity::new(id, map.clone(), x, y, data));
        let waiting = match self.index.ids_mut().register_player(id, key, &name, char_id) {
            Ok(waiting) => waiting,
            Err(err) => {
                self.index.free(key);
                return Err(err.into());
            }
        };
        if let Err(err) = self.index.link(key) {
            self.index.ids_mut().deregister_player(id, &name, char_id);
            self.index.free(key);
            return Err(err.into());
        }
        self.sessions.attach(session, key);
        self.sessions.authenticate(session);

        if let Some(entity) = self.index.get(key) {
            self.broadcast.notify_spawned(entity);
        }
        tracing::debug!(id = %id, name = %name, map = %map, x, y, "player entered");
        Ok((key, waiting))
    }

    /// Remove a player from the grid and every id table, then free it.
    pub fn quit_player(&mut self, id: BlockId) -> bool {
        let Some(key) = self.index.lookup(id) else {
            return false;
        };
        let Some(entity) = self.index.get(key) else {
            return false;
        };
        let Some(PlayerData { name, char_id }) = entity.as_player().cloned() else {
            return false;
        };
        self.broadcast.notify_removed(entity, RemovalReason::Quit);

        self.index.unlink(key);
        self.index.ids_mut().deregister_player(id, &name, char_id);
        if let Some(session) = self.sessions.session_of(key) {
            self.sessions.detach(session);
        }
        self.index.free(key);
        tracing::debug!(id = %id, name = %name, "player quit");
        true
    }

    /// The online player called `name`, whether or not its session has
    /// authenticated.
    pub fn player_by_name(&self, name: &CharName) -> Option<EntityKey> {
        self.index.ids().lookup_by_name(name)
    }

    /// Find a player by scanning authenticated sessions.
    pub fn session_player_by_id(&self, id: BlockId) -> Option<EntityKey> {
        self.sessions
            .players()
            .map(|(_, key)| key)
            .find(|key| self.index.get(*key).is_some_and(|e| e.id() == id))
    }

    /// Find a player by name by scanning authenticated sessions.
    pub fn session_player_by_name(&self, name: &CharName) -> Option<EntityKey> {
        self.sessions.players().map(|(_, key)| key).find(|key| {
            self.index
                .get(*key)
                .and_then(Entity::as_player)
                .is_some_and(|p| &p.name == name)
        })
    }

    /// Cached nickname of `char_id`, or `None` after noting that
    /// `requester` is waiting for the character server's answer.
    pub fn resolve_char_nick(&mut self, requester: BlockId, char_id: CharId) -> Option<CharName> {
        if let Some(name) = self.index.ids().lookup_by_char_id(char_id) {
            return Some(name.clone());
        }
        if self.index.ids_mut().request_char_nick(char_id, requester) {
            tracing::debug!(char_id = char_id.0, requester = %requester, "nickname requested");
        }
        None
    }

    /// Store the character server's nickname answer. Returns the player
    /// that asked for it.
    pub fn char_nick_answer(&mut self, char_id: CharId, name: CharName) -> Option<BlockId> {
        self.index.ids_mut().add_char_nick(char_id, name)
    }

    // -- NPCs and mobs --------------------------------------------------------

    fn spawn_durable(&mut self, map: &MapName, x: i32, y: i32, data: EntityData) -> Result<(BlockId, EntityKey), WorldError> {
        let id = self.allocate_durable_id();
        let key = self.index.add_durable(Entity::new(id, map.clone(), x, y, data))?;
        let is_npc = matches!(self.index.get(key).map(Entity::kind), Some(EntityKind::Npc));
        let slotted = if is_npc {
            self.index.add_npc(key).map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = slotted.and_then(|()| self.index.link(key)) {
            self.index.remove_npc(key);
            self.index.remove_durable(id);
            self.index.free(key);
            return Err(err.into());
        }
        if let Some(entity) = self.index.get(key) {
            self.broadcast.notify_spawned(entity);
        }
        Ok((id, key))
    }

    fn delete_durable(&mut self, id: BlockId, expected: EntityKind, reason: RemovalReason) -> bool {
        let Some(key) = self.index.lookup(id) else {
            return false;
        };
        match self.index.get(key) {
            Some(entity) if entity.kind() == expected => {
                self.broadcast.notify_removed(entity, reason);
            }
            _ => return false,
        }
        self.index.remove_npc(key);
        self.index.remove_durable(id);
        self.index.free(key)
    }

    /// Spawn an NPC under a fresh durable id and give it a slot in the
    /// map's NPC table. Fails with `TooManyNpcs` once the table is full.
    pub fn add_npc(&mut self, name: impl Into<String>, map: &MapName, x: i32, y: i32) -> Result<(BlockId, EntityKey), WorldError> {
        let data = EntityData::Npc(NpcData {
            name: name.into(),
            slot: None,
        });
        self.spawn_durable(map, x, y, data)
    }

    /// Remove an NPC and free its table slot. `false` if `id` is not an NPC.
    pub fn delete_npc(&mut self, id: BlockId) -> bool {
        self.delete_durable(id, EntityKind::Npc, RemovalReason::Deleted)
    }

    /// Spawn a monster of `class` under a fresh durable id.
    pub fn add_mob(&mut self, class: u32, map: &MapName, x: i32, y: i32) -> Result<(BlockId, EntityKey), WorldError> {
        self.spawn_durable(map, x, y, EntityData::Mob(MobData { class }))
    }

    /// Remove a monster. Returns `false`, leaving the world untouched, if
    /// `id` does not name one.
    pub fn delete_mob(&mut self, id: BlockId) -> bool {
        self.delete_durable(id, EntityKind::Mob, RemovalReason::Deleted)
    }

    // -- spells ---------------------------------------------------------------

    /// Place a spell invocation under an ephemeral id.
    pub fn add_spell(
        &mut self,
        name: impl Into<String>,
        caster: Option<BlockId>,
        map: &MapName,
        x: i32,
        y: i32,
    ) -> Result<BlockId, WorldError> {
        let data = EntityData::Spell(SpellData {
            name: name.into(),
            caster,
        });
        let (id, key) = self.index.add_object(map.clone(), x, y, data)?;
        if let Err(err) = self.index.link(key) {
            self.index.delete_object(id, EntityKind::Spell);
            return Err(err.into());
        }
        Ok(id)
    }

    /// Release a spell invocation and its ephemeral id.
    pub fn free_spell(&mut self, id: BlockId) -> bool {
        self.index.delete_object(id, EntityKind::Spell)
    }

    // -- timers ---------------------------------------------------------------

    /// Advance the scheduler to `now` and run every due event. Returns the
    /// number of events run.
    pub fn run_timers(&mut self, now: Tick) -> usize {
        let fired = self.scheduler.advance(now);
        let count = fired.len();
        for (handle, event) in fired {
            match event {
                TimerEvent::ClearFloorItem(id) => self.expire_floor_item(id, handle),
            }
        }
        count
    }

    // -- shutdown -------------------------------------------------------------

    /// Dispose of every entity on every local map by kind, then forget all
    /// maps. Returns the number of entities disposed of.
    pub fn shutdown(&mut self) -> usize {
        let mut disposed = 0;
        for name in self.index.maps().local_names() {
            let Ok(local) = self.index.local_map(&name) else {
                continue;
            };
            let whole = Rect::new(0, 0, local.width() - 1, local.height() - 1);
            let result = query_rect(self, &name, whole, None, |world, key| {
                let Some(entity) = world.index.get(key) else {
                    return;
                };
                let id = entity.id();
                match entity.kind() {
                    EntityKind::Player => {
                        world.index.unlink(key);
                    }
                    EntityKind::Npc => {
                        world.delete_durable(id, EntityKind::Npc, RemovalReason::Shutdown);
                    }
                    EntityKind::Mob => {
                        world.delete_durable(id, EntityKind::Mob, RemovalReason::Shutdown);
                    }
                    EntityKind::Item => {
                        world.despawn_floor_item(id, RemovalReason::Shutdown);
                    }
                    EntityKind::Spell => {
                        world.free_spell(id);
                    }
                }
                disposed += 1;
            });
            if let Err(err) = result {
                tracing::warn!(map = %name, error = %err, "map skipped during shutdown");
            }
        }
        self.index.clear_maps();
        tracing::info!(disposed, "world shut down");
        disposed
    }

    /// Digest of every local map's occupancy, in map-name order.
    pub fn occupancy_digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for name in self.index.maps().local_names() {
            if let Ok(local) = self.index.local_map(&name) {
                hasher.update(name.as_str().as_bytes());
                hasher.update(local.occupancy_digest(self.index.entities()).as_bytes());
            }
        }
        hasher.finalize()
    }
}
