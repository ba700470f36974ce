//! Identifier registries.
//!
//! Game-visible [`BlockId`]s resolve through two tiers. Ids below the
//! ephemeral capacity index a fixed slot array handed out by a forward
//! cursor scan; every other id goes through a hash map. Ephemeral entries are
//! recorded in both tiers so either lookup path finds them.
//!
//! Players are additionally reachable by name, and character ids map to
//! cached nicknames. Those side tables are only ever written together with
//! the durable id map.

use std::collections::HashMap;

use crate::entity::{BlockId, CharId, CharName, EntityKey};
use crate::IndexError;

/// Slots `0` and `1` of the ephemeral range are never handed out.
pub const RESERVED_OBJECT_IDS: usize = 2;

/// Registry answer that keeps "removed" apart from "never seen".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present(EntityKey),
    /// Was registered, has since been removed.
    Removed,
    Never,
}

impl Presence {
    fn of(entry: Option<&Option<EntityKey>>) -> Self {
        match entry {
            Some(Some(key)) => Presence::Present(*key),
            Some(None) => Presence::Removed,
            None => Presence::Never,
        }
    }

    pub fn key(self) -> Option<EntityKey> {
        match self {
            Presence::Present(key) => Some(key),
            Presence::Removed | Presence::Never => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CharNick {
    nick: Option<CharName>,
    /// Player waiting for the character server to answer.
    requester: Option<BlockId>,
}

#[derive(Debug)]
pub struct IdRegistry {
    objects: Vec<Option<EntityKey>>,
    first_free: usize,
    id_db: HashMap<BlockId, Option<EntityKey>>,
    nick_db: HashMap<CharName, Option<EntityKey>>,
    charid_db: HashMap<CharId, CharNick>,
}

impl IdRegistry {
    /// A registry whose ephemeral range holds `capacity` slots, two of which
    /// are reserved.
    pub fn new(capacity: usize) -> Self {
        Self {
            objects: vec![None; capacity],
            first_free: RESERVED_OBJECT_IDS,
            id_db: HashMap::new(),
            nick_db: HashMap::new(),
            charid_db: HashMap::new(),
        }
    }

    /// Size of the ephemeral range, reserved slots included.
    pub fn capacity(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_ephemeral(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.objects.len()
    }

    // -- ephemeral tier -----------------------------------------------------

    /// Claim the first free ephemeral slot at or after the cursor.
    pub fn allocate_ephemeral(&mut self, key: EntityKey) -> Result<BlockId, IndexError> {
        let capacity = self.objects.len();
        if self.first_free < RESERVED_OBJECT_IDS || self.first_free >= capacity {
            self.first_free = RESERVED_OBJECT_IDS;
        }
        while self.first_free < capacity && self.objects[self.first_free].is_some() {
            self.first_free += 1;
        }
        if self.first_free >= capacity {
            tracing::warn!(capacity, "no free ephemeral object id");
            return Err(IndexError::Exhausted { capacity });
        }

        let slot = self.first_free;
        let id = BlockId(slot as u32);
        self.objects[slot] = Some(key);
        self.id_db.insert(id, Some(key));
        Ok(id)
    }

    /// Empty an ephemeral slot and its durable-map entry. The cursor moves
    /// back so the slot is found again by the next scan.
    pub(crate) fn clear_slot(&mut self, id: BlockId) -> Option<EntityKey> {
        let slot = id.0 as usize;
        let key = self.objects.get_mut(slot)?.take()?;
        self.id_db.insert(id, None);
        if slot < self.first_free {
            self.first_free = slot;
        }
        Some(key)
    }

    /// Occupied ephemeral slots in id order.
    pub fn objects(&self) -> impl Iterator<Item = (BlockId, EntityKey)> + '_ {
        self.objects
            .iter()
            .enumerate()
            .skip(RESERVED_OBJECT_IDS)
            .filter_map(|(slot, key)| key.map(|k| (BlockId(slot as u32), k)))
    }

    /// Number of occupied ephemeral slots.
    pub fn ephemeral_len(&self) -> usize {
        self.objects.iter().filter(|slot| slot.is_some()).count()
    }

    // -- durable tier ---------------------------------------------------------

    /// Resolve any id. Ephemeral ids go straight to the slot array.
    pub fn lookup(&self, id: BlockId) -> Option<EntityKey> {
        if self.is_ephemeral(id) {
            self.objects[id.0 as usize]
        } else {
            self.id_db.get(&id).copied().flatten()
        }
    }

    /// Whether a durable id was never seen, is live, or was removed.
    pub fn presence(&self, id: BlockId) -> Presence {
        Presence::of(self.id_db.get(&id))
    }

    /// Bind a durable id to `key`, replacing any earlier binding.
    ///
    /// Ids inside the ephemeral range are refused with `ReservedId`; those
    /// are handed out by [`allocate_ephemeral`](Self::allocate_ephemeral) only.
    pub fn register_durable(&mut self, id: BlockId, key: EntityKey) -> Result<(), IndexError> {
        self.check_durable(id)?;
        self.id_db.insert(id, Some(key));
        Ok(())
    }

    /// Mark a durable id as removed. Returns the key it held, if any.
    pub fn deregister_durable(&mut self, id: BlockId) -> Option<EntityKey> {
        if self.is_ephemeral(id) {
            return None;
        }
        self.id_db.get_mut(&id).and_then(Option::take)
    }

    fn check_durable(&self, id: BlockId) -> Result<(), IndexError> {
        if self.is_ephemeral(id) {
            return Err(IndexError::ReservedId {
                id,
                capacity: self.objects.len(),
            });
        }
        Ok(())
    }

    // -- players --------------------------------------------------------------

    /// Register a player under its id, name and character id at once.
    /// Returns the player waiting on this character's nickname, if any.
    ///
    /// Refused without touching any table when the name or character is
    /// already held by a live player.
    pub fn register_player(
        &mut self,
        id: BlockId,
        key: EntityKey,
        name: &CharName,
        char_id: CharId,
    ) -> Result<Option<BlockId>, IndexError> {
        self.check_durable(id)?;
        if self.lookup_by_name(name).is_some() {
            return Err(IndexError::NameTaken { name: name.clone() });
        }
        let char_online = self
            .charid_db
            .get(&char_id)
            .and_then(|entry| entry.nick.as_ref())
            .is_some_and(|nick| self.lookup_by_name(nick).is_some());
        if char_online {
            return Err(IndexError::CharOnline { char_id });
        }
        self.id_db.insert(id, Some(key));
        self.nick_db.insert(name.clone(), Some(key));
        Ok(self.add_char_nick(char_id, name.clone()))
    }

    /// Remove a player from every table it was registered in.
    pub fn deregister_player(&mut self, id: BlockId, name: &CharName, char_id: CharId) -> Option<EntityKey> {
        let key = self.deregister_durable(id);
        self.nick_db.insert(name.clone(), None);
        self.charid_db.remove(&char_id);
        key
    }

    /// The online player called `name`.
    pub fn lookup_by_name(&self, name: &CharName) -> Option<EntityKey> {
        self.nick_db.get(name).copied().flatten()
    }

    pub fn name_presence(&self, name: &CharName) -> Presence {
        Presence::of(self.nick_db.get(name))
    }

    /// Cached nickname of a character. Nothing is returned while a request
    /// for it is still outstanding.
    pub fn lookup_by_char_id(&self, char_id: CharId) -> Option<&CharName> {
        let entry = self.charid_db.get(&char_id)?;
        if entry.requester.is_some() {
            return None;
        }
        entry.nick.as_ref()
    }

    /// Note that `requester` wants the nickname of `char_id`.
    ///
    /// Returns `true` when the character server has to be asked; `false`
    /// when the name is already cached or a request is in flight.
    pub fn request_char_nick(&mut self, char_id: CharId, requester: BlockId) -> bool {
        if self.charid_db.contains_key(&char_id) {
            return false;
        }
        self.charid_db.insert(
            char_id,
            CharNick {
                nick: None,
                requester: Some(requester),
            },
        );
        true
    }

    /// Store a nickname answer. Returns whoever was waiting for it.
    pub fn add_char_nick(&mut self, char_id: CharId, nick: CharName) -> Option<BlockId> {
        let entry = self.charid_db.entry(char_id).or_default();
        entry.nick = Some(nick);
        entry.requester.take()
    }

    /// Forget every id, name and nickname.
    pub fn clear(&mut self) {
        self.objects.iter_mut().for_each(|slot| *slot = None);
        self.first_free = RESERVED_OBJECT_IDS;
        self.id_db.clear();
        self.nick_db.clear();
        self.charid_db.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
