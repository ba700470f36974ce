//! Connection slots and the players attached to them.
//!
//! Only authenticated sessions with an attached player take part in
//! iteration; half-open connections are invisible to game logic.

use wayfarer_index::entity::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub usize);

#[derive(Debug, Clone, Default)]
struct Session {
    player: Option<EntityKey>,
    authenticated: bool,
}

impl Session {
    fn active_player(&self) -> Option<EntityKey> {
        if self.authenticated {
            self.player
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection in the lowest free slot.
    pub fn open(&mut self) -> SessionId {
        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.slots[slot] = Some(Session::default());
            return SessionId(slot);
        }
        self.slots.push(Some(Session::default()));
        SessionId(self.slots.len() - 1)
    }

    /// Close a connection. Returns the player that was attached, if any.
    pub fn close(&mut self, id: SessionId) -> Option<EntityKey> {
        self.slots.get_mut(id.0)?.take()?.player
    }

    /// Whether the slot holds a connection.
    pub fn is_open(&self, id: SessionId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    /// Bind a player to an open session. Returns `false` if the session is
    /// not open.
    pub fn attach(&mut self, id: SessionId, player: EntityKey) -> bool {
        match self.slots.get_mut(id.0) {
            Some(Some(session)) => {
                session.player = Some(player);
                true
            }
            _ => false,
        }
    }

    /// Unbind the player of a session, keeping the connection open.
    pub fn detach(&mut self, id: SessionId) -> Option<EntityKey> {
        match self.slots.get_mut(id.0) {
            Some(Some(session)) => {
                session.authenticated = false;
                session.player.take()
            }
            _ => None,
        }
    }

    /// Mark a session as authenticated so its player counts as active.
    /// Returns `false` if the session is not open.
    pub fn authenticate(&mut self, id: SessionId) -> bool {
        match self.slots.get_mut(id.0) {
            Some(Some(session)) => {
                session.authenticated = true;
                true
            }
            _ => false,
        }
    }

    /// The authenticated player of a session.
    pub fn player(&self, id: SessionId) -> Option<EntityKey> {
        self.slots.get(id.0)?.as_ref()?.active_player()
    }

    /// Session a player is attached to.
    pub fn session_of(&self, player: EntityKey) -> Option<SessionId> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.player == Some(player)))
            .map(SessionId)
    }

    fn active(&self, slot: usize) -> Option<(SessionId, EntityKey)> {
        self.slots
            .get(slot)?
            .as_ref()?
            .active_player()
            .map(|key| (SessionId(slot), key))
    }

    /// Lowest-numbered active session.
    pub fn first(&self) -> Option<(SessionId, EntityKey)> {
        (0..self.slots.len()).find_map(|slot| self.active(slot))
    }

    pub fn last(&self) -> Option<(SessionId, EntityKey)> {
        (0..self.slots.len()).rev().find_map(|slot| self.active(slot))
    }

    /// Next active session after `after`.
    pub fn next(&self, after: SessionId) -> Option<(SessionId, EntityKey)> {
        (after.0 + 1..self.slots.len()).find_map(|slot| self.active(slot))
    }

    /// Previous active session before `before`.
    pub fn prev(&self, before: SessionId) -> Option<(SessionId, EntityKey)> {
        (0..before.0.min(self.slots.len())).rev().find_map(|slot| self.active(slot))
    }

    /// Every active session in slot order.
    pub fn players(&self) -> impl Iterator<Item = (SessionId, EntityKey)> + '_ {
        (0..self.slots.len()).filter_map(|slot| self.active(slot))
    }

    /// Open connections, authenticated or not.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> EntityKey {
        EntityKey::new(i, 0)
    }

    fn table_with_players() -> (SessionTable, [SessionId; 4]) {
        let mut sessions = SessionTable::new();
        let ids = [sessions.open(), sessions.open(), sessions.open(), sessions.open()];
        for (i, id) in ids.iter().enumerate() {
            sessions.attach(*id, key(i as u32));
        }
        // Slot 2 never finishes authentication.
        for id in [ids[0], ids[1], ids[3]] {
            sessions.authenticate(id);
        }
        (sessions, ids)
    }

    #[test]
    fn iteration_skips_unauthenticated_sessions() {
        let (sessions, ids) = table_with_players();
        let forward: Vec<_> = sessions.players().map(|(id, _)| id).collect();
        assert_eq!(forward, vec![ids[0], ids[1], ids[3]]);
        assert_eq!(sessions.next(ids[1]), Some((ids[3], key(3))));
        assert_eq!(sessions.prev(ids[3]), Some((ids[1], key(1))));
        assert_eq!(sessions.first(), Some((ids[0], key(0))));
        assert_eq!(sessions.last(), Some((ids[3], key(3))));
        assert_eq!(sessions.prev(ids[0]), None);
        assert_eq!(sessions.next(ids[3]), None);
    }

    #[test]
    fn closed_slots_are_reused() {
        let (mut sessions, ids) = table_with_players();
        assert_eq!(sessions.close(ids[1]), Some(key(1)));
        assert_eq!(sessions.close(ids[1]), None);
        assert_eq!(sessions.open(), ids[1]);
        assert_eq!(sessions.player(ids[1]), None);
        assert_eq!(sessions.len(), 4);
    }

    #[test]
    fn detach_keeps_connection_open() {
        let (mut sessions, ids) = table_with_players();
        assert_eq!(sessions.detach(ids[0]), Some(key(0)));
        assert!(sessions.is_open(ids[0]));
        assert_eq!(sessions.first(), Some((ids[1], key(1))));
        assert_eq!(sessions.session_of(key(3)), Some(ids[3]));
    }
}
