use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ServerEvent, UserId};

/// Push side of one live connection.
///
/// Two handles are equal when they belong to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle { id: Uuid::now_v7(), tx }, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort: returns false when the connection is already gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Which connection each online user is reachable on.
///
/// One entry per user, last announcement wins. `bound` indexes the same
/// entries by connection so disconnect cleanup does not scan every user.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    by_user: HashMap<UserId, ConnectionHandle>,
    bound: HashMap<Uuid, HashSet<UserId>>,
}

impl Entries {
    fn unbind(&mut self, handle_id: Uuid, user_id: UserId) {
        if let Some(users) = self.bound.get_mut(&handle_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.bound.remove(&handle_id);
            }
        }
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `user_id` to `handle`, returning the connection it replaced.
    /// The replaced connection is left open.
    pub fn set_online(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let handle_id = handle.id;
        let mut entries = self.entries();

        let superseded = entries
            .by_user
            .insert(user_id, handle)
            .filter(|previous| previous.id != handle_id);
        if let Some(previous) = &superseded {
            entries.unbind(previous.id, user_id);
        }
        entries.bound.entry(handle_id).or_default().insert(user_id);

        superseded
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries().by_user.get(&user_id).cloned()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.entries().by_user.contains_key(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.entries().by_user.len()
    }

    /// Drops every entry still pointing at `handle_id` and returns the users
    /// that went offline. Entries already taken over by a newer connection
    /// are not touched.
    pub fn remove_by_handle(&self, handle_id: Uuid) -> Vec<UserId> {
        let mut entries = self.entries();
        let Some(users) = entries.bound.remove(&handle_id) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(users.len());
        for user_id in users {
            if entries.by_user.get(&user_id).is_some_and(|current| current.id == handle_id) {
                entries.by_user.remove(&user_id);
                removed.push(user_id);
            }
        }
        removed
    }
}
