//! Live connection table
//!
//! Shared between the server and the per-connection tasks, which remove
//! their own entry on exit. Holds handles only; session state stays inside
//! each connection loop.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::{ConnectionHandle, ConnectionId};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.lock().insert(handle.id(), handle);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every handle
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }
}
