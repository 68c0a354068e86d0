//! Backend registry.
//!
//! # Responsibilities
//! - Keep backends in registration order
//! - Deduplicate by normalized `host:port` identity
//! - Select the next backend round-robin

use std::collections::HashMap;

use crate::load_balancer::{
    backend::{Backend, BackendAddr, BackendId},
    round_robin::RoundRobin,
};

/// Ordered, append-only set of backends.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
    by_identity: HashMap<String, BackendId>,
    cursor: RoundRobin,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr`. Returns its ID and whether it was newly inserted.
    pub fn add(&mut self, addr: BackendAddr) -> (BackendId, bool) {
        let identity = addr.to_string();
        if let Some(id) = self.by_identity.get(&identity) {
            return (*id, false);
        }

        let id = BackendId::new(self.backends.len());
        self.backends.push(Backend::new(id, addr));
        self.by_identity.insert(identity, id);
        (id, true)
    }

    /// Advance the round-robin cursor.
    pub fn next(&mut self) -> Option<BackendId> {
        self.cursor.next_index(self.backends.len()).map(BackendId::new)
    }

    pub fn get(&self, id: BackendId) -> Option<&Backend> {
        self.backends.get(id.index())
    }

    pub fn get_mut(&mut self, id: BackendId) -> Option<&mut Backend> {
        self.backends.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Backend> {
        self.backends.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
