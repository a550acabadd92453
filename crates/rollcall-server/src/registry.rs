//! Client registry
//!
//! Tracks every joined client: its device id, its address key, and the
//! roster it reported. Device ids are allocated smallest-first above the
//! server's own id, and re-allocations for a known address key return the
//! id it already holds, so a client that re-joins keeps its identity.

use std::collections::HashMap;

use rollcall_core::{DeviceId, Person};

/// One joined client
#[derive(Debug, Clone)]
pub struct Registration {
    pub device_id: DeviceId,
    /// `"ip:port"` of the client's endpoint, the join's source address
    pub key: String,
    /// Roster in join order, ids in composite form
    pub people: Vec<Person>,
}

/// All joined clients, indexed by device id and by address key
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<u16, Registration>,
    by_key: HashMap<String, u16>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a device id for `key`, reusing any id the key already holds.
    pub fn allocate(&mut self, key: &str) -> DeviceId {
        if let Some(id) = self.by_key.get(key) {
            return DeviceId(*id);
        }
        let mut candidate = DeviceId::SERVER.0 + 1;
        while self.clients.contains_key(&candidate)
            || self.by_key.values().any(|id| *id == candidate)
        {
            candidate += 1;
        }
        self.by_key.insert(key.to_string(), candidate);
        DeviceId(candidate)
    }

    /// Commit a registration under its reserved id.
    pub fn insert(&mut self, registration: Registration) {
        self.by_key
            .insert(registration.key.clone(), registration.device_id.0);
        self.clients.insert(registration.device_id.0, registration);
    }

    pub fn remove(&mut self, device_id: DeviceId) -> Option<Registration> {
        let registration = self.clients.remove(&device_id.0)?;
        self.by_key.remove(&registration.key);
        Some(registration)
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&Registration> {
        self.clients.get(&device_id.0)
    }

    pub fn get_mut(&mut self, device_id: DeviceId) -> Option<&mut Registration> {
        self.clients.get_mut(&device_id.0)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_allocation_is_above_server_id() {
        let mut registry = Registry::new();
        assert_eq!(registry.allocate("10.0.0.1:2346"), DeviceId(2));
    }

    #[test]
    fn test_allocation_is_stable_per_key() {
        let mut registry = Registry::new();
        let a = registry.allocate("10.0.0.1:2346");
        let b = registry.allocate("10.0.0.1:2346");
        assert_eq!(a, b);
    }

    #[test]
    fn test_allocation_is_injective() {
        let mut registry = Registry::new();
        let a = registry.allocate("10.0.0.1:2346");
        let b = registry.allocate("10.0.0.2:2346");
        let c = registry.allocate("10.0.0.3:2346");
        assert_eq!(a, DeviceId(2));
        assert_eq!(b, DeviceId(3));
        assert_eq!(c, DeviceId(4));
    }

    #[test]
    fn test_remove_frees_the_id() {
        let mut registry = Registry::new();
        let id = registry.allocate("10.0.0.1:2346");
        registry.insert(Registration {
            device_id: id,
            key: "10.0.0.1:2346".into(),
            people: vec![],
        });
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.key, "10.0.0.1:2346");
        assert!(registry.is_empty());
        assert_eq!(registry.allocate("10.0.0.9:2346"), id);
    }

    #[test]
    fn test_lookup_by_id() {
        let mut registry = Registry::new();
        let id = registry.allocate("k");
        registry.insert(Registration {
            device_id: id,
            key: "k".into(),
            people: vec![Person::new("2.0", false)],
        });
        assert_eq!(registry.get(id).unwrap().people.len(), 1);
        assert!(registry.get(DeviceId(99)).is_none());
    }
}
