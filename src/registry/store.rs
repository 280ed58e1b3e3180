//! Track registry implementation
//!
//! Maps `TrackHash::full_hash` to the single handler entry for that track.
//! Each connection owns its registry, so no locking is involved.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

use super::entry::{PublishTrackEntry, SubscribeTrackEntry, TrackEntry};
use super::error::RegistryError;
use super::track::{FullTrackName, TrackHash};

/// Pass-through hasher for keys that are already xxh3 digests
#[derive(Default)]
pub struct TrackHashHasher(u64);

impl Hasher for TrackHashHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 = (self.0 << 8) | *byte as u64;
        }
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

type TrackMap = HashMap<u64, TrackEntry, BuildHasherDefault<TrackHashHasher>>;

/// Per-connection track registry
#[derive(Default)]
pub struct TrackRegistry {
    tracks: TrackMap,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` could be registered under `hash` right now
    pub fn check(&self, name: &FullTrackName, hash: &TrackHash) -> Result<(), RegistryError> {
        match self.tracks.get(&hash.full_hash) {
            None => Ok(()),
            Some(existing) if existing.name() == name => {
                Err(RegistryError::AlreadyRegistered(name.clone()))
            }
            Some(existing) => Err(RegistryError::HashCollision {
                full_hash: hash.full_hash,
                existing: existing.name().clone(),
                requested: name.clone(),
            }),
        }
    }

    /// Register an entry under its full hash
    ///
    /// Never overwrites: a live entry with the same name is
    /// `AlreadyRegistered`, a live entry with a different name is a
    /// `HashCollision`.
    pub fn register(&mut self, entry: TrackEntry) -> Result<TrackHash, RegistryError> {
        let hash = entry.hash();

        if let Err(err) = self.check(entry.name(), &hash) {
            tracing::warn!(
                track = %entry.name(),
                full_hash = hash.full_hash,
                error = %err,
                "Track registration rejected"
            );
            return Err(err);
        }

        tracing::debug!(
            track = %entry.name(),
            full_hash = hash.full_hash,
            publish = entry.is_publish(),
            "Track registered"
        );
        self.tracks.insert(hash.full_hash, entry);
        Ok(hash)
    }

    /// Remove an entry; absent hashes are a no-op
    pub fn unregister(&mut self, full_hash: u64) -> Option<TrackEntry> {
        let removed = self.tracks.remove(&full_hash);
        if let Some(entry) = &removed {
            tracing::debug!(track = %entry.name(), full_hash = full_hash, "Track unregistered");
        }
        removed
    }

    pub fn lookup(&self, full_hash: u64) -> Option<&TrackEntry> {
        self.tracks.get(&full_hash)
    }

    /// Find the hash of a registered name
    pub fn lookup_name(&self, name: &FullTrackName) -> Option<TrackHash> {
        let hash = name.track_hash();
        match self.tracks.get(&hash.full_hash) {
            Some(entry) if entry.name() == name => Some(hash),
            _ => None,
        }
    }

    pub fn publish_mut(&mut self, full_hash: u64) -> Option<&mut PublishTrackEntry> {
        match self.tracks.get_mut(&full_hash) {
            Some(TrackEntry::Publish(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn subscribe_mut(&mut self, full_hash: u64) -> Option<&mut SubscribeTrackEntry> {
        match self.tracks.get_mut(&full_hash) {
            Some(TrackEntry::Subscribe(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Publish tracks whose namespace hashes to `namespace_hash`
    pub fn publish_in_namespace(
        &mut self,
        namespace_hash: u64,
    ) -> impl Iterator<Item = &mut PublishTrackEntry> {
        self.tracks.values_mut().filter_map(move |entry| match entry {
            TrackEntry::Publish(e) if e.hash.namespace_hash == namespace_hash => Some(e),
            _ => None,
        })
    }

    pub fn publish_tracks_mut(&mut self) -> impl Iterator<Item = &mut PublishTrackEntry> {
        self.tracks.values_mut().filter_map(|entry| match entry {
            TrackEntry::Publish(e) => Some(e),
            _ => None,
        })
    }

    pub fn subscribe_tracks_mut(&mut self) -> impl Iterator<Item = &mut SubscribeTrackEntry> {
        self.tracks.values_mut().filter_map(|entry| match entry {
            TrackEntry::Subscribe(e) => Some(e),
            _ => None,
        })
    }

    /// Remove every entry (connection teardown)
    pub fn drain(&mut self) -> Vec<TrackEntry> {
        self.tracks.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ObjectHeaders, TrackMode};
    use crate::registry::handler::{PublishTrackHandler, SubscribeTrackHandler};
    use bytes::Bytes;

    struct NoopPublish;
    impl PublishTrackHandler for NoopPublish {}

    struct NoopSubscribe;
    impl SubscribeTrackHandler for NoopSubscribe {
        fn on_object_received(&mut self, _headers: &ObjectHeaders, _payload: Bytes) {}
    }

    fn publish(name: &FullTrackName) -> TrackEntry {
        TrackEntry::Publish(PublishTrackEntry::new(
            name.clone(),
            Box::new(NoopPublish),
            TrackMode::StreamPerGroup,
            0,
        ))
    }

    /// Entry with a forged hash to simulate a collision
    fn colliding(name: &FullTrackName, with: TrackHash) -> TrackEntry {
        let mut entry = SubscribeTrackEntry::new(name.clone(), Box::new(NoopSubscribe));
        entry.hash = with;
        TrackEntry::Subscribe(entry)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TrackRegistry::new();
        let name = FullTrackName::from_strs(&["live"], "video");
        let hash = registry.register(publish(&name)).unwrap();

        assert_eq!(hash, name.track_hash());
        assert!(registry.lookup(hash.full_hash).is_some());
        assert!(registry.publish_mut(hash.full_hash).is_some());
        assert!(registry.subscribe_mut(hash.full_hash).is_none());
        assert_eq!(registry.lookup_name(&name), Some(hash));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = TrackRegistry::new();
        let name = FullTrackName::from_strs(&["live"], "video");
        registry.register(publish(&name)).unwrap();

        assert_eq!(
            registry.register(publish(&name)),
            Err(RegistryError::AlreadyRegistered(name))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_collision_never_overwrites() {
        let mut registry = TrackRegistry::new();
        let first = FullTrackName::from_strs(&["a"], "one");
        let second = FullTrackName::from_strs(&["b"], "two");
        let hash = registry.register(publish(&first)).unwrap();

        let result = registry.register(colliding(&second, hash));
        assert!(matches!(result, Err(RegistryError::HashCollision { full_hash, .. }) if full_hash == hash.full_hash));

        assert!(registry.check(&second, &hash).is_err());
        assert!(registry.check(&second, &second.track_hash()).is_ok());

        // The original entry survives
        assert_eq!(registry.lookup(hash.full_hash).unwrap().name(), &first);
        assert!(registry.lookup(hash.full_hash).unwrap().is_publish());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = TrackRegistry::new();
        let name = FullTrackName::from_strs(&["live"], "video");
        let hash = registry.register(publish(&name)).unwrap();

        assert!(registry.unregister(hash.full_hash).is_some());
        assert!(registry.unregister(hash.full_hash).is_none());
        assert!(registry.is_empty());

        // Re-registration after removal is legal
        assert!(registry.register(publish(&name)).is_ok());
    }

    #[test]
    fn test_namespace_iteration_and_drain() {
        let mut registry = TrackRegistry::new();
        registry
            .register(publish(&FullTrackName::from_strs(&["live"], "video")))
            .unwrap();
        registry
            .register(publish(&FullTrackName::from_strs(&["live"], "audio")))
            .unwrap();
        registry
            .register(publish(&FullTrackName::from_strs(&["other"], "video")))
            .unwrap();

        let ns_hash = crate::registry::TrackNamespace::from_strs(&["live"]).namespace_hash();
        assert_eq!(registry.publish_in_namespace(ns_hash).count(), 2);

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_name_checks_name() {
        let mut registry = TrackRegistry::new();
        let first = FullTrackName::from_strs(&["a"], "one");
        let second = FullTrackName::from_strs(&["b"], "two");
        let hash = registry.register(publish(&first)).unwrap();
        registry.unregister(hash.full_hash);
        registry.register(colliding(&second, hash)).unwrap();

        // second is stored under first's hash but lookup by first must miss
        assert_eq!(registry.lookup_name(&first), None);
    }
}
