//! Track naming and hashing
//!
//! A track is addressed by a [`FullTrackName`]: a [`TrackNamespace`] (ordered
//! opaque segments) plus a name segment. [`TrackHash`] derives stable 64-bit
//! identifiers from it with xxh3; `full_hash` doubles as the wire track alias.

use std::fmt;

use bytes::Bytes;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::protocol::varint;

/// Ordered sequence of opaque namespace segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TrackNamespace {
    segments: Vec<Bytes>,
}

impl TrackNamespace {
    /// Create a namespace from raw segments
    pub fn new(segments: Vec<Bytes>) -> Self {
        Self { segments }
    }

    /// Create a namespace from string segments
    pub fn from_strs<S: AsRef<str>>(segments: &[S]) -> Self {
        Self {
            segments: segments
                .iter()
                .map(|s| Bytes::copy_from_slice(s.as_ref().as_bytes()))
                .collect(),
        }
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stable hash over all segments
    ///
    /// Segments are length-prefixed so `["ab", "c"]` and `["a", "bc"]` do not
    /// hash alike.
    pub fn namespace_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for segment in &self.segments {
            hasher.update(&(segment.len() as u64).to_be_bytes());
            hasher.update(segment);
        }
        hasher.digest()
    }
}

impl fmt::Display for TrackNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&String::from_utf8_lossy(segment))?;
        }
        Ok(())
    }
}

/// Namespace plus track name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullTrackName {
    pub namespace: TrackNamespace,
    pub name: Bytes,
}

impl FullTrackName {
    pub fn new(namespace: TrackNamespace, name: impl Into<Bytes>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// Convenience constructor from string parts
    pub fn from_strs<S: AsRef<str>>(namespace: &[S], name: &str) -> Self {
        Self::new(
            TrackNamespace::from_strs(namespace),
            Bytes::copy_from_slice(name.as_bytes()),
        )
    }

    pub fn track_hash(&self) -> TrackHash {
        TrackHash::new(self)
    }
}

impl fmt::Display for FullTrackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, String::from_utf8_lossy(&self.name))
    }
}

/// Stable identifiers for a track
///
/// Equal names always produce equal hashes, across processes and builds.
/// `full_hash` is masked to 62 bits so it always fits in a varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHash {
    pub namespace_hash: u64,
    pub name_hash: u64,
    pub full_hash: u64,
}

impl TrackHash {
    pub fn new(name: &FullTrackName) -> Self {
        let namespace_hash = name.namespace.namespace_hash();
        let name_hash = xxh3_64(&name.name);

        let mut hasher = Xxh3::new();
        hasher.update(&namespace_hash.to_be_bytes());
        hasher.update(&name_hash.to_be_bytes());
        let full_hash = hasher.digest() & varint::MAX;

        Self {
            namespace_hash,
            name_hash,
            full_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = FullTrackName::from_strs(&["conference", "room1"], "video");
        let b = FullTrackName::from_strs(&["conference", "room1"], "video");
        assert_eq!(a.track_hash(), b.track_hash());
        assert_eq!(a.track_hash().namespace_hash, a.namespace.namespace_hash());
    }

    #[test]
    fn test_hash_is_stable_across_builds() {
        // xxh3 of the empty input is fixed by the algorithm
        assert_eq!(xxh3_64(b""), 0x2d06_8005_38d3_94c2);
    }

    #[test]
    fn test_segment_boundaries_matter() {
        let a = TrackNamespace::from_strs(&["ab", "c"]);
        let b = TrackNamespace::from_strs(&["a", "bc"]);
        assert_ne!(a.namespace_hash(), b.namespace_hash());
    }

    #[test]
    fn test_distinct_names_distinct_alias() {
        let video = FullTrackName::from_strs(&["live"], "video");
        let audio = FullTrackName::from_strs(&["live"], "audio");
        assert_eq!(video.track_hash().namespace_hash, audio.track_hash().namespace_hash);
        assert_ne!(video.track_hash().full_hash, audio.track_hash().full_hash);
    }

    #[test]
    fn test_full_hash_fits_varint() {
        for i in 0..256 {
            let name = FullTrackName::from_strs(&["ns"], &format!("track-{}", i));
            assert!(name.track_hash().full_hash <= varint::MAX);
        }
    }

    #[test]
    fn test_display() {
        let name = FullTrackName::from_strs(&["live", "cam"], "video");
        assert_eq!(name.to_string(), "live/cam:video");
    }
}
