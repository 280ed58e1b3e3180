//! Registry error types
//!
//! Error types for track registry operations.

use super::track::FullTrackName;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A different track already occupies this hash
    HashCollision {
        full_hash: u64,
        existing: FullTrackName,
        requested: FullTrackName,
    },
    /// The same track is already registered
    AlreadyRegistered(FullTrackName),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::HashCollision {
                full_hash,
                existing,
                requested,
            } => write!(
                f,
                "Track hash 0x{:x} of {} collides with {}",
                full_hash, requested, existing
            ),
            RegistryError::AlreadyRegistered(name) => {
                write!(f, "Track already registered: {}", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
