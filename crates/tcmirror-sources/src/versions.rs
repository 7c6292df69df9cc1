//! Schema versions of the entities that are persisted by the mirror.
//!
//! # How to version
//!
//! The initial "unversioned" version is `0`, which is also what a stored value without a
//! `version` field deserializes to.
//! Whenever the shape or the meaning of a persisted entity changes, increase its version. Stored
//! values with a lower version are considered outdated and are reloaded from the remote server
//! on their next access, regardless of any TTL.

/// Full build details, with the following versions:
///
/// - `2`: Builds carry links to their statistics and changes.
///
/// - `1`: Builds carry their start and finish dates.
///
/// - `0`: Initial version.
pub const BUILD_VERSION: u32 = 2;

/// Build log check results, with the following versions:
///
/// - `1`: Results carry the last thread dump found in the log.
///
/// - `0`: Initial version.
pub const LOG_CHECK_RESULT_VERSION: u32 = 1;

/// An entity carrying a schema version.
pub trait VersionedEntity {
    /// The version written by the current code.
    const LATEST_VERSION: u32;

    /// The version this value was written with.
    fn version(&self) -> u32;

    /// Whether this value was written with an older schema and needs a reload.
    fn is_outdated(&self) -> bool {
        self.version() < Self::LATEST_VERSION
    }

    /// Whether this value is a placeholder for a record that does not exist on the remote.
    fn is_fake_stub(&self) -> bool {
        false
    }
}
