//! Data model and remote capabilities of a CI server.
//!
//! Includes the entities mirrored from a remote CI server (build references, full builds, test
//! and problem occurrences, changes), their schema versions, and the [`RemoteSource`] trait the
//! mirror consumes to fetch them.

#![warn(missing_docs)]

mod builds;
mod changes;
mod occurrences;
mod remote;
mod snapshot;
mod versions;

pub use builds::*;
pub use changes::*;
pub use occurrences::*;
pub use remote::*;
pub use snapshot::*;
pub use versions::*;
