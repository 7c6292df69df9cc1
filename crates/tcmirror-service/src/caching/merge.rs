use std::collections::BTreeMap;

use tcmirror_sources::BuildRef;

/// A record with an id that orders records by their creation.
pub trait Identified {
    fn id(&self) -> u64;
}

impl Identified for BuildRef {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Merges freshly fetched records into previously persisted ones.
///
/// The result contains every id of both inputs exactly once, in ascending order. Where both
/// inputs contain an id, the fetched record wins.
pub fn merge_by_id<T: Identified>(persisted: Option<Vec<T>>, fetched: Vec<T>) -> Vec<T> {
    let mut merged = BTreeMap::new();
    for record in persisted.into_iter().flatten() {
        merged.insert(record.id(), record);
    }
    for record in fetched {
        merged.insert(record.id(), record);
    }
    merged.into_values().collect()
}
