//! Identifiers shared across the fiberscope crates.

use std::fmt;

use uuid::Uuid;

/// Identifier for one accessibility snapshot. Backend references handed out
/// under a snapshot are only meaningful within the page-load generation the
/// snapshot was taken in.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn new() -> Self {
        let short = Uuid::new_v4().simple().to_string();
        Self(format!("ax-{}", &short[..8]))
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_are_prefixed_and_unique() {
        let a = SnapshotId::new();
        let b = SnapshotId::new();
        assert!(a.0.starts_with("ax-"));
        assert_ne!(a, b);
    }
}
