//! File identifier newtype.
//!
//! Every unit of work gets a `file-<uuidv7>` identifier. The UUID v7 payload
//! keeps ids time-ordered, so `ORDER BY id` matches insertion order and the
//! oldest-first lease scan stays index-friendly.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix used by every [`FileId`].
const FILE_ID_PREFIX: &str = "file";

/// Unique identifier for one unit of pipeline work.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Create a new random id (`file-<uuidv7>`, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{FILE_ID_PREFIX}-{}", Uuid::now_v7()))
    }

    /// Wrap an existing string value (e.g. read back from the store).
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for FileId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_carry_prefix_and_v7_payload() {
        let id = FileId::new();
        let suffix = id.as_str().strip_prefix("file-").expect("prefix");
        let parsed = Uuid::parse_str(suffix).expect("valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(FileId::new(), FileId::new());
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = FileId::new();
        let b = FileId::new();
        assert!(a <= b, "v7 ids should sort by creation time");
    }

    #[test]
    fn from_string_roundtrip() {
        let id = FileId::from_string("file-custom".to_owned());
        assert_eq!(id.as_str(), "file-custom");
        assert_eq!(id.into_inner(), "file-custom");
    }

    #[test]
    fn display_and_deref() {
        let id = FileId::from("file-x");
        let s: &str = &id;
        assert_eq!(s, "file-x");
        assert_eq!(format!("{id}"), "file-x");
    }

    #[test]
    fn serde_is_transparent() {
        let id = FileId::from("file-serde");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"file-serde\"");
        let back: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = FileId::from("file-same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id);
        assert_eq!(set.len(), 1);
    }
}
