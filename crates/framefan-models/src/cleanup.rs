//! Cleanup job descriptions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupKind {
    /// Delete exactly this key.
    Exact,
    /// Delete every key starting with this prefix.
    Prefix,
}

/// One deletion to be carried out by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CleanupJob {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CleanupKind,
}

impl CleanupJob {
    pub fn exact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CleanupKind::Exact,
        }
    }

    pub fn prefix(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CleanupKind::Prefix,
        }
    }

    /// Whether this job deletes `key`.
    pub fn covers(&self, key: &str) -> bool {
        match self.kind {
            CleanupKind::Exact => self.name == key,
            CleanupKind::Prefix => key.starts_with(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        assert!(CleanupJob::exact("a/b").covers("a/b"));
        assert!(!CleanupJob::exact("a/b").covers("a/bc"));
        assert!(CleanupJob::prefix("a/b").covers("a/bc"));
        assert!(!CleanupJob::prefix("a/b").covers("a/c"));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&CleanupJob::prefix("x")).unwrap();
        assert_eq!(json, r#"{"name":"x","type":"prefix"}"#);
    }
}
