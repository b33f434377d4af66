//! Change notifications emitted by write paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::identity::EntityKey;
use crate::Timestamp;

/// Kind of write that touched an entity's data.
///
/// Every kind invalidates the same way; the kind is kept for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ConfigError::Parse {
                reason: format!("unknown change kind '{}'", other),
            }),
        }
    }
}

/// A single "sub-resource of entity X changed" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub key: EntityKey,
    /// Logical collection that changed (e.g. `businessValues`, `riskSources`).
    pub sub_resource: String,
    pub kind: ChangeKind,
    pub received_at: Timestamp,
}

impl ChangeNotification {
    pub fn new(key: EntityKey, sub_resource: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            key,
            sub_resource: sub_resource.into(),
            kind,
            received_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_parse_and_display() {
        for kind in [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete] {
            let parsed: ChangeKind = kind.to_string().parse().expect("roundtrip");
            assert_eq!(parsed, kind);
        }
        assert_eq!("UPDATE".parse::<ChangeKind>(), Ok(ChangeKind::Update));
        assert!("upsert".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_change_kind_serde_lowercase() {
        let json = serde_json::to_string(&ChangeKind::Delete).expect("serialize");
        assert_eq!(json, "\"delete\"");
    }

    #[test]
    fn test_change_notification_new() {
        let key = EntityKey::new("s1").expect("valid key");
        let note = ChangeNotification::new(key.clone(), "businessValues", ChangeKind::Create);
        assert_eq!(note.key, key);
        assert_eq!(note.sub_resource, "businessValues");
        assert_eq!(note.kind, ChangeKind::Create);
    }
}
