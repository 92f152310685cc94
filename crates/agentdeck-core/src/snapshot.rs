// ABOUTME: Snapshot value type and codec for suspended execution contexts.
// ABOUTME: Captures any serde-serializable engine context as portable JSON and restores it later.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Version tag written into every blob. Restoring a blob with a different
/// format fails instead of guessing at its layout.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Errors that can occur while capturing or restoring a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("execution context cannot be serialized: {0}")]
    Unserializable(String),

    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("run has no snapshot")]
    Missing,
}

/// A captured execution context plus the metadata needed to restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBlob {
    pub format: u32,
    pub captured_at: DateTime<Utc>,
    pub state: Value,
}

/// The snapshot slot of a run: empty unless the run is paused.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "blob", rename_all = "snake_case")]
pub enum Snapshot {
    #[default]
    None,
    Blob(SnapshotBlob),
}

impl Snapshot {
    pub fn is_present(&self) -> bool {
        matches!(self, Snapshot::Blob(_))
    }

    /// Encode for a nullable text column. `Snapshot::None` maps to NULL.
    pub fn to_text(&self) -> Result<Option<String>, SnapshotError> {
        match self {
            Snapshot::None => Ok(None),
            Snapshot::Blob(blob) => serde_json::to_string(blob)
                .map(Some)
                .map_err(|e| SnapshotError::Unserializable(e.to_string())),
        }
    }

    /// Decode from a nullable text column.
    pub fn from_text(text: Option<&str>) -> Result<Self, SnapshotError> {
        match text {
            None => Ok(Snapshot::None),
            Some(text) => serde_json::from_str(text)
                .map(Snapshot::Blob)
                .map_err(|e| SnapshotError::Corrupt(e.to_string())),
        }
    }
}

/// Serialize an execution context into a snapshot.
pub fn capture<T: Serialize>(context: &T) -> Result<Snapshot, SnapshotError> {
    let state =
        serde_json::to_value(context).map_err(|e| SnapshotError::Unserializable(e.to_string()))?;
    Ok(Snapshot::Blob(SnapshotBlob {
        format: SNAPSHOT_FORMAT,
        captured_at: Utc::now(),
        state,
    }))
}

/// Deserialize an execution context previously produced by [`capture`].
pub fn restore<T: DeserializeOwned>(snapshot: &Snapshot) -> Result<T, SnapshotError> {
    let blob = match snapshot {
        Snapshot::None => return Err(SnapshotError::Missing),
        Snapshot::Blob(blob) => blob,
    };

    if blob.format != SNAPSHOT_FORMAT {
        return Err(SnapshotError::Corrupt(format!(
            "unsupported snapshot format {}",
            blob.format
        )));
    }

    T::deserialize(&blob.state).map_err(|e| SnapshotError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Suspended {
        next_step: String,
        attempt: u32,
        notes: Vec<String>,
    }

    #[test]
    fn capture_and_restore_preserve_context() {
        let ctx = Suspended {
            next_step: "review".to_string(),
            attempt: 2,
            notes: vec!["draft one".to_string()],
        };

        let snapshot = capture(&ctx).unwrap();
        assert!(snapshot.is_present());

        let restored: Suspended = restore(&snapshot).unwrap();
        assert_eq!(restored, ctx);
    }

    #[test]
    fn text_column_round_trip() {
        let snapshot = capture(&serde_json::json!({"pending": "push_index"})).unwrap();
        let text = snapshot.to_text().unwrap();
        let decoded = Snapshot::from_text(text.as_deref()).unwrap();
        assert_eq!(decoded, snapshot);

        assert_eq!(Snapshot::None.to_text().unwrap(), None);
        assert_eq!(Snapshot::from_text(None).unwrap(), Snapshot::None);
    }

    #[test]
    fn non_string_map_keys_are_unserializable() {
        let mut ctx: BTreeMap<Vec<u8>, u8> = BTreeMap::new();
        ctx.insert(vec![1, 2], 3);

        let err = capture(&ctx).unwrap_err();
        assert!(matches!(err, SnapshotError::Unserializable(_)));
    }

    #[test]
    fn restoring_empty_or_foreign_snapshot_fails() {
        let err = restore::<Suspended>(&Snapshot::None).unwrap_err();
        assert!(matches!(err, SnapshotError::Missing));

        let blob = Snapshot::Blob(SnapshotBlob {
            format: SNAPSHOT_FORMAT + 1,
            captured_at: Utc::now(),
            state: serde_json::json!({}),
        });
        assert!(matches!(
            restore::<Suspended>(&blob).unwrap_err(),
            SnapshotError::Corrupt(_)
        ));

        assert!(matches!(
            Snapshot::from_text(Some("not json")).unwrap_err(),
            SnapshotError::Corrupt(_)
        ));
    }
}
