//! Cross-run checkpoint of resolved identifiers.
//!
//! The snapshot is a versioned binary file mapping identifier → a reduced
//! projection of the entity record. Only the three resolved references
//! survive; the fetched document is bulky and the sinks are run-specific,
//! so both are stripped before serialization. A later run hydrates records
//! from the snapshot and skips the stages whose references are already set.
//!
//! Loading is infallible by design: a missing, unreadable, or
//! version-mismatched file yields an empty mapping. Writing surfaces its
//! error — at that point the batch already completed and the caller must
//! know the checkpoint was lost.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use extruder_shared::{EntityRecord, ExtruderError, Result};

/// Bump when the on-disk shape changes; a mismatched file is discarded.
const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// SnapshotRecord
// ---------------------------------------------------------------------------

/// The persisted projection of one entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub template_ref: Option<String>,
    pub view_ref: Option<String>,
    pub task_ref: Option<String>,
}

impl From<&EntityRecord> for SnapshotRecord {
    fn from(record: &EntityRecord) -> Self {
        Self {
            id: record.id.clone(),
            template_ref: record.template_ref.clone(),
            view_ref: record.view_ref.clone(),
            task_ref: record.task_ref.clone(),
        }
    }
}

impl SnapshotRecord {
    /// Hydrate a live record: references restored, transient state empty.
    pub fn into_record(self) -> EntityRecord {
        let mut record = EntityRecord::new(self.id);
        record.template_ref = self.template_ref;
        record.view_ref = self.view_ref;
        record.task_ref = self.task_ref;
        record
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    records: BTreeMap<String, SnapshotRecord>,
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Owns the snapshot file path and the load/persist cycle.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted mapping. Never fails: any problem with the file
    /// means starting from an empty mapping.
    pub fn load(&self) -> BTreeMap<String, EntityRecord> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no snapshot, starting empty");
                return BTreeMap::new();
            }
        };

        let file: SnapshotFile = match postcard::from_bytes(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot unreadable, starting empty");
                return BTreeMap::new();
            }
        };

        if file.version != SNAPSHOT_VERSION {
            warn!(
                found = file.version,
                expected = SNAPSHOT_VERSION,
                "snapshot version mismatch, starting empty"
            );
            return BTreeMap::new();
        }

        debug!(count = file.records.len(), "snapshot loaded");
        file.records
            .into_iter()
            .map(|(id, record)| (id, record.into_record()))
            .collect()
    }

    /// Persist the full mapping, replacing the previous snapshot.
    pub fn persist(&self, records: &BTreeMap<String, EntityRecord>) -> Result<()> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            records: records
                .iter()
                .map(|(id, record)| (id.clone(), SnapshotRecord::from(record)))
                .collect(),
        };

        let bytes = postcard::to_allocvec(&file)
            .map_err(|e| ExtruderError::Snapshot(format!("encode failed: {e}")))?;

        std::fs::write(&self.path, bytes).map_err(|e| {
            ExtruderError::Snapshot(format!("write {} failed: {e}", self.path.display()))
        })?;

        debug!(count = records.len(), path = %self.path.display(), "snapshot persisted");
        Ok(())
    }
}
