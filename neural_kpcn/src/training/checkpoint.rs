//! Snapshot save and restore of model variables.
//!
//! Each snapshot is a directory `snap-<global_step>` holding:
//! - `metadata.json`: step, epoch and the name, group and shape of every variable
//! - `variables.bin`: raw variable values (see `kpcn_io::format`)

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use kpcn_io::{load_snapshot_file, save_snapshot_file, SnapshotEntry};

use crate::error::{CompletionError, Result};
use crate::variables::{VariableGroup, VariableStore};

/// Groups left out of a restore by default, so a head can be retrained on a
/// restored backbone.
pub const DEFAULT_RESTORE_EXCLUDE: [VariableGroup; 3] = [
    VariableGroup::Classifier,
    VariableGroup::HeadUnary,
    VariableGroup::FullyConnected,
];

const SNAPSHOT_PREFIX: &str = "snap-";
const METADATA_FILE: &str = "metadata.json";
const VARIABLES_FILE: &str = "variables.bin";
const METADATA_VERSION: u32 = 1;

/// Description of one stored variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    /// Full scope path.
    pub name: String,
    /// Variable group.
    pub group: VariableGroup,
    /// Shape.
    pub shape: Vec<usize>,
    /// Whether the variable is trainable.
    pub trainable: bool,
}

/// Snapshot metadata stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Format version for compatibility.
    pub version: u32,
    /// Global step the snapshot is keyed by.
    pub global_step: usize,
    /// Training epoch at save time.
    pub epoch: usize,
    /// Root scope of the variables.
    pub root: String,
    /// Stored variables.
    pub variables: Vec<VariableRecord>,
}

/// Counts reported by [`restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreStats {
    /// Variables assigned from the snapshot.
    pub restored: usize,
    /// Variables skipped because of their group.
    pub excluded: usize,
    /// Variables not present in the snapshot.
    pub missing: usize,
}

/// Writes snapshots and keeps at most `max_to_keep` of them.
#[derive(Debug, Clone)]
pub struct Saver {
    dir: PathBuf,
    max_to_keep: usize,
}

impl Saver {
    /// Create a saver writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep: max_to_keep.max(1),
        }
    }

    /// Snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save all variables of `store` as `snap-<global_step>`.
    pub fn save<B: Backend>(
        &self,
        store: &VariableStore<B>,
        global_step: usize,
        epoch: usize,
    ) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}{}", SNAPSHOT_PREFIX, global_step));
        fs::create_dir_all(&path)?;

        let mut records = Vec::with_capacity(store.len());
        let mut entries = Vec::with_capacity(store.len());
        for (id, var) in store.iter() {
            records.push(VariableRecord {
                name: var.name.clone(),
                group: var.group,
                shape: var.shape.clone(),
                trainable: var.trainable,
            });
            entries.push(SnapshotEntry::new(
                var.name.clone(),
                var.shape.clone(),
                store.values(id)?,
            )?);
        }

        let metadata = SnapshotMetadata {
            version: METADATA_VERSION,
            global_step,
            epoch,
            root: store.root().to_string(),
            variables: records,
        };
        let mut file = BufWriter::new(File::create(path.join(METADATA_FILE))?);
        serde_json::to_writer_pretty(&mut file, &metadata)
            .map_err(|e| checkpoint_error(format!("cannot write metadata: {}", e)))?;
        file.flush()?;

        save_snapshot_file(&entries, path.join(VARIABLES_FILE))?;

        log::info!(
            "Saved snapshot {:?} (step {}, epoch {}, {} variables)",
            path,
            global_step,
            epoch,
            entries.len()
        );

        self.evict()?;
        Ok(path)
    }

    /// Existing snapshots as `(global_step, path)`, oldest first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut snapshots = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let step = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(step) = step {
                if path.join(METADATA_FILE).exists() {
                    snapshots.push((step, path));
                }
            }
        }
        snapshots.sort_by_key(|(step, _)| *step);
        Ok(snapshots)
    }

    /// Newest snapshot, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }

    fn evict(&self) -> Result<()> {
        let snapshots = self.list()?;
        if snapshots.len() <= self.max_to_keep {
            return Ok(());
        }
        let surplus = snapshots.len() - self.max_to_keep;
        for (step, path) in snapshots.into_iter().take(surplus) {
            fs::remove_dir_all(&path)?;
            log::debug!("Evicted snapshot {}", step);
        }
        Ok(())
    }
}

/// Read the metadata of a snapshot directory.
pub fn load_metadata(path: &Path) -> Result<SnapshotMetadata> {
    let file = BufReader::new(File::open(path.join(METADATA_FILE))?);
    let metadata: SnapshotMetadata = serde_json::from_reader(file)
        .map_err(|e| checkpoint_error(format!("cannot read metadata: {}", e)))?;
    if metadata.version != METADATA_VERSION {
        return Err(checkpoint_error(format!(
            "unsupported snapshot version {}",
            metadata.version
        )));
    }
    Ok(metadata)
}

/// Assign variables of `store` from a snapshot, skipping the `exclude` groups.
pub fn restore<B: Backend>(
    store: &mut VariableStore<B>,
    path: &Path,
    exclude: &[VariableGroup],
) -> Result<RestoreStats> {
    load_metadata(path)?;
    let entries = load_snapshot_file(path.join(VARIABLES_FILE))?;

    let mut stats = RestoreStats::default();
    let targets: Vec<_> = store
        .iter()
        .map(|(id, var)| (id, var.name.clone(), var.group, var.shape.clone()))
        .collect();

    for (id, name, group, shape) in targets {
        if exclude.contains(&group) {
            stats.excluded += 1;
            continue;
        }
        let Some(entry) = entries.iter().find(|e| e.name == name) else {
            log::warn!("Variable {} not found in snapshot {:?}", name, path);
            stats.missing += 1;
            continue;
        };
        if entry.shape != shape {
            return Err(CompletionError::ShapeMismatch {
                expected: shape,
                got: entry.shape.clone(),
            });
        }
        store.assign_values(id, entry.values.clone())?;
        stats.restored += 1;
    }

    Ok(stats)
}

fn checkpoint_error(message: String) -> CompletionError {
    CompletionError::Checkpoint { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn store(scale: f32) -> VariableStore<TestBackend> {
        let mut store = VariableStore::new(&Default::default());
        store
            .register("layer_0/conv/weights", VariableGroup::Weights, vec![2, 2], vec![scale; 4], true)
            .unwrap();
        store
            .register("head/softmax/weights", VariableGroup::Classifier, vec![2], vec![scale; 2], true)
            .unwrap();
        store
    }

    #[test]
    fn test_save_writes_layout() {
        let temp_dir = TempDir::new().unwrap();
        let saver = Saver::new(temp_dir.path().join("snapshots"), 100);
        let path = saver.save(&store(1.0), 41, 3).unwrap();

        assert!(path.ends_with("snap-41"));
        assert!(path.join("metadata.json").exists());
        assert!(path.join("variables.bin").exists());

        let metadata = load_metadata(&path).unwrap();
        assert_eq!(metadata.global_step, 41);
        assert_eq!(metadata.epoch, 3);
        assert_eq!(metadata.variables.len(), 2);
        assert_eq!(metadata.variables[1].group, VariableGroup::Classifier);
    }

    #[test]
    fn test_restore_with_exclusion() {
        let temp_dir = TempDir::new().unwrap();
        let saver = Saver::new(temp_dir.path(), 100);
        let path = saver.save(&store(2.0), 1, 0).unwrap();

        let mut target = store(0.0);
        let stats = restore(&mut target, &path, &DEFAULT_RESTORE_EXCLUDE).unwrap();

        assert_eq!(
            stats,
            RestoreStats {
                restored: 1,
                excluded: 1,
                missing: 0
            }
        );
        let w = target.find("layer_0/conv/weights").unwrap();
        let head = target.find("head/softmax/weights").unwrap();
        assert_eq!(target.values(w).unwrap(), vec![2.0; 4]);
        assert_eq!(target.values(head).unwrap(), vec![0.0; 2]);
    }

    #[test]
    fn test_restore_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let saver = Saver::new(temp_dir.path(), 100);
        let path = saver.save(&store(2.0), 1, 0).unwrap();

        let mut target = VariableStore::<TestBackend>::new(&Default::default());
        target
            .register("layer_0/conv/weights", VariableGroup::Weights, vec![4], vec![0.0; 4], true)
            .unwrap();
        assert!(matches!(
            restore(&mut target, &path, &[]),
            Err(CompletionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_latest_and_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let saver = Saver::new(temp_dir.path(), 3);
        let store = store(1.0);
        for step in [5, 10, 15, 20, 25] {
            saver.save(&store, step, 0).unwrap();
        }

        let steps: Vec<usize> = saver.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![15, 20, 25]);
        assert!(saver.latest().unwrap().unwrap().ends_with("snap-25"));
    }
}
