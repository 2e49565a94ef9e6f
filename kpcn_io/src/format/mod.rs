//! Snapshot file format support.
//!
//! Snapshots store the named variables of a model as raw little-endian f32
//! data, each with its shape. The accompanying metadata (step, epoch, groups)
//! is written by the training crate.

pub mod header;
pub mod snapshot;

pub use header::{SnapshotHeader, HEADER_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use snapshot::{
    load_snapshot_file, read_snapshot, save_snapshot_file, write_snapshot, SnapshotEntry,
};
