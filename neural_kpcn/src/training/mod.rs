//! Training infrastructure for completion networks.
//!
//! This module provides:
//! - `Trainer`: the training loop driver
//! - Momentum optimizer and gradient clipping policy
//! - Coarse prediction metrics
//! - Validation routines per task type
//! - Snapshot save and restore

mod checkpoint;
mod optimizer;
mod results;
mod trainer;
mod validation;

pub use checkpoint::{
    load_metadata, restore, RestoreStats, Saver, SnapshotMetadata, VariableRecord,
    DEFAULT_RESTORE_EXCLUDE,
};
pub use optimizer::{
    apply_step, clip_by_norm, collect_gradients, Gradient, GradientPolicy, MomentumOptimizer,
};
pub use results::{coarse_metrics, CoarseMetrics};
pub use trainer::{
    StopReason, TrainSummary, Trainer, PARAMETERS_FILE, SENTINEL_FILE, TRAINING_LOG,
};
pub use validation::{validate, ValidationReport};
