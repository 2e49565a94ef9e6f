//! # neural_kpcn
//!
//! Training and validation driver for kernel point completion networks,
//! built on Burn.
//!
//! The driver takes a [`CompletionModel`](model::CompletionModel) and a
//! [`CompletionDataset`](data::CompletionDataset) and runs the training loop:
//! momentum updates with per-tensor gradient clipping, periodic snapshots and
//! kernel point exports, learning rate and `alpha` schedules, and one
//! validation pass per epoch.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use neural_kpcn::prelude::*;
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let mut model = ReferenceCompletionNet::<MyBackend>::new(ReferenceNetConfig::new(), &device)?;
//! let samples = SyntheticShapes::new(256, 16).generate(64);
//! let mut dataset = InMemoryCompletionDataset::new(samples[..48].to_vec(), samples[48..].to_vec(), 8, &device)?;
//!
//! let config = TrainerConfig::new("synthetic".into(), "results/run_0".into());
//! let mut trainer = Trainer::new(&mut model, config, None)?;
//! let summary = trainer.train(&mut model, &mut dataset, false)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! kpcn_core (matching, confusion)
//!     │
//!     ├──────────────────┐
//!     ▼                  ▼
//! kpcn_io            neural_kpcn
//! (ply, npy,         (metrics, trainer,
//!  snapshots)         validation, export)
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod metrics;
pub mod model;
pub mod training;
pub mod variables;

mod host;

pub use config::{NetworkModel, OffsetPolicy, ReferenceNetConfig, TrainerConfig};
pub use error::{CompletionError, NumericFailure, Result};
pub use training::{TrainSummary, Trainer};

pub use kpcn_core::{Point3, PointSet};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{NetworkModel, OffsetPolicy, ReferenceNetConfig, TrainerConfig};
    pub use crate::data::{
        CompletionDataset, CompletionSample, InMemoryCompletionDataset, InputBatch, Split,
        SyntheticShapes,
    };
    pub use crate::error::{CompletionError, NumericFailure, Result};
    pub use crate::export::{save_kernel_points, ExportStats};
    pub use crate::metrics::{
        chamfer, earth_mover, minimal_matching_distance, nn_distance, MatchingResult,
    };
    pub use crate::model::{CompletionModel, ModelOutput, ReferenceCompletionNet};
    pub use crate::training::{
        restore, validate, GradientPolicy, MomentumOptimizer, Saver, StopReason, TrainSummary,
        Trainer, ValidationReport,
    };
    pub use crate::variables::{VariableGroup, VariableId, VariableStore};

    pub use kpcn_core::{Point3, PointSet};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_public_api() {
        let _config = TrainerConfig::new("synthetic".into(), "out".into());
        let _net_config = ReferenceNetConfig::default();
        assert_eq!("completion".parse::<NetworkModel>().unwrap(), NetworkModel::Completion);
    }

    #[test]
    fn test_model_creation() {
        let device = Default::default();
        let model = ReferenceCompletionNet::<TestBackend>::new(ReferenceNetConfig::new(), &device).unwrap();
        assert!(!model.variables().is_empty());
        assert!(model.variables().find("alpha").is_some());
    }
}
