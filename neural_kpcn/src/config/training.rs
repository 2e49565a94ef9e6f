//! Trainer configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::CompletionError;

/// Task type of the trained network. Selects the validation routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkModel {
    /// One label per object.
    Classification,
    /// One label per point, single object category.
    Segmentation,
    /// One label per point, several object categories.
    MultiSegmentation,
    /// One label per point of large scene clouds.
    CloudSegmentation,
    /// Point cloud completion.
    Completion,
}

impl NetworkModel {
    /// All known task types.
    pub const ALL: [NetworkModel; 5] = [
        NetworkModel::Classification,
        NetworkModel::Segmentation,
        NetworkModel::MultiSegmentation,
        NetworkModel::CloudSegmentation,
        NetworkModel::Completion,
    ];

    /// Name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkModel::Classification => "classification",
            NetworkModel::Segmentation => "segmentation",
            NetworkModel::MultiSegmentation => "multi_segmentation",
            NetworkModel::CloudSegmentation => "cloud_segmentation",
            NetworkModel::Completion => "completion",
        }
    }
}

impl fmt::Display for NetworkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkModel {
    type Err = CompletionError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        NetworkModel::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                CompletionError::config(format!(
                    "no validation method implemented for network type '{}'",
                    s
                ))
            })
    }
}

/// How gradients of deformable offset parameters are entered into the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Each offset parameter receives one scaled gradient.
    #[default]
    Exclusive,
    /// Offset convolution parameters receive the scaled gradient followed by
    /// an unscaled copy, as older training runs did.
    LegacyDuplicate,
}

/// Configuration for the training driver.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Name of the dataset. Datasets starting with `ShapeNetPart` or
    /// `ModelNet` are truncated to `epoch_steps` batches per epoch.
    pub dataset: String,

    /// Directory receiving logs, snapshots and kernel exports.
    pub saving_path: String,

    /// Initial learning rate.
    #[config(default = 1e-2)]
    pub learning_rate: f64,

    /// Momentum of the optimizer.
    #[config(default = 0.98)]
    pub momentum: f64,

    /// Per-tensor gradient norm clip (<= 0 disables scaling and clipping).
    #[config(default = 100.0)]
    pub grad_clip_norm: f64,

    /// Factor applied to gradients of deformable offset parameters.
    #[config(default = 0.1)]
    pub offset_gradient_scale: f64,

    /// Offset gradient policy.
    #[config(default = "OffsetPolicy::Exclusive")]
    pub offset_policy: OffsetPolicy,

    /// Whether logs, snapshots and kernel exports are written.
    #[config(default = true)]
    pub saving: bool,

    /// Number of epochs to train.
    #[config(default = 500)]
    pub max_epoch: usize,

    /// Snapshot every `snapshot_gap` epochs.
    #[config(default = 50)]
    pub snapshot_gap: usize,

    /// Maximum number of snapshots kept on disk.
    #[config(default = 100)]
    pub max_snapshots: usize,

    /// Multiplicative learning rate decay, keyed by epoch.
    #[config(default = "BTreeMap::new()")]
    pub lr_decays: BTreeMap<usize, f64>,

    /// Alpha values assigned to the model, keyed by epoch.
    #[config(default = "BTreeMap::new()")]
    pub alpha_schedule: BTreeMap<usize, f32>,

    /// Steps per epoch. Updated by the trainer with the running average.
    pub epoch_steps: Option<usize>,

    /// Task type of the network.
    #[config(default = "NetworkModel::Completion")]
    pub network_model: NetworkModel,

    /// Expected number of validation samples, used for progress display.
    #[config(default = 50)]
    pub validation_size: usize,

    /// Number of classes for label tasks.
    #[config(default = 0)]
    pub num_classes: usize,
}

impl TrainerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(CompletionError::config("learning_rate must be positive"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(CompletionError::config("momentum must be in [0, 1)"));
        }
        if self.snapshot_gap == 0 {
            return Err(CompletionError::config("snapshot_gap must be at least 1"));
        }
        if self.max_epoch == 0 {
            return Err(CompletionError::config("max_epoch must be at least 1"));
        }
        if self.validation_size == 0 {
            return Err(CompletionError::config("validation_size must be positive"));
        }
        if self.max_snapshots == 0 {
            return Err(CompletionError::config("max_snapshots must be at least 1"));
        }
        if self.network_model != NetworkModel::Completion && self.num_classes == 0 {
            return Err(CompletionError::config(format!(
                "{} requires num_classes > 0",
                self.network_model
            )));
        }
        Ok(())
    }

    /// Per-epoch decay reaching `factor` after `epochs` epochs.
    ///
    /// Fills `lr_decays` with `factor^(1/epochs)` for epochs `1..max_epoch`.
    pub fn with_exponential_decay(mut self, factor: f64, epochs: usize) -> Self {
        let per_epoch = factor.powf(1.0 / epochs.max(1) as f64);
        self.lr_decays = (1..self.max_epoch).map(|e| (e, per_epoch)).collect();
        self
    }

    /// Whether this dataset is truncated to `epoch_steps` batches per epoch.
    pub fn truncates_epochs(&self) -> bool {
        self.dataset.starts_with("ShapeNetPart") || self.dataset.starts_with("ModelNet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TrainerConfig {
        TrainerConfig::new("ShapeNetV1".into(), "results".into())
    }

    #[test]
    fn test_defaults_validate() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.offset_policy, OffsetPolicy::Exclusive);
        assert_eq!(config.network_model, NetworkModel::Completion);
        assert!(config.epoch_steps.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(base().with_momentum(1.0).validate().is_err());
        assert!(base().with_snapshot_gap(0).validate().is_err());
        assert!(base().with_learning_rate(0.0).validate().is_err());
        assert!(base()
            .with_network_model(NetworkModel::Segmentation)
            .validate()
            .is_err());
    }

    #[test]
    fn test_network_model_parse() {
        for model in NetworkModel::ALL {
            assert_eq!(model.as_str().parse::<NetworkModel>().unwrap(), model);
        }
        assert!(matches!(
            "regression".parse::<NetworkModel>(),
            Err(CompletionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_truncation_families() {
        assert!(TrainerConfig::new("ModelNet40".into(), "r".into()).truncates_epochs());
        assert!(TrainerConfig::new("ShapeNetPart".into(), "r".into()).truncates_epochs());
        assert!(!base().truncates_epochs());
    }

    #[test]
    fn test_exponential_decay() {
        let config = base().with_max_epoch(4).with_exponential_decay(0.1, 100);
        assert_eq!(config.lr_decays.len(), 3);
        let total: f64 = (0..100).map(|_| config.lr_decays[&1]).product();
        assert!((total - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_json_round_trip() {
        let mut decays = BTreeMap::new();
        decays.insert(5, 0.5);
        let config = base()
            .with_lr_decays(decays)
            .with_epoch_steps(Some(12))
            .with_offset_policy(OffsetPolicy::LegacyDuplicate);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        config.save(&path).unwrap();
        let loaded = TrainerConfig::load(&path).unwrap();

        assert_eq!(loaded.lr_decays.get(&5), Some(&0.5));
        assert_eq!(loaded.epoch_steps, Some(12));
        assert_eq!(loaded.offset_policy, OffsetPolicy::LegacyDuplicate);
    }
}
