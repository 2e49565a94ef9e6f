//! Reference network configuration.

use burn::config::Config;

/// Configuration for [`ReferenceCompletionNet`](crate::model::ReferenceCompletionNet).
#[derive(Config, Debug)]
pub struct ReferenceNetConfig {
    /// Number of kernel points of the convolution.
    #[config(default = 15)]
    pub num_kernel_points: usize,

    /// Radius of the kernel point disposition.
    #[config(default = 0.5)]
    pub kernel_radius: f32,

    /// Influence extent of each kernel point.
    #[config(default = 0.6)]
    pub kernel_extent: f32,

    /// Output features of the convolution.
    #[config(default = 16)]
    pub feature_dim: usize,

    /// Points in the coarse prediction.
    #[config(default = 16)]
    pub coarse_points: usize,

    /// Number of classes of the optional classifier head (0 = no head).
    #[config(default = 0)]
    pub num_classes: usize,

    /// Initial weight of the coarse Chamfer term.
    #[config(default = 0.0)]
    pub alpha: f32,

    /// L2 weight decay on weight variables.
    #[config(default = 1e-3)]
    pub weight_decay: f32,

    /// Weight of the kernel offset loss.
    #[config(default = 0.1)]
    pub offset_decay: f32,

    /// Momentum of the moving feature mean.
    #[config(default = 0.9)]
    pub batch_norm_momentum: f32,

    /// Scale of the initial weights.
    #[config(default = 0.1)]
    pub init_scale: f32,

    /// Seed of the weight initialisation.
    #[config(default = 42)]
    pub seed: u64,
}

impl Default for ReferenceNetConfig {
    fn default() -> Self {
        Self::new()
    }
}
