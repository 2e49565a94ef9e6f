//! Export of learned kernel geometry and weights.
//!
//! Kernel point variables are written as PLY clouds and convolution weights
//! as NPY arrays, one directory per epoch, for offline inspection.

mod kernel_points;

pub use kernel_points::{kernel_points_dir, save_kernel_points, ExportStats};
