//! # kpcn_core
//!
//! Pure point-set algorithms for kernel point completion training.
//!
//! This crate has no tensor framework dependency. It holds the pieces of the
//! training pipeline that are plain arithmetic on host buffers:
//!
//! - [`types`]: `Point3` and `PointSet`
//! - [`matching`]: approximate bipartite matching and match cost, the
//!   building blocks of the Earth Mover distance
//! - [`confusion`]: confusion matrices, accuracy and IoU scores used by the
//!   label validation routines
//! - [`error`]: error types
//!
//! ## Usage
//!
//! ```
//! use kpcn_core::{approx_match, match_cost};
//!
//! let p = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0];
//! let plan = approx_match(2, 2, &p, &p).unwrap();
//! let cost = match_cost(2, 2, &p, &p, &plan).unwrap();
//! assert!(cost < 1e-3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod confusion;
pub mod error;
pub mod matching;
pub mod types;

pub use confusion::ConfusionMatrix;
pub use error::{CoreError, Result};
pub use matching::{approx_match, approx_match_batch, match_cost};
pub use types::{Point3, PointSet};
