//! kpcn_io - file formats for kernel point completion training.
//!
//! - [`ply`]: point clouds (`x y z` vertices), used for kernel point exports
//! - [`npy`]: dense f32 arrays, used for kernel weight exports
//! - [`format`]: binary snapshot files holding named model variables
//!
//! # Example
//!
//! ```
//! use kpcn_io::{read_npy, write_npy};
//!
//! let mut buffer = Vec::new();
//! write_npy(&[2, 2], &[1.0, 2.0, 3.0, 4.0], &mut buffer).unwrap();
//! let array = read_npy(&mut buffer.as_slice()).unwrap();
//! assert_eq!(array.shape, vec![2, 2]);
//! ```

pub mod error;
pub mod format;
pub mod npy;
pub mod ply;

pub use kpcn_core::{Point3, PointSet};

pub use error::{KpcnIoError, Result};
pub use format::{load_snapshot_file, save_snapshot_file, SnapshotEntry};
pub use npy::{load_npy, read_npy, save_npy, write_npy, NpyArray};
pub use ply::{load_ply, read_ply, save_ply, write_ply};
