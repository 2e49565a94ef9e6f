//! Dataset seam of the training driver.
//!
//! A [`CompletionDataset`] owns a training and a validation iterator and the
//! ground-truth galleries of both splits. Iterators are reset explicitly and
//! report exhaustion with `None`.

mod memory;
pub(crate) mod synthetic;

use burn::prelude::*;

use kpcn_core::PointSet;

pub use memory::{CompletionSample, InMemoryCompletionDataset};
pub use synthetic::SyntheticShapes;

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training split.
    Train,
    /// Validation split.
    Valid,
}

/// One batch of network inputs.
#[derive(Debug, Clone)]
pub struct InputBatch<B: Backend> {
    /// Partial input clouds, `[batch, points, 3]`.
    pub points: Tensor<B, 3>,
    /// Ground-truth complete clouds stacked along the first axis, `[batch * points, 3]`.
    pub complete_points: Tensor<B, 2>,
    /// Dataset index of each object in the batch.
    pub object_inds: Vec<usize>,
    /// Optional target labels (per object or per point, depending on the task).
    pub labels: Option<Vec<usize>>,
    /// Optional group of each label (object category or cloud index).
    pub groups: Option<Vec<usize>>,
}

impl<B: Backend> InputBatch<B> {
    /// Number of objects in the batch.
    pub fn batch_size(&self) -> usize {
        self.points.dims()[0]
    }

    /// Raw inputs as named flat tensors, for diagnostics.
    pub fn flat_inputs(&self) -> Vec<(&'static str, Tensor<B, 1>)> {
        let points = self.points.clone();
        let n = points.shape().num_elements();
        let complete = self.complete_points.clone();
        let m = complete.shape().num_elements();
        vec![
            ("points", points.reshape([n])),
            ("complete_points", complete.reshape([m])),
        ]
    }
}

/// Provider of training and validation batches.
pub trait CompletionDataset<B: Backend> {
    /// Re-initialise the training iterator.
    fn reset_train(&mut self);

    /// Next training batch, `None` once the epoch is exhausted.
    fn next_train(&mut self) -> Option<InputBatch<B>>;

    /// Re-initialise the validation iterator.
    fn reset_validation(&mut self);

    /// Next validation batch, `None` once the split is exhausted.
    fn next_validation(&mut self) -> Option<InputBatch<B>>;

    /// Ground-truth complete clouds of a split, indexed by object.
    fn complete_points(&self, split: Split) -> &[PointSet];
}
