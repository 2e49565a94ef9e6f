//! Point set distances: Chamfer, Earth Mover and minimal matching.
//!
//! All functions take batches shaped `[batch, points, 3]`. Chamfer and Earth
//! Mover stay differentiable with respect to both inputs when run on an
//! autodiff backend.

use burn::prelude::*;

use kpcn_core::{approx_match_batch, PointSet};

use crate::error::{CompletionError, Result};
use crate::host;

/// Nearest neighbour search result in both directions.
#[derive(Debug, Clone)]
pub struct NnDistance<B: Backend> {
    /// Squared distance from each point of the first set to its nearest
    /// neighbour in the second set, `[batch, n]`.
    pub dist1: Tensor<B, 2>,
    /// Index of that nearest neighbour, `[batch, n]`.
    pub idx1: Tensor<B, 2, Int>,
    /// Squared distance from each point of the second set to the first, `[batch, m]`.
    pub dist2: Tensor<B, 2>,
    /// Index of that nearest neighbour, `[batch, m]`.
    pub idx2: Tensor<B, 2, Int>,
}

/// Result of [`minimal_matching_distance`], one entry per batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingResult {
    /// Index of the closest gallery set.
    pub indices: Vec<usize>,
    /// Chamfer distance to that set.
    pub distances: Vec<f32>,
}

impl MatchingResult {
    /// Number of matched predictions.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if no prediction was matched.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Squared distances between all point pairs, `[batch, n, m]`.
pub fn pairwise_squared_distances<B: Backend>(pcd1: Tensor<B, 3>, pcd2: Tensor<B, 3>) -> Tensor<B, 3> {
    let diff = pcd1.unsqueeze_dim::<4>(2) - pcd2.unsqueeze_dim::<4>(1);
    (diff.clone() * diff).sum_dim(3).squeeze::<3>(3)
}

/// Brute-force nearest neighbours between two batched point sets.
pub fn nn_distance<B: Backend>(pcd1: Tensor<B, 3>, pcd2: Tensor<B, 3>) -> NnDistance<B> {
    let d = pairwise_squared_distances(pcd1, pcd2);
    // Reductions stay on the last dim; autodiff min backward only gathers there.
    let dt = d.clone().swap_dims(1, 2);

    NnDistance {
        dist1: d.clone().min_dim(2).squeeze::<2>(2),
        idx1: d.argmin(2).squeeze::<2>(2),
        dist2: dt.clone().min_dim(2).squeeze::<2>(2),
        idx2: dt.argmin(2).squeeze::<2>(2),
    }
}

/// Chamfer distance: mean of the two directional mean nearest-neighbour
/// distances. Point counts may differ.
pub fn chamfer<B: Backend>(pcd1: Tensor<B, 3>, pcd2: Tensor<B, 3>) -> Tensor<B, 1> {
    let nn = nn_distance(pcd1, pcd2);
    let d1 = nn.dist1.sqrt().mean();
    let d2 = nn.dist2.sqrt().mean();
    (d1 + d2).div_scalar(2.0)
}

/// Approximate Earth Mover distance between equally sized point sets.
///
/// The transport plan is computed on the host and treated as a constant; the
/// cost `Σ plan · |p - q|` is divided by the point count and averaged over the
/// batch.
pub fn earth_mover<B: Backend>(pcd1: Tensor<B, 3>, pcd2: Tensor<B, 3>) -> Result<Tensor<B, 1>> {
    let [batch, n, c1] = pcd1.dims();
    let [batch2, m, c2] = pcd2.dims();
    if batch != batch2 || n != m || c1 != 3 || c2 != 3 {
        return Err(CompletionError::ShapeMismatch {
            expected: vec![batch, n, 3],
            got: vec![batch2, m, c2],
        });
    }
    if n == 0 {
        return Err(CompletionError::ShapeMismatch {
            expected: vec![batch, 1, 3],
            got: vec![batch, 0, 3],
        });
    }

    let device = pcd1.device();
    let xyz1 = host::values(pcd1.clone())?;
    let xyz2 = host::values(pcd2.clone())?;
    let plan = approx_match_batch(batch, n, m, &xyz1, &xyz2)?;
    let plan = Tensor::<B, 3>::from_data(TensorData::new(plan, [batch, n, m]), &device);

    let distances = pairwise_squared_distances(pcd1, pcd2).sqrt();
    let cost = (distances * plan).sum_dim(2).sum_dim(1).reshape([batch]);
    Ok(cost.div_scalar(n as f32).mean())
}

/// Find the closest gallery set of each prediction by Chamfer distance.
///
/// Every prediction is compared against every gallery entry. Ties keep the
/// first minimum. Results are in batch order.
pub fn minimal_matching_distance<B: Backend>(
    pcd_fine: Tensor<B, 3>,
    gallery: &[PointSet],
) -> Result<MatchingResult> {
    if gallery.is_empty() {
        return Err(CompletionError::config("minimal matching needs a non-empty gallery"));
    }
    if let Some(k) = gallery.iter().position(PointSet::is_empty) {
        return Err(CompletionError::config(format!("gallery entry {} has no points", k)));
    }

    let device = pcd_fine.device();
    let [batch, n, _] = pcd_fine.dims();
    let references: Vec<Tensor<B, 3>> = gallery
        .iter()
        .map(|set| point_set_tensor(set, &device))
        .collect();

    let mut result = MatchingResult {
        indices: Vec::with_capacity(batch),
        distances: Vec::with_capacity(batch),
    };
    for i in 0..batch {
        let prediction = pcd_fine.clone().slice([i..i + 1, 0..n, 0..3]);

        let mut best: Option<(usize, f32)> = None;
        for (k, reference) in references.iter().enumerate() {
            let d = host::scalar(chamfer(prediction.clone(), reference.clone()))?;
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((k, d));
            }
        }

        let (index, distance) = best.unwrap_or((0, f32::NAN));
        result.indices.push(index);
        result.distances.push(distance);
    }

    Ok(result)
}

/// Tensor `[1, n, 3]` holding one point set.
pub fn point_set_tensor<B: Backend>(set: &PointSet, device: &B::Device) -> Tensor<B, 3> {
    Tensor::from_data(TensorData::new(set.to_flat(), [1, set.len(), 3]), device)
}
