//! Monitoring metrics on the coarse prediction.

use burn::prelude::*;

use crate::error::{CompletionError, Result};
use crate::host;
use crate::metrics::{chamfer, earth_mover};

/// Earth Mover and Chamfer distance of the coarse prediction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoarseMetrics {
    /// Coarse Earth Mover distance.
    pub earth_mover: f32,
    /// Coarse Chamfer distance.
    pub chamfer: f32,
}

/// Compare the coarse prediction against the ground truth.
///
/// `complete_points` holds the stacked ground-truth clouds `[total, 3]` and is
/// regrouped into clouds of the coarse point count.
pub fn coarse_metrics<B: Backend>(
    coarse: Tensor<B, 3>,
    complete_points: Tensor<B, 2>,
) -> Result<CoarseMetrics> {
    let [_, coarse_n, _] = coarse.dims();
    let [total, channels] = complete_points.dims();
    if channels != 3 || coarse_n == 0 || total % coarse_n != 0 {
        return Err(CompletionError::ShapeMismatch {
            expected: vec![coarse_n, 3],
            got: vec![total, channels],
        });
    }
    let ground_truth = complete_points.reshape([total / coarse_n, coarse_n, 3]);

    let earth_mover = host::scalar(earth_mover(coarse.clone(), ground_truth.clone())?)?;
    let chamfer = host::scalar(chamfer(coarse, ground_truth))?;
    Ok(CoarseMetrics {
        earth_mover,
        chamfer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_exact_prediction_scores_zero() {
        let device = Default::default();
        let values: Vec<f32> = (0..2 * 4 * 3).map(|v| (v as f32 * 0.37).sin()).collect();
        let coarse = Tensor::<TestBackend, 3>::from_data(TensorData::new(values.clone(), [2, 4, 3]), &device);
        let complete = Tensor::<TestBackend, 2>::from_data(TensorData::new(values, [8, 3]), &device);

        let metrics = coarse_metrics(coarse, complete).unwrap();
        assert!(metrics.chamfer.abs() < 1e-5);
        assert!(metrics.earth_mover.abs() < 1e-2);
    }

    #[test]
    fn test_rejects_indivisible_ground_truth() {
        let device = Default::default();
        let coarse = Tensor::<TestBackend, 3>::zeros([1, 4, 3], &device);
        let complete = Tensor::<TestBackend, 2>::zeros([6, 3], &device);
        assert!(matches!(
            coarse_metrics(coarse, complete),
            Err(CompletionError::ShapeMismatch { .. })
        ));
    }
}
