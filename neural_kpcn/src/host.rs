//! Host-side reads of tensor data.

use burn::prelude::*;

use crate::error::{CompletionError, Result};

/// Copy a tensor's values to a host vector.
pub(crate) fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| CompletionError::Data(format!("{:?}", e)))
}

/// Read a single-element tensor.
pub(crate) fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32> {
    values(tensor)?
        .first()
        .copied()
        .ok_or_else(|| CompletionError::Data("empty scalar tensor".into()))
}

/// Copy an integer tensor's values to a host vector.
pub(crate) fn indices<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<usize>> {
    let data = tensor.into_data().convert::<i64>();
    let raw = data
        .to_vec::<i64>()
        .map_err(|e| CompletionError::Data(format!("{:?}", e)))?;
    Ok(raw.into_iter().map(|v| v.max(0) as usize).collect())
}
