//! Model seam of the training driver.
//!
//! The driver never looks inside a network. It only needs the variables, one
//! forward pass producing losses and a coarse prediction, and the `alpha`
//! blending hyperparameter.

mod reference;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::data::InputBatch;
use crate::error::Result;
use crate::host;
use crate::variables::{VariableId, VariableStore};

pub use reference::ReferenceCompletionNet;

/// Pending non-gradient assignment to a variable (e.g. moving statistics).
#[derive(Debug, Clone)]
pub struct VariableUpdate<B: Backend> {
    /// Target variable.
    pub id: VariableId,
    /// New flat value.
    pub value: Tensor<B, 1>,
}

/// Label predictions used by the label validation routines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelPredictions {
    /// Predicted labels.
    pub predicted: Vec<usize>,
    /// Target labels.
    pub targets: Vec<usize>,
    /// Group of each label (object category or cloud index).
    pub groups: Option<Vec<usize>>,
}

/// Output of one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: AutodiffBackend> {
    /// Total loss.
    pub loss: Tensor<B, 1>,
    /// Task loss.
    pub output_loss: Tensor<B, 1>,
    /// Weight regularization loss.
    pub regularization_loss: Tensor<B, 1>,
    /// Kernel offset loss.
    pub point_loss: Tensor<B, 1>,
    /// Coarse prediction, `[batch, coarse_points, 3]`.
    pub coarse: Tensor<B, 3>,
    /// Label predictions, for models with a label head.
    pub labels: Option<LabelPredictions>,
    /// Assignments to apply before the gradient step.
    pub updates: Vec<VariableUpdate<B::InnerBackend>>,
}

/// A point cloud completion network driven by the trainer.
pub trait CompletionModel<B: AutodiffBackend> {
    /// All variables of the network.
    fn variables(&self) -> &VariableStore<B>;

    /// Mutable access to the variables, for optimizer steps and restores.
    fn variables_mut(&mut self) -> &mut VariableStore<B>;

    /// Run the network on a batch.
    ///
    /// `keep_prob` is the dropout keep probability (1.0 disables dropout).
    fn forward(&self, batch: &InputBatch<B>, keep_prob: f32) -> Result<ModelOutput<B>>;

    /// Current blending hyperparameter.
    fn alpha(&self) -> Result<f32>;

    /// Assign the blending hyperparameter.
    fn set_alpha(&mut self, alpha: f32) -> Result<()>;

    /// Dump diagnostics after a NaN loss.
    fn debug_nan(&self, batch: &InputBatch<B>, output: &ModelOutput<B>) {
        for (name, loss) in [
            ("output_loss", &output.output_loss),
            ("regularization_loss", &output.regularization_loss),
            ("point_loss", &output.point_loss),
        ] {
            if let Ok(value) = host::scalar(loss.clone()) {
                log::error!("{} = {}", name, value);
            }
        }
        for (name, tensor) in batch.flat_inputs() {
            if let Ok(values) = host::values(tensor) {
                let bad = values.iter().filter(|v| !v.is_finite()).count();
                log::error!("input {}: {} values, {} non-finite", name, values.len(), bad);
            }
        }
        if let Ok(names) = self.variables().non_finite() {
            for name in names {
                log::error!("non-finite variable {}", name);
            }
        }
    }
}
