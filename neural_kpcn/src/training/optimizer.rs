//! Momentum optimizer and gradient post-processing.

use std::collections::HashMap;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::config::{OffsetPolicy, TrainerConfig};
use crate::error::Result;
use crate::host;
use crate::model::VariableUpdate;
use crate::variables::{VariableGroup, VariableId, VariableStore};

/// Gradient of one variable.
#[derive(Debug, Clone)]
pub struct Gradient<B: Backend> {
    /// Variable the gradient belongs to.
    pub id: VariableId,
    /// Group of that variable.
    pub group: VariableGroup,
    /// Flat gradient values.
    pub value: Tensor<B, 1>,
}

/// Momentum optimizer: `accum = momentum * accum + grad; var -= lr * accum`.
///
/// The learning rate is plain state and can be changed between steps.
#[derive(Debug)]
pub struct MomentumOptimizer<B: Backend> {
    learning_rate: f64,
    momentum: f64,
    accumulators: HashMap<VariableId, Tensor<B, 1>>,
}

impl<B: Backend> MomentumOptimizer<B> {
    /// Create an optimizer.
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            accumulators: HashMap::new(),
        }
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Replace the learning rate.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Multiply the learning rate by `factor`.
    pub fn decay(&mut self, factor: f64) {
        self.learning_rate *= factor;
    }

    /// Momentum factor.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Update one parameter tensor and return its new value.
    pub fn step(&mut self, id: VariableId, param: Tensor<B, 1>, grad: Tensor<B, 1>) -> Tensor<B, 1> {
        let accum = match self.accumulators.remove(&id) {
            Some(accum) => accum * self.momentum as f32 + grad,
            None => grad,
        };
        let updated = param - accum.clone() * self.learning_rate as f32;
        self.accumulators.insert(id, accum);
        updated
    }

    /// Drop all accumulators.
    pub fn reset(&mut self) {
        self.accumulators.clear();
    }
}

/// Scale offset gradients and clip every gradient by its own norm.
#[derive(Debug, Clone, Copy)]
pub struct GradientPolicy {
    clip_norm: f64,
    offset_scale: f64,
    offset_policy: OffsetPolicy,
}

impl GradientPolicy {
    /// Create a policy.
    pub fn new(clip_norm: f64, offset_scale: f64, offset_policy: OffsetPolicy) -> Self {
        if offset_policy == OffsetPolicy::LegacyDuplicate {
            log::warn!(
                "legacy offset gradient policy: offset_conv variables receive a scaled and an unscaled gradient"
            );
        }
        Self {
            clip_norm,
            offset_scale,
            offset_policy,
        }
    }

    /// Policy from the trainer configuration.
    pub fn from_config(config: &TrainerConfig) -> Self {
        Self::new(
            config.grad_clip_norm,
            config.offset_gradient_scale,
            config.offset_policy,
        )
    }

    /// Turn raw gradients into the list of updates to apply, in order.
    ///
    /// With a non-positive clip norm the raw gradients are returned untouched.
    pub fn process<B: Backend>(&self, grads: Vec<Gradient<B>>) -> Result<Vec<Gradient<B>>> {
        if self.clip_norm <= 0.0 {
            return Ok(grads);
        }

        let mut scaled = Vec::with_capacity(grads.len());
        for grad in grads {
            let offset_entry = |g: &Gradient<B>| Gradient {
                id: g.id,
                group: g.group,
                value: g.value.clone() * self.offset_scale as f32,
            };
            match (self.offset_policy, grad.group) {
                (_, VariableGroup::OffsetMlp) => scaled.push(offset_entry(&grad)),
                (OffsetPolicy::Exclusive, VariableGroup::OffsetConv) => {
                    scaled.push(offset_entry(&grad))
                }
                (OffsetPolicy::LegacyDuplicate, VariableGroup::OffsetConv) => {
                    scaled.push(offset_entry(&grad));
                    scaled.push(grad);
                }
                _ => scaled.push(grad),
            }
        }

        scaled
            .into_iter()
            .map(|g| {
                Ok(Gradient {
                    value: clip_by_norm(g.value, self.clip_norm as f32)?,
                    ..g
                })
            })
            .collect()
    }
}

/// Scale a tensor down so its L2 norm is at most `max_norm`.
pub fn clip_by_norm<B: Backend>(grad: Tensor<B, 1>, max_norm: f32) -> Result<Tensor<B, 1>> {
    let norm = host::scalar((grad.clone() * grad.clone()).sum())?.sqrt();
    if norm > max_norm {
        Ok(grad * (max_norm / norm))
    } else {
        Ok(grad)
    }
}

/// Apply pending variable updates, then the gradients.
///
/// Updates run first so moving statistics computed in the forward pass are in
/// place before any parameter moves.
pub fn apply_step<B: AutodiffBackend>(
    optimizer: &mut MomentumOptimizer<B::InnerBackend>,
    store: &mut VariableStore<B>,
    updates: Vec<VariableUpdate<B::InnerBackend>>,
    grads: Vec<Gradient<B::InnerBackend>>,
) -> Result<()> {
    for update in updates {
        store.assign_inner(update.id, update.value)?;
    }
    for grad in grads {
        let param = store.inner(grad.id);
        let updated = optimizer.step(grad.id, param, grad.value);
        store.assign_inner(grad.id, updated)?;
    }
    Ok(())
}

/// Raw gradients of all trainable variables, tagged with their group.
pub fn collect_gradients<B: AutodiffBackend>(
    store: &VariableStore<B>,
    grads: &B::Gradients,
) -> Vec<Gradient<B::InnerBackend>> {
    store
        .gradients(grads)
        .into_iter()
        .map(|(id, value)| Gradient {
            id,
            group: store.get(id).group,
            value,
        })
        .collect()
}
