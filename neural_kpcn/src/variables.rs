//! Named model variables with typed groups.
//!
//! The [`VariableStore`] is the explicit context object holding every variable
//! of a model. Models register their variables once, at construction, under a
//! scope path and a [`VariableGroup`]. Everything downstream (gradient policy,
//! restore exclusion, kernel export) selects variables by group.

use std::fmt;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{CompletionError, Result};
use crate::host;

/// Root scope of all network variables.
pub const ROOT_SCOPE: &str = "KernelPointNetwork";

/// Handle to a variable inside a [`VariableStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

impl VariableId {
    /// Registration index of the variable.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Logical group of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableGroup {
    /// Kernel point positions of a point convolution.
    KernelPoints,
    /// Convolution weights.
    Weights,
    /// Parameters of a deformable offset convolution.
    OffsetConv,
    /// Parameters of a deformable offset MLP.
    OffsetMlp,
    /// Classifier (softmax) head.
    Classifier,
    /// Unary convolution of the head.
    HeadUnary,
    /// Fully connected layers.
    FullyConnected,
    /// Batch normalization statistics.
    BatchNorm,
    /// Anything else.
    Other,
}

impl VariableGroup {
    /// Groups receiving scaled gradients.
    pub fn is_offset(self) -> bool {
        matches!(self, VariableGroup::OffsetConv | VariableGroup::OffsetMlp)
    }
}

/// A named variable.
#[derive(Debug, Clone)]
pub struct Variable<B: Backend> {
    /// Full scope path, starting with the root scope.
    pub name: String,
    /// Group of the variable.
    pub group: VariableGroup,
    /// Logical shape.
    pub shape: Vec<usize>,
    /// Whether the optimizer updates this variable.
    pub trainable: bool,
    value: Tensor<B, 1>,
}

impl<B: Backend> Variable<B> {
    /// Flat value of the variable.
    pub fn value(&self) -> &Tensor<B, 1> {
        &self.value
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Scope components between the root scope and the leaf name, joined
    /// with `_`.
    ///
    /// `KernelPointNetwork/layer_0/conv/weights` gives `layer_0_conv`.
    pub fn export_stem(&self) -> String {
        let parts: Vec<&str> = self.name.split('/').collect();
        if parts.len() <= 2 {
            return String::new();
        }
        parts[1..parts.len() - 1].join("_")
    }

    /// Scope path relative to the root, e.g. `layer_0/conv/weights`.
    pub fn relative_name(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.name)
    }
}

/// Store of all variables of a model.
#[derive(Debug, Clone)]
pub struct VariableStore<B: Backend> {
    root: String,
    variables: Vec<Variable<B>>,
    device: B::Device,
}

impl<B: Backend> VariableStore<B> {
    /// Create an empty store under [`ROOT_SCOPE`].
    pub fn new(device: &B::Device) -> Self {
        Self::with_root(ROOT_SCOPE, device)
    }

    /// Create an empty store under a custom root scope.
    pub fn with_root(root: impl Into<String>, device: &B::Device) -> Self {
        Self {
            root: root.into(),
            variables: Vec::new(),
            device: device.clone(),
        }
    }

    /// Root scope name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Device the variables live on.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Register a variable under `scope` (relative to the root).
    pub fn register(
        &mut self,
        scope: &str,
        group: VariableGroup,
        shape: Vec<usize>,
        values: Vec<f32>,
        trainable: bool,
    ) -> Result<VariableId> {
        let name = format!("{}/{}", self.root, scope);
        if self.find(&name).is_some() {
            return Err(CompletionError::config(format!(
                "variable {} registered twice",
                name
            )));
        }
        let count: usize = shape.iter().product();
        if count != values.len() {
            return Err(CompletionError::ShapeMismatch {
                expected: shape,
                got: vec![values.len()],
            });
        }

        let value = Tensor::from_data(TensorData::new(values, [count]), &self.device);
        let value = if trainable { value.require_grad() } else { value };

        self.variables.push(Variable {
            name,
            group,
            shape,
            trainable,
            value,
        });
        Ok(VariableId(self.variables.len() - 1))
    }

    /// Get a variable by handle.
    pub fn get(&self, id: VariableId) -> &Variable<B> {
        &self.variables[id.0]
    }

    /// Find a variable by full or root-relative name.
    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.variables
            .iter()
            .position(|v| v.name == name || v.relative_name() == name)
            .map(VariableId)
    }

    /// Iterate all variables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable<B>)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VariableId(i), v))
    }

    /// Iterate variables of one group.
    pub fn in_group(&self, group: VariableGroup) -> impl Iterator<Item = (VariableId, &Variable<B>)> {
        self.iter().filter(move |(_, v)| v.group == group)
    }

    /// Iterate trainable variables.
    pub fn trainable(&self) -> impl Iterator<Item = (VariableId, &Variable<B>)> {
        self.iter().filter(|(_, v)| v.trainable)
    }

    /// Value of a variable reshaped to its logical shape.
    pub fn tensor<const D: usize>(&self, id: VariableId) -> Result<Tensor<B, D>> {
        let var = self.get(id);
        let dims: [usize; D] = var.shape.as_slice().try_into().map_err(|_| {
            CompletionError::ShapeMismatch {
                expected: var.shape.clone(),
                got: vec![D],
            }
        })?;
        Ok(var.value.clone().reshape(dims))
    }

    /// Replace a variable's value.
    pub fn assign(&mut self, id: VariableId, value: Tensor<B, 1>) -> Result<()> {
        let var = &mut self.variables[id.0];
        let [count] = value.dims();
        if count != var.num_elements() {
            return Err(CompletionError::ShapeMismatch {
                expected: var.shape.clone(),
                got: vec![count],
            });
        }
        var.value = if var.trainable {
            value.detach().require_grad()
        } else {
            value.detach()
        };
        Ok(())
    }

    /// Replace a variable's value from host data.
    pub fn assign_values(&mut self, id: VariableId, values: Vec<f32>) -> Result<()> {
        let count = values.len();
        let value = Tensor::from_data(TensorData::new(values, [count]), &self.device);
        self.assign(id, value)
    }

    /// Copy a variable's values to the host.
    pub fn values(&self, id: VariableId) -> Result<Vec<f32>> {
        host::values(self.get(id).value.clone())
    }

    /// Names of variables holding NaN or infinite values.
    pub fn non_finite(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (id, var) in self.iter() {
            if self.values(id)?.iter().any(|v| !v.is_finite()) {
                names.push(var.name.clone());
            }
        }
        Ok(names)
    }
}

impl<B: AutodiffBackend> VariableStore<B> {
    /// Value of a variable on the inner backend, outside of any graph.
    pub fn inner(&self, id: VariableId) -> Tensor<B::InnerBackend, 1> {
        self.get(id).value.clone().inner()
    }

    /// Replace a variable's value from an inner backend tensor.
    pub fn assign_inner(&mut self, id: VariableId, value: Tensor<B::InnerBackend, 1>) -> Result<()> {
        self.assign(id, Tensor::from_inner(value))
    }

    /// Gradients of all trainable variables that took part in the graph.
    pub fn gradients(&self, grads: &B::Gradients) -> Vec<(VariableId, Tensor<B::InnerBackend, 1>)> {
        self.trainable()
            .filter_map(|(id, var)| var.value.grad(grads).map(|g| (id, g)))
            .collect()
    }
}

impl fmt::Display for VariableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableGroup::KernelPoints => "kernel_points",
            VariableGroup::Weights => "weights",
            VariableGroup::OffsetConv => "offset_conv",
            VariableGroup::OffsetMlp => "offset_mlp",
            VariableGroup::Classifier => "classifier",
            VariableGroup::HeadUnary => "head_unary",
            VariableGroup::FullyConnected => "fully_connected",
            VariableGroup::BatchNorm => "batch_norm",
            VariableGroup::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    fn store() -> VariableStore<TestBackend> {
        VariableStore::new(&Default::default())
    }

    #[test]
    fn test_register_and_reshape() {
        let mut store = store();
        let id = store
            .register(
                "layer_0/conv/weights",
                VariableGroup::Weights,
                vec![2, 3],
                (0..6).map(|v| v as f32).collect(),
                true,
            )
            .unwrap();

        let var = store.get(id);
        assert_eq!(var.name, "KernelPointNetwork/layer_0/conv/weights");
        assert_eq!(var.relative_name(), "layer_0/conv/weights");
        assert_eq!(var.export_stem(), "layer_0_conv");

        let t = store.tensor::<2>(id).unwrap();
        assert_eq!(t.dims(), [2, 3]);
        assert!(store.tensor::<3>(id).is_err());
    }

    #[test]
    fn test_duplicate_and_size_checks() {
        let mut store = store();
        store
            .register("a", VariableGroup::Other, vec![2], vec![0.0; 2], false)
            .unwrap();
        assert!(store
            .register("a", VariableGroup::Other, vec![2], vec![0.0; 2], false)
            .is_err());
        assert!(matches!(
            store.register("b", VariableGroup::Other, vec![3], vec![0.0; 2], false),
            Err(CompletionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_group_selection() {
        let mut store = store();
        store
            .register("conv/offset_conv/weights", VariableGroup::OffsetConv, vec![1], vec![0.0], true)
            .unwrap();
        store
            .register("conv/kernel_points", VariableGroup::KernelPoints, vec![1, 3], vec![0.0; 3], false)
            .unwrap();
        assert_eq!(store.in_group(VariableGroup::OffsetConv).count(), 1);
        assert_eq!(store.trainable().count(), 1);
        assert!(VariableGroup::OffsetMlp.is_offset());
        assert!(!VariableGroup::Weights.is_offset());
    }

    #[test]
    fn test_assign_and_non_finite() {
        let mut store = store();
        let id = store
            .register("bias", VariableGroup::Other, vec![2], vec![0.0; 2], false)
            .unwrap();
        store.assign_values(id, vec![1.0, f32::NAN]).unwrap();
        assert_eq!(store.non_finite().unwrap(), vec!["KernelPointNetwork/bias".to_string()]);
        assert!(store.assign_values(id, vec![1.0]).is_err());
    }

    #[test]
    fn test_gradients_of_trainable_variables() {
        type Ad = Autodiff<NdArray>;
        let mut store = VariableStore::<Ad>::new(&Default::default());
        let w = store
            .register("w", VariableGroup::Weights, vec![2], vec![1.0, 2.0], true)
            .unwrap();
        store
            .register("frozen", VariableGroup::BatchNorm, vec![2], vec![1.0, 1.0], false)
            .unwrap();

        let loss = (store.tensor::<1>(w).unwrap() * 3.0).sum();
        let grads = loss.backward();
        let gradients = store.gradients(&grads);

        assert_eq!(gradients.len(), 1);
        assert_eq!(gradients[0].0, w);
        let g = host::values(gradients[0].1.clone()).unwrap();
        assert_eq!(g, vec![3.0, 3.0]);
    }
}
