//! A small kernel point completion network.
//!
//! One rigid kernel point convolution with deformable offsets encodes the
//! partial cloud into a global feature, which a fully connected decoder maps
//! to the coarse cloud. It runs end to end on a CPU backend in tests.

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Distribution;

use kpcn_core::CoreError;

use super::{CompletionModel, LabelPredictions, ModelOutput, VariableUpdate};
use crate::config::ReferenceNetConfig;
use crate::data::synthetic::fibonacci_sphere;
use crate::data::InputBatch;
use crate::error::{CompletionError, Result};
use crate::host;
use crate::metrics::{chamfer, earth_mover};
use crate::variables::{VariableGroup, VariableId, VariableStore};

/// Reference completion network.
///
/// Loss: `EMD(coarse, gt) + alpha * CD(coarse, gt)` (+ cross-entropy when a
/// classifier head is configured), plus L2 regularization and the offset loss.
#[derive(Debug, Clone)]
pub struct ReferenceCompletionNet<B: AutodiffBackend> {
    store: VariableStore<B>,
    config: ReferenceNetConfig,
    kernel_points: VariableId,
    offsets: VariableId,
    offset_bias: VariableId,
    conv_weights: VariableId,
    moving_mean: VariableId,
    decoder_weights: VariableId,
    decoder_bias: VariableId,
    classifier: Option<VariableId>,
    alpha: VariableId,
}

impl<B: AutodiffBackend> ReferenceCompletionNet<B> {
    /// Build the network and register its variables.
    pub fn new(config: ReferenceNetConfig, device: &B::Device) -> Result<Self> {
        if config.num_kernel_points == 0 || config.feature_dim == 0 || config.coarse_points == 0 {
            return Err(CompletionError::config(
                "reference network dimensions must be positive",
            ));
        }
        if config.kernel_extent <= 0.0 {
            return Err(CompletionError::config("kernel_extent must be positive"));
        }

        let k = config.num_kernel_points;
        let f = config.feature_dim;
        let out = config.coarse_points * 3;

        let mut seed = config.seed;
        let scale = config.init_scale;
        let mut uniform = move |count: usize| -> Vec<f32> {
            (0..count)
                .map(|_| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                    ((seed >> 33) as f32 / (1u64 << 31) as f32 * 2.0 - 1.0) * scale
                })
                .collect()
        };

        let mut store = VariableStore::new(device);

        // One kernel point at the center, the rest on a sphere.
        let mut disposition = vec![0.0f32; 3];
        for p in fibonacci_sphere(k - 1) {
            disposition.extend((p * config.kernel_radius).as_array());
        }

        let kernel_points = store.register(
            "layer_0/conv/kernel_points",
            VariableGroup::KernelPoints,
            vec![k, 3],
            disposition,
            false,
        )?;
        let offsets = store.register(
            "layer_0/conv/offset_conv/offsets",
            VariableGroup::OffsetConv,
            vec![k, 3],
            vec![0.0; k * 3],
            true,
        )?;
        let offset_bias = store.register(
            "layer_0/conv/offset_mlp/bias",
            VariableGroup::OffsetMlp,
            vec![3],
            vec![0.0; 3],
            true,
        )?;
        let conv_weights = store.register(
            "layer_0/conv/weights",
            VariableGroup::Weights,
            vec![k, f],
            uniform(k * f),
            true,
        )?;
        let moving_mean = store.register(
            "layer_0/batch_norm/moving_mean",
            VariableGroup::BatchNorm,
            vec![f],
            vec![0.0; f],
            false,
        )?;
        let decoder_weights = store.register(
            "decoder/fc/weights",
            VariableGroup::FullyConnected,
            vec![f, out],
            uniform(f * out),
            true,
        )?;
        let decoder_bias = store.register(
            "decoder/fc/bias",
            VariableGroup::FullyConnected,
            vec![out],
            uniform(out),
            true,
        )?;
        let classifier = if config.num_classes > 0 {
            Some(store.register(
                "head/softmax/weights",
                VariableGroup::Classifier,
                vec![f, config.num_classes],
                uniform(f * config.num_classes),
                true,
            )?)
        } else {
            None
        };
        let alpha = store.register("alpha", VariableGroup::Other, vec![1], vec![config.alpha], false)?;

        Ok(Self {
            store,
            config,
            kernel_points,
            offsets,
            offset_bias,
            conv_weights,
            moving_mean,
            decoder_weights,
            decoder_bias,
            classifier,
            alpha,
        })
    }

    /// Network configuration.
    pub fn config(&self) -> &ReferenceNetConfig {
        &self.config
    }

    /// Global feature of each partial cloud, `[batch, feature_dim]`.
    fn encode(&self, points: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let [b, n, _] = points.dims();
        let k = self.config.num_kernel_points;
        let f = self.config.feature_dim;

        let centroid = points.clone().mean_dim(1);
        let local = points - centroid;

        let shift = self.store.tensor::<1>(self.offset_bias)?.reshape([1, 3]);
        let kernel = self.store.tensor::<2>(self.kernel_points)?
            + self.store.tensor::<2>(self.offsets)?
            + shift;
        let kernel = kernel.unsqueeze::<3>();

        let diff = local.unsqueeze_dim::<4>(2) - kernel.unsqueeze_dim::<4>(1);
        let dist = (diff.clone() * diff)
            .sum_dim(3)
            .squeeze::<3>(3)
            .add_scalar(1e-12)
            .sqrt();
        let influence = dist
            .div_scalar(-self.config.kernel_extent)
            .add_scalar(1.0)
            .clamp_min(0.0);

        let weights = self.store.tensor::<2>(self.conv_weights)?;
        let features = relu(influence.reshape([b * n, k]).matmul(weights)).reshape([b, n, f]);
        Ok(features.mean_dim(1).reshape([b, f]))
    }

    fn classify(
        &self,
        features: Tensor<B, 2>,
        batch: &InputBatch<B>,
    ) -> Result<Option<(LabelPredictions, Tensor<B, 1>)>> {
        let (Some(classifier), Some(targets)) = (self.classifier, batch.labels.as_ref()) else {
            return Ok(None);
        };
        let [b, _] = features.dims();
        let c = self.config.num_classes;
        if targets.len() != b {
            return Err(CompletionError::ShapeMismatch {
                expected: vec![b],
                got: vec![targets.len()],
            });
        }

        let logits = features.matmul(self.store.tensor::<2>(classifier)?);
        let device = logits.device();
        let predicted = host::indices(logits.clone().argmax(1))?;

        let mut one_hot = vec![0.0f32; b * c];
        for (i, &t) in targets.iter().enumerate() {
            if t >= c {
                return Err(CoreError::LabelOutOfRange {
                    label: t,
                    num_classes: c,
                }
                .into());
            }
            one_hot[i * c + t] = 1.0;
        }
        let one_hot = Tensor::<B, 2>::from_data(TensorData::new(one_hot, [b, c]), &device);
        let cross_entropy = (log_softmax(logits, 1) * one_hot).sum_dim(1).mean().neg();

        let labels = LabelPredictions {
            predicted,
            targets: targets.clone(),
            groups: batch.groups.clone(),
        };
        Ok(Some((labels, cross_entropy)))
    }
}

impl<B: AutodiffBackend> CompletionModel<B> for ReferenceCompletionNet<B> {
    fn variables(&self) -> &VariableStore<B> {
        &self.store
    }

    fn variables_mut(&mut self) -> &mut VariableStore<B> {
        &mut self.store
    }

    fn forward(&self, batch: &InputBatch<B>, keep_prob: f32) -> Result<ModelOutput<B>> {
        let device = batch.points.device();
        let [b, _, _] = batch.points.dims();
        let f = self.config.feature_dim;
        let c = self.config.coarse_points;

        let pooled = self.encode(batch.points.clone())?;

        // Normalise with the moving mean, and queue its update while training.
        let moving = self.store.tensor::<1>(self.moving_mean)?;
        let mut updates = Vec::new();
        if keep_prob < 1.0 {
            let m = self.config.batch_norm_momentum;
            let batch_mean = pooled.clone().inner().mean_dim(0).reshape([f]);
            let value = moving.clone().inner() * m + batch_mean * (1.0 - m);
            updates.push(VariableUpdate {
                id: self.moving_mean,
                value,
            });
        }
        let mut features = pooled - moving.reshape([1, f]);

        if keep_prob < 1.0 {
            let mask = Tensor::<B, 2>::random([b, f], Distribution::Bernoulli(keep_prob as f64), &device);
            features = features * mask / keep_prob;
        }

        let decoded = features.clone().matmul(self.store.tensor::<2>(self.decoder_weights)?)
            + self.store.tensor::<1>(self.decoder_bias)?.reshape([1, c * 3]);
        let centroid = batch.points.clone().mean_dim(1);
        let coarse = decoded.reshape([b, c, 3]) + centroid;

        let [total, _] = batch.complete_points.dims();
        if total % c != 0 || total / c != b {
            return Err(CompletionError::ShapeMismatch {
                expected: vec![b * c, 3],
                got: vec![total, 3],
            });
        }
        let ground_truth = batch.complete_points.clone().reshape([b, c, 3]);

        let alpha = self.store.tensor::<1>(self.alpha)?;
        let mut output_loss = earth_mover(coarse.clone(), ground_truth.clone())?
            + chamfer(coarse.clone(), ground_truth) * alpha;

        let labels = match self.classify(features, batch)? {
            Some((labels, cross_entropy)) => {
                output_loss = output_loss + cross_entropy;
                Some(labels)
            }
            None => None,
        };

        let mut regularization_loss = Tensor::<B, 1>::zeros([1], &device);
        for (_, var) in self.store.trainable() {
            if matches!(
                var.group,
                VariableGroup::Weights | VariableGroup::FullyConnected | VariableGroup::Classifier
            ) {
                let w = var.value().clone();
                regularization_loss = regularization_loss + (w.clone() * w).sum();
            }
        }
        let regularization_loss = regularization_loss * self.config.weight_decay;

        let offsets = self.store.tensor::<2>(self.offsets)?;
        let shift = self.store.tensor::<1>(self.offset_bias)?;
        let point_loss = ((offsets.clone() * offsets).sum_dim(1).mean() + (shift.clone() * shift).sum())
            * self.config.offset_decay;

        let loss = output_loss.clone() + regularization_loss.clone() + point_loss.clone();

        Ok(ModelOutput {
            loss,
            output_loss,
            regularization_loss,
            point_loss,
            coarse,
            labels,
            updates,
        })
    }

    fn alpha(&self) -> Result<f32> {
        host::scalar(self.store.get(self.alpha).value().clone())
    }

    fn set_alpha(&mut self, alpha: f32) -> Result<()> {
        self.store.assign_values(self.alpha, vec![alpha])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CompletionDataset, InMemoryCompletionDataset, SyntheticShapes};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn dataset(batch_size: usize) -> InMemoryCompletionDataset<TestBackend> {
        let shapes = SyntheticShapes::new(32, 16);
        InMemoryCompletionDataset::new(shapes.generate(4), shapes.generate(2), batch_size, &Default::default())
            .unwrap()
    }

    #[test]
    fn test_variable_layout() {
        let net = ReferenceCompletionNet::<TestBackend>::new(ReferenceNetConfig::new(), &Default::default())
            .unwrap();
        let store = net.variables();
        assert_eq!(store.in_group(VariableGroup::KernelPoints).count(), 1);
        assert_eq!(store.in_group(VariableGroup::OffsetConv).count(), 1);
        assert_eq!(store.in_group(VariableGroup::OffsetMlp).count(), 1);
        assert_eq!(store.in_group(VariableGroup::Classifier).count(), 0);
        assert!(store.find("layer_0/conv/weights").is_some());
    }

    #[test]
    fn test_forward_shapes_and_finite_losses() {
        let net = ReferenceCompletionNet::<TestBackend>::new(ReferenceNetConfig::new(), &Default::default())
            .unwrap();
        let mut data = dataset(2);
        let batch = data.next_train().unwrap();

        let output = net.forward(&batch, 0.5).unwrap();
        assert_eq!(output.coarse.dims(), [2, 16, 3]);
        assert_eq!(output.updates.len(), 1);
        assert!(output.labels.is_none());
        for loss in [&output.loss, &output.output_loss, &output.regularization_loss, &output.point_loss] {
            assert!(host::scalar(loss.clone()).unwrap().is_finite());
        }

        let eval = net.forward(&batch, 1.0).unwrap();
        assert!(eval.updates.is_empty());
    }

    #[test]
    fn test_gradients_reach_offsets() {
        let net = ReferenceCompletionNet::<TestBackend>::new(ReferenceNetConfig::new(), &Default::default())
            .unwrap();
        let mut data = dataset(2);
        let batch = data.next_train().unwrap();

        let output = net.forward(&batch, 1.0).unwrap();
        let grads = output.loss.backward();
        let gradients = net.variables().gradients(&grads);

        let groups: Vec<VariableGroup> = gradients.iter().map(|(id, _)| net.variables().get(*id).group).collect();
        assert!(groups.contains(&VariableGroup::OffsetConv));
        assert!(groups.contains(&VariableGroup::Weights));
        assert!(groups.contains(&VariableGroup::FullyConnected));
    }

    #[test]
    fn test_classifier_head() {
        let config = ReferenceNetConfig::new().with_num_classes(2);
        let net = ReferenceCompletionNet::<TestBackend>::new(config, &Default::default()).unwrap();
        let mut data = dataset(4);
        let batch = data.next_train().unwrap();

        let labels = net.forward(&batch, 1.0).unwrap().labels.unwrap();
        assert_eq!(labels.predicted.len(), 4);
        assert_eq!(labels.targets, batch.labels.clone().unwrap());
        assert!(labels.predicted.iter().all(|&p| p < 2));
    }

    #[test]
    fn test_alpha_round_trip() {
        let mut net =
            ReferenceCompletionNet::<TestBackend>::new(ReferenceNetConfig::new(), &Default::default()).unwrap();
        assert_eq!(net.alpha().unwrap(), 0.0);
        net.set_alpha(0.5).unwrap();
        assert_eq!(net.alpha().unwrap(), 0.5);
    }
}
