//! In-memory dataset of partial/complete cloud pairs.

use burn::prelude::*;

use kpcn_core::PointSet;

use super::{CompletionDataset, InputBatch, Split};
use crate::error::{CompletionError, Result};

/// A partial cloud with its complete ground truth.
#[derive(Debug, Clone)]
pub struct CompletionSample {
    /// Observed partial cloud.
    pub partial: PointSet,
    /// Complete ground truth.
    pub complete: PointSet,
    /// Optional object label.
    pub label: Option<usize>,
    /// Optional object category.
    pub group: Option<usize>,
}

impl CompletionSample {
    /// Create an unlabeled sample.
    pub fn new(partial: PointSet, complete: PointSet) -> Self {
        Self {
            partial,
            complete,
            label: None,
            group: None,
        }
    }

    /// Attach an object label.
    pub fn with_label(mut self, label: usize) -> Self {
        self.label = Some(label);
        self
    }

    /// Attach an object category.
    pub fn with_group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }
}

/// Dataset holding all samples in memory, batched in order.
#[derive(Debug)]
pub struct InMemoryCompletionDataset<B: Backend> {
    train: Vec<CompletionSample>,
    valid: Vec<CompletionSample>,
    train_gallery: Vec<PointSet>,
    valid_gallery: Vec<PointSet>,
    batch_size: usize,
    train_cursor: usize,
    valid_cursor: usize,
    device: B::Device,
}

impl<B: Backend> InMemoryCompletionDataset<B> {
    /// Create a dataset. All partial clouds must share one point count, and so
    /// must all complete clouds.
    pub fn new(
        train: Vec<CompletionSample>,
        valid: Vec<CompletionSample>,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(CompletionError::config("batch_size must be positive"));
        }
        let first = train
            .first()
            .ok_or_else(|| CompletionError::config("training split is empty"))?;
        let partial_n = first.partial.len();
        let complete_n = first.complete.len();

        for sample in train.iter().chain(&valid) {
            if sample.partial.len() != partial_n || sample.complete.len() != complete_n {
                return Err(CompletionError::ShapeMismatch {
                    expected: vec![partial_n, complete_n],
                    got: vec![sample.partial.len(), sample.complete.len()],
                });
            }
        }

        let train_gallery = train.iter().map(|s| s.complete.clone()).collect();
        let valid_gallery = valid.iter().map(|s| s.complete.clone()).collect();

        Ok(Self {
            train,
            valid,
            train_gallery,
            valid_gallery,
            batch_size,
            train_cursor: 0,
            valid_cursor: 0,
            device: device.clone(),
        })
    }

    /// Number of batches per training epoch.
    pub fn train_batches(&self) -> usize {
        self.train.len().div_ceil(self.batch_size)
    }

    /// Number of validation samples.
    pub fn validation_len(&self) -> usize {
        self.valid.len()
    }

    fn batch(&self, samples: &[CompletionSample], first_index: usize) -> InputBatch<B> {
        let b = samples.len();
        let partial_n = samples[0].partial.len();
        let complete_n = samples[0].complete.len();

        let points: Vec<f32> = samples.iter().flat_map(|s| s.partial.to_flat()).collect();
        let complete: Vec<f32> = samples.iter().flat_map(|s| s.complete.to_flat()).collect();

        let labels: Option<Vec<usize>> = samples.iter().map(|s| s.label).collect();
        let groups: Option<Vec<usize>> = samples.iter().map(|s| s.group).collect();

        InputBatch {
            points: Tensor::from_data(TensorData::new(points, [b, partial_n, 3]), &self.device),
            complete_points: Tensor::from_data(
                TensorData::new(complete, [b * complete_n, 3]),
                &self.device,
            ),
            object_inds: (first_index..first_index + b).collect(),
            labels,
            groups,
        }
    }
}

impl<B: Backend> CompletionDataset<B> for InMemoryCompletionDataset<B> {
    fn reset_train(&mut self) {
        self.train_cursor = 0;
    }

    fn next_train(&mut self) -> Option<InputBatch<B>> {
        if self.train_cursor >= self.train.len() {
            return None;
        }
        let start = self.train_cursor;
        let end = (start + self.batch_size).min(self.train.len());
        self.train_cursor = end;
        Some(self.batch(&self.train[start..end], start))
    }

    fn reset_validation(&mut self) {
        self.valid_cursor = 0;
    }

    fn next_validation(&mut self) -> Option<InputBatch<B>> {
        if self.valid_cursor >= self.valid.len() {
            return None;
        }
        let start = self.valid_cursor;
        let end = (start + self.batch_size).min(self.valid.len());
        self.valid_cursor = end;
        Some(self.batch(&self.valid[start..end], start))
    }

    fn complete_points(&self, split: Split) -> &[PointSet] {
        match split {
            Split::Train => &self.train_gallery,
            Split::Valid => &self.valid_gallery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticShapes;
    use burn::backend::NdArray;
    use kpcn_core::Point3;

    type TestBackend = NdArray;

    #[test]
    fn test_batches_in_order() {
        let shapes = SyntheticShapes::new(8, 12);
        let mut dataset = InMemoryCompletionDataset::<TestBackend>::new(
            shapes.generate(5),
            shapes.generate(2),
            2,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(dataset.train_batches(), 3);

        let first = dataset.next_train().unwrap();
        assert_eq!(first.points.dims(), [2, 8, 3]);
        assert_eq!(first.complete_points.dims(), [24, 3]);
        assert_eq!(first.object_inds, vec![0, 1]);

        dataset.next_train().unwrap();
        let last = dataset.next_train().unwrap();
        assert_eq!(last.batch_size(), 1);
        assert_eq!(last.object_inds, vec![4]);
        assert!(dataset.next_train().is_none());

        dataset.reset_train();
        assert!(dataset.next_train().is_some());
        assert_eq!(dataset.complete_points(Split::Valid).len(), 2);
    }

    #[test]
    fn test_rejects_uneven_clouds() {
        let a = CompletionSample::new(
            PointSet::new(vec![Point3::default(); 4]),
            PointSet::new(vec![Point3::default(); 4]),
        );
        let b = CompletionSample::new(
            PointSet::new(vec![Point3::default(); 3]),
            PointSet::new(vec![Point3::default(); 4]),
        );
        assert!(matches!(
            InMemoryCompletionDataset::<TestBackend>::new(vec![a, b], vec![], 1, &Default::default()),
            Err(CompletionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_labels_only_when_all_present() {
        let shapes = SyntheticShapes::new(4, 4);
        let mut samples = shapes.generate(2);
        samples[1].label = None;
        let mut dataset =
            InMemoryCompletionDataset::<TestBackend>::new(samples, vec![], 2, &Default::default())
                .unwrap();
        assert!(dataset.next_train().unwrap().labels.is_none());
    }
}
