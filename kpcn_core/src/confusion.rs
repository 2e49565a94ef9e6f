//! Confusion matrices and IoU scores for label validation.

use crate::error::{CoreError, Result};

/// Square confusion matrix. Rows are target labels, columns are predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Create an empty matrix for `num_classes` classes.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    /// Build a matrix from paired predictions and targets.
    pub fn from_labels(num_classes: usize, predicted: &[usize], targets: &[usize]) -> Result<Self> {
        let mut matrix = Self::new(num_classes);
        matrix.add_all(predicted, targets)?;
        Ok(matrix)
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Record one prediction.
    pub fn add(&mut self, predicted: usize, target: usize) -> Result<()> {
        for label in [predicted, target] {
            if label >= self.num_classes {
                return Err(CoreError::LabelOutOfRange {
                    label,
                    num_classes: self.num_classes,
                });
            }
        }
        self.counts[target * self.num_classes + predicted] += 1;
        Ok(())
    }

    /// Record paired predictions. Both slices must have the same length.
    pub fn add_all(&mut self, predicted: &[usize], targets: &[usize]) -> Result<()> {
        if predicted.len() != targets.len() {
            return Err(CoreError::LengthMismatch {
                left: predicted.len(),
                right: targets.len(),
            });
        }
        for (&p, &t) in predicted.iter().zip(targets) {
            self.add(p, t)?;
        }
        Ok(())
    }

    /// Element-wise sum with another matrix of the same size.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if self.num_classes != other.num_classes {
            return Err(CoreError::LengthMismatch {
                left: self.num_classes,
                right: other.num_classes,
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    /// Count at (target, predicted).
    pub fn get(&self, target: usize, predicted: usize) -> u64 {
        self.counts[target * self.num_classes + predicted]
    }

    /// Total number of recorded samples.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn true_positives(&self, c: usize) -> f64 {
        self.get(c, c) as f64
    }

    fn target_count(&self, c: usize) -> f64 {
        (0..self.num_classes).map(|p| self.get(c, p)).sum::<u64>() as f64
    }

    fn predicted_count(&self, c: usize) -> f64 {
        (0..self.num_classes).map(|t| self.get(t, c)).sum::<u64>() as f64
    }

    /// Overall accuracy (trace / total). Zero when empty.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let trace: f64 = (0..self.num_classes).map(|c| self.true_positives(c)).sum();
        trace / total as f64
    }

    /// Mean of per-class recall over classes present in the targets.
    pub fn mean_class_accuracy(&self) -> f64 {
        let present: Vec<f64> = (0..self.num_classes)
            .filter(|&c| self.target_count(c) > 0.0)
            .map(|c| self.true_positives(c) / self.target_count(c))
            .collect();
        if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }

    /// Per-class IoU.
    ///
    /// Classes absent from the targets receive the mean IoU of the present
    /// classes, so they neither help nor hurt the average.
    pub fn iou(&self) -> Vec<f64> {
        let mut ious = Vec::with_capacity(self.num_classes);
        let mut present = Vec::with_capacity(self.num_classes);
        for c in 0..self.num_classes {
            let tp = self.true_positives(c);
            let union = self.target_count(c) + self.predicted_count(c) - tp;
            ious.push(tp / (union + 1e-6));
            present.push(self.target_count(c) > 0.0);
        }

        let n_present = present.iter().filter(|&&p| p).count();
        let mean = ious
            .iter()
            .zip(&present)
            .filter(|(_, &p)| p)
            .map(|(v, _)| v)
            .sum::<f64>()
            / (n_present as f64 + 1e-6);

        for (v, p) in ious.iter_mut().zip(&present) {
            if !p {
                *v = mean;
            }
        }
        ious
    }

    /// Mean IoU over all classes (see [`ConfusionMatrix::iou`]).
    pub fn mean_iou(&self) -> f64 {
        let ious = self.iou();
        if ious.is_empty() {
            0.0
        } else {
            ious.iter().sum::<f64>() / ious.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let labels = [0, 1, 2, 2, 1, 0];
        let m = ConfusionMatrix::from_labels(3, &labels, &labels).unwrap();
        assert_eq!(m.total(), 6);
        assert!((m.accuracy() - 1.0).abs() < 1e-9);
        assert!((m.mean_iou() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_iou_values() {
        // Class 0: tp=1, fn=1, fp=0 -> 1/2. Class 1: tp=1, fn=0, fp=1 -> 1/2.
        let m = ConfusionMatrix::from_labels(2, &[0, 1, 1], &[0, 0, 1]).unwrap();
        let iou = m.iou();
        assert!((iou[0] - 0.5).abs() < 1e-5);
        assert!((iou[1] - 0.5).abs() < 1e-5);
        assert!((m.accuracy() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.mean_class_accuracy() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_absent_class_gets_mean() {
        let m = ConfusionMatrix::from_labels(3, &[0, 1], &[0, 1]).unwrap();
        let iou = m.iou();
        assert!((iou[2] - iou[0]).abs() < 1e-5);
    }

    #[test]
    fn test_label_out_of_range() {
        let mut m = ConfusionMatrix::new(2);
        assert_eq!(
            m.add(2, 0),
            Err(CoreError::LabelOutOfRange {
                label: 2,
                num_classes: 2
            })
        );
    }

    #[test]
    fn test_merge() {
        let mut a = ConfusionMatrix::from_labels(2, &[0], &[0]).unwrap();
        let b = ConfusionMatrix::from_labels(2, &[1], &[0]).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.get(0, 0), 1);
        assert_eq!(a.get(0, 1), 1);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert_eq!(
            ConfusionMatrix::from_labels(2, &[0, 1, 1], &[0, 1]),
            Err(CoreError::LengthMismatch { left: 3, right: 2 })
        );

        let mut a = ConfusionMatrix::new(2);
        assert!(a.merge(&ConfusionMatrix::new(3)).is_err());
        assert_eq!(a.total(), 0);
    }
}
