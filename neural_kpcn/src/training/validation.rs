//! Validation routines, one per task type.
//!
//! Every routine resets the validation iterator, runs the model without
//! dropout until the split is exhausted, logs progress at most once per
//! second and reports aggregated scores at the end.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use burn::tensor::backend::AutodiffBackend;

use kpcn_core::ConfusionMatrix;

use crate::config::{NetworkModel, TrainerConfig};
use crate::data::CompletionDataset;
use crate::error::{CompletionError, Result};
use crate::model::{CompletionModel, LabelPredictions};

use super::results::coarse_metrics;

/// Smoothing of the validation timings.
const VAL_SMOOTH: f64 = 0.95;

/// Aggregated result of one validation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationReport {
    /// Point cloud completion.
    Completion {
        /// Mean coarse Chamfer distance over batches.
        mean_chamfer: f32,
        /// Mean coarse Earth Mover distance over batches.
        mean_earth_mover: f32,
        /// Validated object indices, in visiting order.
        object_inds: Vec<usize>,
    },
    /// Object classification.
    Classification {
        /// Overall accuracy.
        accuracy: f64,
        /// Mean per-class accuracy.
        mean_class_accuracy: f64,
        /// Accumulated confusion matrix.
        confusion: ConfusionMatrix,
    },
    /// Single-category part segmentation.
    Segmentation {
        /// Per-class IoU.
        iou: Vec<f64>,
        /// Mean IoU.
        mean_iou: f64,
    },
    /// Multi-category part segmentation.
    MultiSegmentation {
        /// Mean IoU of each object category.
        category_iou: BTreeMap<usize, f64>,
        /// Mean over categories.
        mean_iou: f64,
    },
    /// Scene segmentation over several clouds.
    CloudSegmentation {
        /// Per-class IoU of the summed confusion.
        iou: Vec<f64>,
        /// Mean IoU.
        mean_iou: f64,
    },
}

/// Run the validation routine of `task`.
pub fn validate<B, M, D>(
    task: NetworkModel,
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    match task {
        NetworkModel::Completion => completion_validation(model, dataset, config),
        NetworkModel::Classification => classification_validation(model, dataset, config),
        NetworkModel::Segmentation => segmentation_validation(model, dataset, config),
        NetworkModel::MultiSegmentation => multi_segmentation_validation(model, dataset, config),
        NetworkModel::CloudSegmentation => cloud_segmentation_validation(model, dataset, config),
    }
}

/// Rate-limited progress reporter with smoothed timings.
struct Progress {
    validation_size: usize,
    mean_dt: [f64; 2],
    last_display: Instant,
}

impl Progress {
    fn new(validation_size: usize) -> Self {
        Self {
            validation_size: validation_size.max(1),
            mean_dt: [0.0; 2],
            last_display: Instant::now(),
        }
    }

    fn record(&mut self, t0: Instant, t1: Instant, t2: Instant, seen: usize) {
        let dt = [(t1 - t0).as_secs_f64(), (t2 - t1).as_secs_f64()];
        for (mean, new) in self.mean_dt.iter_mut().zip(dt) {
            *mean = VAL_SMOOTH * *mean + (1.0 - VAL_SMOOTH) * new;
        }

        if self.last_display.elapsed() > Duration::from_secs(1) {
            self.last_display = Instant::now();
            log::info!(
                "Validation : {:.1}% (timings : {:4.2} {:4.2})",
                100.0 * seen as f64 / self.validation_size as f64,
                1000.0 * self.mean_dt[0],
                1000.0 * self.mean_dt[1]
            );
        }
    }
}

fn completion_validation<B, M, D>(
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let mut progress = Progress::new(config.validation_size);
    let mut chamfers = Vec::new();
    let mut earth_movers = Vec::new();
    let mut object_inds = Vec::new();

    dataset.reset_validation();
    while let Some(batch) = dataset.next_validation() {
        let t0 = Instant::now();
        let output = model.forward(&batch, 1.0)?;
        let t1 = Instant::now();

        let metrics = coarse_metrics(output.coarse.inner(), batch.complete_points.clone().inner())?;
        chamfers.push(metrics.chamfer);
        earth_movers.push(metrics.earth_mover);
        object_inds.extend_from_slice(&batch.object_inds);

        progress.record(t0, t1, Instant::now(), object_inds.len());
    }

    if chamfers.is_empty() {
        log::warn!("Validation split is empty");
    }
    let mean_chamfer = mean(&chamfers);
    let mean_earth_mover = mean(&earth_movers);

    log::info!("Validation distances");
    log::info!(
        "Mean Chamfer: {:4.2}\tMean Earth Mover: {:4.2}",
        mean_chamfer,
        mean_earth_mover
    );

    Ok(ValidationReport::Completion {
        mean_chamfer,
        mean_earth_mover,
        object_inds,
    })
}

/// Run the model over the split and hand every batch of labels to `sink`.
fn collect_labels<B, M, D, F>(
    task: NetworkModel,
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
    mut sink: F,
) -> Result<()>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
    F: FnMut(LabelPredictions) -> Result<()>,
{
    let mut progress = Progress::new(config.validation_size);
    let mut seen = 0;

    dataset.reset_validation();
    while let Some(batch) = dataset.next_validation() {
        let t0 = Instant::now();
        let output = model.forward(&batch, 1.0)?;
        let t1 = Instant::now();

        let labels = output.labels.ok_or_else(|| CompletionError::MissingPredictions {
            task: task.to_string(),
        })?;
        seen += batch.batch_size();
        sink(labels)?;

        progress.record(t0, t1, Instant::now(), seen);
    }
    Ok(())
}

fn classification_validation<B, M, D>(
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let mut confusion = ConfusionMatrix::new(config.num_classes);
    collect_labels(NetworkModel::Classification, model, dataset, config, |labels| {
        confusion.add_all(&labels.predicted, &labels.targets)?;
        Ok(())
    })?;

    let accuracy = confusion.accuracy();
    let mean_class_accuracy = confusion.mean_class_accuracy();
    log::info!(
        "Validation accuracy: {:.2}%\tmean class accuracy: {:.2}%",
        100.0 * accuracy,
        100.0 * mean_class_accuracy
    );

    Ok(ValidationReport::Classification {
        accuracy,
        mean_class_accuracy,
        confusion,
    })
}

fn segmentation_validation<B, M, D>(
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let mut confusion = ConfusionMatrix::new(config.num_classes);
    collect_labels(NetworkModel::Segmentation, model, dataset, config, |labels| {
        confusion.add_all(&labels.predicted, &labels.targets)?;
        Ok(())
    })?;

    let iou = confusion.iou();
    let mean_iou = confusion.mean_iou();
    log_iou("Validation", &iou, mean_iou);

    Ok(ValidationReport::Segmentation { iou, mean_iou })
}

fn multi_segmentation_validation<B, M, D>(
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let task = NetworkModel::MultiSegmentation;
    let per_group = grouped_confusions(task, model, dataset, config)?;

    let category_iou: BTreeMap<usize, f64> = per_group
        .iter()
        .map(|(&category, confusion)| (category, confusion.mean_iou()))
        .collect();
    let mean_iou = if category_iou.is_empty() {
        0.0
    } else {
        category_iou.values().sum::<f64>() / category_iou.len() as f64
    };

    for (category, iou) in &category_iou {
        log::info!("Category {:3}: mIoU = {:.1}%", category, 100.0 * iou);
    }
    log::info!("Validation mean category mIoU = {:.1}%", 100.0 * mean_iou);

    Ok(ValidationReport::MultiSegmentation {
        category_iou,
        mean_iou,
    })
}

fn cloud_segmentation_validation<B, M, D>(
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<ValidationReport>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let task = NetworkModel::CloudSegmentation;
    let per_cloud = grouped_confusions(task, model, dataset, config)?;

    let mut total = ConfusionMatrix::new(config.num_classes);
    for confusion in per_cloud.values() {
        total.merge(confusion)?;
    }

    let iou = total.iou();
    let mean_iou = total.mean_iou();
    log_iou("Validation", &iou, mean_iou);

    Ok(ValidationReport::CloudSegmentation { iou, mean_iou })
}

/// One confusion matrix per label group.
fn grouped_confusions<B, M, D>(
    task: NetworkModel,
    model: &M,
    dataset: &mut D,
    config: &TrainerConfig,
) -> Result<BTreeMap<usize, ConfusionMatrix>>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
    D: CompletionDataset<B>,
{
    let num_classes = config.num_classes;
    let mut per_group: BTreeMap<usize, ConfusionMatrix> = BTreeMap::new();
    collect_labels(task, model, dataset, config, |labels| {
        add_grouped(task, num_classes, &labels, &mut per_group)
    })?;
    Ok(per_group)
}

/// Add one batch of grouped labels to the per-group matrices.
fn add_grouped(
    task: NetworkModel,
    num_classes: usize,
    labels: &LabelPredictions,
    per_group: &mut BTreeMap<usize, ConfusionMatrix>,
) -> Result<()> {
    let groups = labels.groups.as_ref().ok_or_else(|| {
        CompletionError::Data(format!("{} validation requires label groups", task))
    })?;
    let n = labels.predicted.len();
    if labels.targets.len() != n || groups.len() != n {
        return Err(CompletionError::Data(format!(
            "{} validation got {} predictions, {} targets and {} groups",
            task,
            n,
            labels.targets.len(),
            groups.len()
        )));
    }
    for ((&p, &t), &g) in labels.predicted.iter().zip(&labels.targets).zip(groups) {
        per_group
            .entry(g)
            .or_insert_with(|| ConfusionMatrix::new(num_classes))
            .add(p, t)?;
    }
    Ok(())
}

fn log_iou(prefix: &str, iou: &[f64], mean_iou: f64) {
    let per_class: Vec<String> = iou.iter().map(|v| format!("{:5.1}", 100.0 * v)).collect();
    log::info!("{} mIoU = {:.1}% |{}", prefix, 100.0 * mean_iou, per_class.join(" "));
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
