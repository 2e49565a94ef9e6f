//! Training loop driver.
//!
//! The loop alternates between running steps and epoch boundaries until
//! `max_epoch` is reached or the sentinel file `running_PID.txt` is removed
//! from the saving directory. A numeric failure ends the run with
//! [`CompletionError::Fatal`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use sysinfo::{get_current_pid, Pid, ProcessesToUpdate, System};

use crate::config::TrainerConfig;
use crate::data::{CompletionDataset, InputBatch};
use crate::error::{CompletionError, NumericFailure, Result};
use crate::export::save_kernel_points;
use crate::host;
use crate::model::{CompletionModel, ModelOutput};

use super::checkpoint::{restore, Saver, DEFAULT_RESTORE_EXCLUDE};
use super::optimizer::{apply_step, collect_gradients, Gradient, GradientPolicy, MomentumOptimizer};
use super::results::coarse_metrics;
use super::validation::{validate, ValidationReport};

/// Name of the kill-switch file in the saving directory.
pub const SENTINEL_FILE: &str = "running_PID.txt";
/// Name of the per-step training log.
pub const TRAINING_LOG: &str = "training.txt";
/// Name of the parameters log.
pub const PARAMETERS_FILE: &str = "parameters.json";

const TRAINING_LOG_HEADER: &str = "Steps out_loss reg_loss point_loss coarse_EM coarse_CD time memory";
const KEEP_PROB: f32 = 0.5;
const TIMING_SMOOTH: f64 = 0.95;

/// Why a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_epoch` epochs were trained.
    Completed,
    /// The sentinel file was removed.
    Killed,
}

/// Outcome of [`Trainer::train`].
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// Final global step.
    pub step: usize,
    /// Final epoch.
    pub epoch: usize,
    /// Why the run ended.
    pub stop_reason: StopReason,
    /// Validation reports, one per finished epoch.
    pub validations: Vec<ValidationReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    RunningStep,
    EpochBoundary,
    Stopped(StopReason),
}

/// Scalars of one training step.
#[derive(Debug, Clone, Copy)]
struct StepValues {
    output_loss: f32,
    regularization_loss: f32,
    point_loss: f32,
    coarse_earth_mover: f32,
    coarse_chamfer: f32,
}

/// Resident memory of this process.
struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().ok(),
        }
    }

    /// Resident set size in MB, 0 when unavailable.
    fn resident_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|p| p.memory() as f64 * 1e-6)
            .unwrap_or(0.0)
    }
}

/// Drives training of a [`CompletionModel`].
///
/// The trainer owns the optimizer state and the step and epoch counters.
/// After one call to [`Trainer::train`] the session is closed.
#[derive(Debug)]
pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    saving_path: PathBuf,
    optimizer: MomentumOptimizer<B::InnerBackend>,
    policy: GradientPolicy,
    saver: Saver,
    training_step: usize,
    training_epoch: usize,
    closed: bool,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer, optionally restoring `model` from a snapshot.
    ///
    /// Restoring skips the groups in [`DEFAULT_RESTORE_EXCLUDE`].
    pub fn new<M: CompletionModel<B>>(
        model: &mut M,
        config: TrainerConfig,
        restore_snap: Option<&Path>,
    ) -> Result<Self> {
        config.validate()?;

        let saving_path = PathBuf::from(&config.saving_path);
        if config.saving {
            fs::create_dir_all(&saving_path)?;
        }

        if let Some(path) = restore_snap {
            let stats = restore(model.variables_mut(), path, &DEFAULT_RESTORE_EXCLUDE)?;
            log::debug!(
                "restored {} variables, excluded {}, missing {}",
                stats.restored,
                stats.excluded,
                stats.missing
            );
            log::info!("Model restored.");
        }

        Ok(Self {
            optimizer: MomentumOptimizer::new(config.learning_rate, config.momentum),
            policy: GradientPolicy::from_config(&config),
            saver: Saver::new(saving_path.join("snapshots"), config.max_snapshots),
            saving_path,
            config,
            training_step: 0,
            training_epoch: 0,
            closed: false,
        })
    }

    /// Current configuration, including the updated `epoch_steps`.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Number of successful training steps.
    pub fn training_step(&self) -> usize {
        self.training_step
    }

    /// Number of finished epochs.
    pub fn training_epoch(&self) -> usize {
        self.training_epoch
    }

    /// Whether the session was closed by a previous run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Snapshot writer of this trainer.
    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    fn sentinel_path(&self) -> PathBuf {
        self.saving_path.join(SENTINEL_FILE)
    }

    /// Train `model` on `dataset` until `max_epoch` or the kill signal.
    ///
    /// With `debug_nan`, every step also checks all variables and inputs for
    /// non-finite values and dumps diagnostics through
    /// [`CompletionModel::debug_nan`] before failing.
    pub fn train<M, D>(&mut self, model: &mut M, dataset: &mut D, debug_nan: bool) -> Result<TrainSummary>
    where
        M: CompletionModel<B>,
        D: CompletionDataset<B>,
    {
        if self.closed {
            return Err(CompletionError::SessionClosed);
        }

        let result = self.run(model, dataset, debug_nan);

        self.closed = true;
        let sentinel = self.sentinel_path();
        if sentinel.exists() {
            fs::remove_file(&sentinel)?;
        }
        result
    }

    fn run<M, D>(&mut self, model: &mut M, dataset: &mut D, debug_nan: bool) -> Result<TrainSummary>
    where
        M: CompletionModel<B>,
        D: CompletionDataset<B>,
    {
        if self.config.saving {
            self.config.save(self.saving_path.join(PARAMETERS_FILE))?;
        }
        self.export_kernels(model, 0)?;

        if self.config.saving {
            fs::write(
                self.saving_path.join(TRAINING_LOG),
                format!("{}\n", TRAINING_LOG_HEADER),
            )?;
            let sentinel = self.sentinel_path();
            if !sentinel.exists() {
                fs::write(&sentinel, std::process::id().to_string())?;
            }
        }

        let t0 = Instant::now();
        let mut last_display = t0;
        let mut mean_dt = [0.0f64; 2];
        let mut memory = MemoryProbe::new();
        let mut epoch_n = 0usize;
        let mut mean_epoch_n = 0.0f64;
        let mut validations = Vec::new();

        self.training_step = 0;
        self.training_epoch = 0;
        dataset.reset_train();

        let mut state = LoopState::RunningStep;
        loop {
            state = match state {
                LoopState::RunningStep if self.training_epoch >= self.config.max_epoch => {
                    LoopState::Stopped(StopReason::Completed)
                }

                LoopState::RunningStep => match dataset.next_train() {
                    None => LoopState::EpochBoundary,
                    Some(batch) => {
                        let t = Instant::now();
                        let values = match self.step(model, &batch, debug_nan) {
                            Ok(values) => values,
                            Err(CompletionError::InvalidArgument(failure)) => {
                                log::error!("Caught a NaN error : {}", failure.message);
                                log::error!("op: {}", failure.op);
                                log::error!("inputs: {:?}", failure.inputs);
                                log::error!("outputs: {:?}", failure.outputs);
                                return Err(CompletionError::Fatal(failure));
                            }
                            Err(e) => return Err(e),
                        };
                        let t1 = Instant::now();

                        if self.config.saving {
                            self.append_log_line(&values, t0.elapsed().as_secs_f64(), memory.resident_mb())?;
                        }
                        let t2 = Instant::now();

                        let dt = [(t1 - t).as_secs_f64(), (t2 - t1).as_secs_f64()];
                        for (mean, dt) in mean_dt.iter_mut().zip(dt) {
                            *mean = TIMING_SMOOTH * *mean + (1.0 - TIMING_SMOOTH) * dt;
                        }

                        if last_display.elapsed() > Duration::from_secs(1) {
                            last_display = Instant::now();
                            log::info!(
                                "Step {:08} L_out={:5.3} L_reg={:5.3} L_p={:5.3} Coarse_EM={:4.2} Coarse_CD={:4.2} ---{:8.2} ms/batch (Averaged)",
                                self.training_step,
                                values.output_loss,
                                values.regularization_loss,
                                values.point_loss,
                                values.coarse_earth_mover,
                                values.coarse_chamfer,
                                1000.0 * (mean_dt[0] + mean_dt[1])
                            );
                        }

                        if self.config.saving && !self.sentinel_path().exists() {
                            LoopState::Stopped(StopReason::Killed)
                        } else {
                            self.training_step += 1;
                            epoch_n += 1;
                            if self.epoch_truncated(epoch_n) {
                                LoopState::EpochBoundary
                            } else {
                                LoopState::RunningStep
                            }
                        }
                    }
                },

                LoopState::EpochBoundary => {
                    mean_epoch_n += (epoch_n as f64 - mean_epoch_n) / (self.training_epoch + 1) as f64;
                    epoch_n = 0;
                    self.config.epoch_steps = Some(mean_epoch_n.floor() as usize);
                    if self.config.saving {
                        self.config.save(self.saving_path.join(PARAMETERS_FILE))?;
                    }

                    if self.config.saving && (self.training_epoch + 1) % self.config.snapshot_gap == 0 {
                        self.saver.save(
                            model.variables(),
                            self.training_step + 1,
                            self.training_epoch,
                        )?;
                        self.export_kernels(model, self.training_epoch + 1)?;
                    }

                    if let Some(&factor) = self.config.lr_decays.get(&self.training_epoch) {
                        self.optimizer.decay(factor);
                        log::debug!("learning rate decayed to {:e}", self.optimizer.learning_rate());
                    }

                    if let Some(&alpha) = self.config.alpha_schedule.get(&self.training_epoch) {
                        model.set_alpha(alpha)?;
                        log::debug!("alpha set to {}", alpha);
                    }

                    self.training_epoch += 1;

                    validations.push(validate(self.config.network_model, model, dataset, &self.config)?);

                    dataset.reset_train();
                    LoopState::RunningStep
                }

                LoopState::Stopped(stop_reason) => {
                    log::info!(
                        "Training stopped ({:?}) at step {} epoch {}",
                        stop_reason,
                        self.training_step,
                        self.training_epoch
                    );
                    return Ok(TrainSummary {
                        step: self.training_step,
                        epoch: self.training_epoch,
                        stop_reason,
                        validations,
                    });
                }
            };
        }
    }

    /// Forward, backward and update on one batch.
    fn step<M: CompletionModel<B>>(
        &mut self,
        model: &mut M,
        batch: &InputBatch<B>,
        debug_nan: bool,
    ) -> Result<StepValues> {
        if debug_nan {
            check_numerics(model, batch)?;
        }

        let output = model.forward(batch, KEEP_PROB)?;
        let output_loss = host::scalar(output.output_loss.clone())?;
        let regularization_loss = host::scalar(output.regularization_loss.clone())?;
        let point_loss = host::scalar(output.point_loss.clone())?;

        if debug_nan && (output_loss.is_nan() || regularization_loss.is_nan()) {
            model.debug_nan(batch, &output);
        }
        check_losses(&[
            ("output_loss", output_loss),
            ("regularization_loss", regularization_loss),
            ("point_loss", point_loss),
        ])?;

        let metrics = coarse_metrics(
            output.coarse.clone().inner(),
            batch.complete_points.clone().inner(),
        )?;

        let ModelOutput { loss, updates, .. } = output;
        let grads = loss.backward();
        let raw = collect_gradients(model.variables(), &grads);
        check_gradients::<B, M>(model, &raw)?;

        let processed = self.policy.process(raw)?;
        apply_step(&mut self.optimizer, model.variables_mut(), updates, processed)?;

        Ok(StepValues {
            output_loss,
            regularization_loss,
            point_loss,
            coarse_earth_mover: metrics.earth_mover,
            coarse_chamfer: metrics.chamfer,
        })
    }

    /// Synthetic exhaustion for datasets truncated to `epoch_steps`.
    fn epoch_truncated(&self, epoch_n: usize) -> bool {
        if !self.config.truncates_epochs() {
            return false;
        }
        match self.config.epoch_steps {
            Some(steps) if steps > 0 => epoch_n > steps,
            _ => false,
        }
    }

    fn append_log_line(&self, values: &StepValues, elapsed: f64, memory_mb: f64) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.saving_path.join(TRAINING_LOG))?;
        writeln!(
            file,
            "{} {:.3} {:.3} {:.3} {:.2} {:.2} {:.2} {:.1}",
            self.training_step,
            values.output_loss,
            values.regularization_loss,
            values.point_loss,
            values.coarse_earth_mover,
            values.coarse_chamfer,
            elapsed,
            memory_mb
        )?;
        Ok(())
    }

    fn export_kernels<M: CompletionModel<B>>(&self, model: &M, epoch: usize) -> Result<()> {
        if self.config.saving {
            save_kernel_points(model.variables(), &self.saving_path, epoch)?;
        }
        Ok(())
    }
}

fn check_losses(losses: &[(&str, f32)]) -> Result<()> {
    let bad: Vec<String> = losses
        .iter()
        .filter(|(_, v)| !v.is_finite())
        .map(|(name, _)| name.to_string())
        .collect();
    if bad.is_empty() {
        return Ok(());
    }
    Err(CompletionError::InvalidArgument(NumericFailure {
        op: "loss".into(),
        inputs: losses.iter().map(|(name, _)| name.to_string()).collect(),
        outputs: bad,
        message: "loss is not finite".into(),
    }))
}

fn check_gradients<B, M>(model: &M, grads: &[Gradient<B::InnerBackend>]) -> Result<()>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
{
    let mut bad = Vec::new();
    for grad in grads {
        if host::values(grad.value.clone())?.iter().any(|v| !v.is_finite()) {
            bad.push(model.variables().get(grad.id).name.clone());
        }
    }
    if bad.is_empty() {
        return Ok(());
    }
    Err(CompletionError::InvalidArgument(NumericFailure {
        op: "gradients".into(),
        inputs: vec!["loss".into()],
        outputs: bad,
        message: "gradient is not finite".into(),
    }))
}

/// Finiteness check of every variable and every raw input.
fn check_numerics<B, M>(model: &M, batch: &InputBatch<B>) -> Result<()>
where
    B: AutodiffBackend,
    M: CompletionModel<B>,
{
    let mut bad = model.variables().non_finite()?;
    for (name, tensor) in batch.flat_inputs() {
        if host::values(tensor)?.iter().any(|v| !v.is_finite()) {
            bad.push(name.to_string());
        }
    }
    if bad.is_empty() {
        return Ok(());
    }
    Err(CompletionError::InvalidArgument(NumericFailure {
        op: "check_numerics".into(),
        inputs: bad.clone(),
        outputs: bad,
        message: "tensor had NaN or Inf values".into(),
    }))
}
