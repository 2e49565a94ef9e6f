//! Example: training the reference completion network on synthetic spheres.
//!
//! This example runs the whole training driver:
//! 1. Generate partial/complete sphere pairs
//! 2. Build the reference network
//! 3. Train with snapshots, kernel exports and per-epoch validation
//! 4. Match the final predictions against the validation gallery
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run -p neural_kpcn --example train_reference
//! ```
//!
//! Output files are saved to `demo_output/`. Delete `demo_output/running_PID.txt`
//! while it runs to stop training early.

use std::process::ExitCode;

use burn::backend::{Autodiff, NdArray};

use neural_kpcn::metrics::minimal_matching_distance;
use neural_kpcn::prelude::*;

type MyBackend = Autodiff<NdArray>;

/// Output directory for generated files.
const OUTPUT_DIR: &str = "demo_output";

fn run() -> Result<TrainSummary> {
    let device = Default::default();

    println!("═══════════════════════════════════════════════════════════════");
    println!("          Kernel Point Completion Training");
    println!("═══════════════════════════════════════════════════════════════");

    let net_config = ReferenceNetConfig::new().with_coarse_points(32);
    let samples = SyntheticShapes::new(128, net_config.coarse_points)
        .with_seed(7)
        .generate(40);
    let (train, valid) = samples.split_at(32);
    let mut dataset = InMemoryCompletionDataset::<MyBackend>::new(train.to_vec(), valid.to_vec(), 4, &device)?;
    println!("  Train batches:   {}", dataset.train_batches());
    println!("  Valid samples:   {}", dataset.validation_len());

    let mut model = ReferenceCompletionNet::<MyBackend>::new(net_config, &device)?;
    println!("  Variables:       {}", model.variables().len());

    let config = TrainerConfig::new("synthetic".into(), OUTPUT_DIR.into())
        .with_max_epoch(20)
        .with_snapshot_gap(5)
        .with_validation_size(dataset.validation_len())
        .with_alpha_schedule([(10, 0.5), (15, 1.0)].into_iter().collect())
        .with_exponential_decay(0.1, 20);

    let mut trainer = Trainer::new(&mut model, config, None)?;
    let summary = trainer.train(&mut model, &mut dataset, false)?;
    println!(
        "  Finished:        step {} epoch {} ({:?})",
        summary.step, summary.epoch, summary.stop_reason
    );

    // Compare the coarse predictions of the first validation batch with the gallery.
    dataset.reset_validation();
    if let Some(batch) = dataset.next_validation() {
        let output = model.forward(&batch, 1.0)?;
        let matching = minimal_matching_distance(output.coarse.inner(), dataset.complete_points(Split::Valid))?;
        for (object, (index, distance)) in batch
            .object_inds
            .iter()
            .zip(matching.indices.iter().zip(&matching.distances))
        {
            println!("  Object {:2} -> gallery {:2} (chamfer {:.4})", object, index, distance);
        }
    }

    Ok(summary)
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(CompletionError::Fatal(failure)) => {
            eprintln!("Training aborted: {}", failure);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
