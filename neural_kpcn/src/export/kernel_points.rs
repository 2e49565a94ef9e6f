//! Per-epoch kernel point and weight export.

use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;

use kpcn_core::PointSet;
use kpcn_io::{save_npy, save_ply};

use crate::error::{CompletionError, Result};
use crate::variables::{Variable, VariableGroup, VariableStore};

/// Files written by one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportStats {
    /// Export directory.
    pub directory: PathBuf,
    /// Number of PLY files.
    pub kernel_files: usize,
    /// Number of NPY files.
    pub weight_files: usize,
}

impl ExportStats {
    /// Log the export statistics.
    pub fn log(&self, prefix: &str) {
        log::info!(
            "{} {:?}: {} kernel clouds, {} weight arrays",
            prefix,
            self.directory,
            self.kernel_files,
            self.weight_files
        );
    }
}

/// Directory of the export for `epoch`.
pub fn kernel_points_dir(saving_path: &Path, epoch: usize) -> PathBuf {
    saving_path
        .join("kernel_points")
        .join(format!("epoch{}", epoch))
}

/// Write kernel points and weights of `store` to `kernel_points/epoch<N>`.
///
/// File stems are the scope components between the root and the leaf, e.g.
/// `KernelPointNetwork/layer_0/conv/kernel_points` becomes `layer_0_conv.ply`.
pub fn save_kernel_points<B: Backend>(
    store: &VariableStore<B>,
    saving_path: &Path,
    epoch: usize,
) -> Result<ExportStats> {
    let directory = kernel_points_dir(saving_path, epoch);
    fs::create_dir_all(&directory)?;

    let mut stats = ExportStats {
        directory: directory.clone(),
        kernel_files: 0,
        weight_files: 0,
    };

    for (id, var) in store.iter() {
        if !var.name.starts_with(store.root()) {
            continue;
        }
        match var.group {
            VariableGroup::KernelPoints => {
                let values = store.values(id)?;
                let points = kernel_slice(var, &values)?;
                save_ply(points.points(), directory.join(format!("{}.ply", file_stem(var))))?;
                stats.kernel_files += 1;
            }
            VariableGroup::Weights => {
                let values = store.values(id)?;
                save_npy(&var.shape, &values, directory.join(format!("{}.npy", file_stem(var))))?;
                stats.weight_files += 1;
            }
            _ => {}
        }
    }

    stats.log("Exported kernels to");
    Ok(stats)
}

fn file_stem<B: Backend>(var: &Variable<B>) -> String {
    let stem = var.export_stem();
    if stem.is_empty() {
        var.relative_name().replace('/', "_")
    } else {
        stem
    }
}

/// Points of a kernel variable. For rank >= 3 only index 0 of the second
/// axis is kept.
fn kernel_slice<B: Backend>(var: &Variable<B>, values: &[f32]) -> Result<PointSet> {
    if var.shape.last() != Some(&3) {
        return Err(CompletionError::Export {
            message: format!(
                "kernel variable {} has shape {:?}, expected trailing dimension 3",
                var.name, var.shape
            ),
        });
    }
    if var.shape.len() <= 2 {
        return Ok(PointSet::from_flat(values)?);
    }

    let inner: usize = var.shape[2..].iter().product();
    let stride = var.shape[1] * inner;
    let kept: Vec<f32> = (0..var.shape[0])
        .flat_map(|i| values[i * stride..i * stride + inner].iter().copied())
        .collect();
    Ok(PointSet::from_flat(&kept)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use kpcn_io::{load_npy, load_ply};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_export_layout() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = VariableStore::<TestBackend>::new(&Default::default());
        store
            .register(
                "layer_0/conv/kernel_points",
                VariableGroup::KernelPoints,
                vec![2, 3],
                vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
                false,
            )
            .unwrap();
        store
            .register("layer_0/conv/weights", VariableGroup::Weights, vec![2, 4], vec![0.5; 8], true)
            .unwrap();
        store
            .register("decoder/fc/bias", VariableGroup::FullyConnected, vec![3], vec![0.0; 3], true)
            .unwrap();

        let stats = save_kernel_points(&store, temp_dir.path(), 7).unwrap();
        assert_eq!(stats.kernel_files, 1);
        assert_eq!(stats.weight_files, 1);

        let dir = temp_dir.path().join("kernel_points").join("epoch7");
        let cloud = load_ply(dir.join("layer_0_conv.ply")).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1].as_array(), [1.0, 2.0, 3.0]);

        let weights = load_npy(dir.join("layer_0_conv.npy")).unwrap();
        assert_eq!(weights.shape, vec![2, 4]);
        assert_eq!(weights.values, vec![0.5; 8]);
    }

    #[test]
    fn test_rank_three_keeps_first_slice() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = VariableStore::<TestBackend>::new(&Default::default());
        // [2 kernels, 2 candidates, 3]
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        store
            .register("layer_1/conv/kernel_points", VariableGroup::KernelPoints, vec![2, 2, 3], values, false)
            .unwrap();

        save_kernel_points(&store, temp_dir.path(), 0).unwrap();
        let cloud = load_ply(kernel_points_dir(temp_dir.path(), 0).join("layer_1_conv.ply")).unwrap();
        assert_eq!(cloud.to_flat(), vec![0.0, 1.0, 2.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_rejects_non_point_kernel() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = VariableStore::<TestBackend>::new(&Default::default());
        store
            .register("layer_0/conv/kernel_points", VariableGroup::KernelPoints, vec![4], vec![0.0; 4], false)
            .unwrap();
        assert!(matches!(
            save_kernel_points(&store, temp_dir.path(), 0),
            Err(CompletionError::Export { .. })
        ));
    }
}
