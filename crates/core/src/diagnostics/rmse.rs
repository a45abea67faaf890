use rayon::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::model::PccaBuilder;
use crate::types::DenseMatrix;

/// Reconstruction error of one fitted configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RmseReport {
    pub n_components: usize,
    pub rmse_block1: f64,
    pub rmse_block2: f64,
    pub n_iterations: usize,
    pub converged: bool,
}

/// Fit a model from `builder`, generate noisy reconstructions of the
/// training trials, and report the per-block RMSE against the originals.
pub fn reconstruction_rmse(
    x1: &DenseMatrix,
    x2: &DenseMatrix,
    builder: &PccaBuilder,
    sample_seed: u64,
) -> Result<RmseReport> {
    let mut model = builder.clone().build()?;
    let fit = model.fit(x1, x2)?;
    let (g1, g2) = model.reconstruct(sample_seed)?;
    Ok(RmseReport {
        n_components: model.n_components(),
        rmse_block1: rmse(&g1, x1),
        rmse_block2: rmse(&g2, x2),
        n_iterations: fit.n_iterations,
        converged: fit.converged,
    })
}

/// Evaluate reconstruction RMSE across a range of latent dimensions.
///
/// Configurations are independent, so they run in parallel. A configuration
/// that fails numerically is logged at warn level and skipped; it never
/// aborts the sweep. Results come back in the order of `dims`.
pub fn rmse_sweep(
    x1: &DenseMatrix,
    x2: &DenseMatrix,
    dims: &[usize],
    base: &PccaBuilder,
    sample_seed: u64,
) -> Vec<RmseReport> {
    dims.par_iter()
        .filter_map(|&k| {
            match reconstruction_rmse(x1, x2, &base.clone().components(k), sample_seed) {
                Ok(report) => Some(report),
                Err(err) => {
                    log::warn!("skipping latent dimension {k}: {err}");
                    None
                }
            }
        })
        .collect()
}

fn rmse(a: &DenseMatrix, b: &DenseMatrix) -> f64 {
    let diff = a - b;
    (diff.norm_squared() / diff.len() as f64).sqrt()
}
