use crate::error::{PccaError, Result};

use super::pcca::Pcca;

/// Builder for constructing a [`Pcca`] model.
///
/// Defaults: 2 components, 100 EM iterations, regularization 1.0,
/// tolerance 1e-8, seed 0.
#[derive(Debug, Clone)]
pub struct PccaBuilder {
    pub(super) components: usize,
    pub(super) max_iter: usize,
    pub(super) regularization: f64,
    pub(super) tolerance: f64,
    pub(super) seed: u64,
}

impl PccaBuilder {
    pub fn new() -> Self {
        Self {
            components: 2,
            max_iter: 100,
            regularization: 1.0,
            tolerance: 1e-8,
            seed: 0,
        }
    }

    /// Set the latent dimension.
    pub fn components(mut self, k: usize) -> Self {
        self.components = k;
        self
    }

    /// Set the maximum number of EM iterations (default: 100).
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iter = n;
        self
    }

    /// Set the regularization added to the diagonal of each noise covariance
    /// block at every M-step (default: 1.0).
    pub fn regularization(mut self, reg: f64) -> Self {
        self.regularization = reg;
        self
    }

    /// Set the convergence tolerance (default: 1e-8). A tolerance of 0.0
    /// disables early stopping, so exactly `max_iterations` EM steps run.
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// Set the seed for the random loading initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the model. Validates all configuration values.
    pub fn build(self) -> Result<Pcca> {
        if self.components == 0 {
            return Err(PccaError::InvalidParameter(
                "n_components must be at least 1".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(PccaError::InvalidParameter(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(PccaError::InvalidParameter(format!(
                "regularization must be non-negative and finite, got {}",
                self.regularization
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(PccaError::InvalidParameter(format!(
                "tolerance must be non-negative and finite, got {}",
                self.tolerance
            )));
        }
        Ok(Pcca::from_builder(self))
    }
}

impl Default for PccaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
