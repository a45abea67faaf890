use serde::Serialize;

/// The result of fitting a PCCA model via EM.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    /// Latent dimension of the fitted model.
    pub n_components: usize,
    /// Number of training trials.
    pub n_trials: usize,
    /// Feature count of block 1.
    pub p1: usize,
    /// Feature count of block 2.
    pub p2: usize,
    /// Number of EM iterations actually performed.
    pub n_iterations: usize,
    /// Whether the convergence criterion fired before the iteration cap.
    pub converged: bool,
    /// Marginal log-likelihood of the training data under the final parameters.
    pub log_likelihood: f64,
    /// Relative change in the noise covariance at the last iteration.
    pub final_change: f64,
    /// Set when n_components exceeds the smaller block width; the loadings
    /// are then not identifiable, though the fit itself still runs.
    pub non_identifiable: bool,
    /// Iteration history.
    pub history: Vec<EmIteration>,
}

/// Information about a single EM iteration.
#[derive(Debug, Clone, Serialize)]
pub struct EmIteration {
    pub iteration: usize,
    /// Log-likelihood under the parameters entering this iteration.
    pub log_likelihood: f64,
    /// Relative Frobenius change of the noise covariance blocks.
    pub change: f64,
}

impl FitReport {
    /// Print a formatted summary of the model fit.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("=== PCCA Fit (EM) ===\n\n");
        s.push_str(&format!(
            "Trials: {}   Block widths: {} + {}   Latent components: {}\n",
            self.n_trials, self.p1, self.p2, self.n_components
        ));
        s.push_str(&format!(
            "Converged: {}   Iterations: {}\n",
            self.converged, self.n_iterations
        ));
        s.push_str(&format!("Log-likelihood: {:.4}\n", self.log_likelihood));
        s.push_str(&format!("Final relative change: {:.3e}\n", self.final_change));

        if self.non_identifiable {
            s.push_str(&format!(
                "Warning: {} components exceed the smaller block width {}; loadings are not identifiable\n",
                self.n_components,
                self.p1.min(self.p2)
            ));
        }

        s
    }
}
