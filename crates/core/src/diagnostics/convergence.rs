use crate::model::EmIteration;

/// Monitors convergence of the EM loop.
///
/// An iteration counts as converged when both the relative parameter change
/// and the relative log-likelihood change fall below the tolerance. A
/// tolerance of zero therefore never converges, which reproduces the
/// fixed-iteration-count behavior.
#[derive(Debug)]
pub struct ConvergenceMonitor {
    tol: f64,
    max_iter: usize,
    history: Vec<EmIteration>,
    last_logl_change: f64,
}

impl ConvergenceMonitor {
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self {
            tol,
            max_iter,
            history: Vec::new(),
            last_logl_change: f64::INFINITY,
        }
    }

    /// Record a new iteration.
    pub fn record(&mut self, log_likelihood: f64, param_change: f64) {
        self.last_logl_change = match self.history.last() {
            Some(prev) => {
                (log_likelihood - prev.log_likelihood).abs() / (1.0 + log_likelihood.abs())
            }
            None => f64::INFINITY,
        };
        self.history.push(EmIteration {
            iteration: self.history.len() + 1,
            log_likelihood,
            change: param_change,
        });
    }

    /// Check if the convergence criterion is met.
    pub fn is_converged(&self) -> bool {
        match self.history.last() {
            Some(last) => last.change < self.tol && self.last_logl_change < self.tol,
            None => false,
        }
    }

    /// Check if the iteration cap is reached.
    pub fn max_reached(&self) -> bool {
        self.history.len() >= self.max_iter
    }

    /// Number of iterations recorded.
    pub fn n_iterations(&self) -> usize {
        self.history.len()
    }

    /// Parameter change at the last recorded iteration.
    pub fn last_change(&self) -> Option<f64> {
        self.history.last().map(|r| r.change)
    }

    /// Consume the monitor, yielding the iteration history.
    pub fn into_history(self) -> Vec<EmIteration> {
        self.history
    }
}
