mod convergence;
mod rmse;

pub use convergence::ConvergenceMonitor;
pub use rmse::{reconstruction_rmse, rmse_sweep, RmseReport};
