pub mod data;
pub mod diagnostics;
pub mod error;
pub mod matrix;
pub mod model;
pub mod types;

pub use error::{PccaError, Result};
pub use model::{FitReport, Pcca, PccaBuilder};
