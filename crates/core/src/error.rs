use thiserror::Error;

#[derive(Error, Debug)]
pub enum PccaError {
    #[error("Data error: {0}")]
    Data(String),

    #[error("Dimension mismatch: expected {expected}, got {got} in {context}")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error("Non-finite value encountered in {context}")]
    NonFiniteData { context: String },

    #[error("Numerical instability: {context} is not positive definite; consider a larger regularization")]
    NumericalInstability { context: String },

    #[error("Model has not been fitted; call fit() before {operation}")]
    NotFitted { operation: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PccaError>;
