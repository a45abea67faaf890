mod builder;
mod pcca;
mod report;

pub use builder::PccaBuilder;
pub use pcca::Pcca;
pub use report::{EmIteration, FitReport};
