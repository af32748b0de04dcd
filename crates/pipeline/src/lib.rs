//! Training pipeline orchestration: stage sequencing, run state and run tracking.

pub mod error;
pub mod registry;
pub mod state;
pub mod training;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::PipelineError;
pub use registry::{RunRecord, RunRegistry, RunStatus};
pub use state::{IllegalTransition, PipelineState};
pub use training::{ArchiveRetention, PipelineOutcome, TrainPipeline};
