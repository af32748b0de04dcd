use std::path::PathBuf;

use thiserror::Error;

use objdet_ingest::StageError;

use crate::state::IllegalTransition;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("a training run is already active ({run_id})")]
    Busy { run_id: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}

impl PipelineError {
    /// Name of the failed stage, if a stage failed.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage(e) => Some(e.stage),
            _ => None,
        }
    }
}
