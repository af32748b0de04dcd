use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one pipeline run.
///
/// ```text
/// NotStarted → Ingesting → Ingested → Completed
///                        ↘ IngestionFailed
/// ```
///
/// Validation, training and push stages would slot in between `Ingested` and `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    Ingesting,
    Ingested,
    IngestionFailed,
    Completed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal pipeline transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl PipelineState {
    pub fn advance(self, to: Self) -> Result<Self, IllegalTransition> {
        use PipelineState::*;
        match (self, to) {
            (NotStarted, Ingesting)
            | (Ingesting, Ingested)
            | (Ingesting, IngestionFailed)
            | (Ingested, Completed) => Ok(to),
            _ => Err(IllegalTransition { from: self, to }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Ingesting => "ingesting",
            Self::Ingested => "ingested",
            Self::IngestionFailed => "ingestion_failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
