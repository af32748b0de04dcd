use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("invalid run id '{0}': only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidRunId(String),
}
