use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("duplicate schema path: {0}")]
    DuplicatePath(String),

    #[error("cannot write through `{path}`: {reason}")]
    PathConflict { path: String, reason: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
