use std::io;
use std::path::PathBuf;

use attendrs_vision::VisionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("face storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write student {student}: {source}")]
    StorageWrite {
        student: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to store face image for {student}: {source}")]
    FaceWrite {
        student: String,
        #[source]
        source: VisionError,
    },

    #[error("student {0} is already registered")]
    DuplicateStudent(String),

    #[error("student {0} is not registered")]
    UnknownStudent(String),

    #[error("invalid student id '{id}': {message}")]
    InvalidStudentId { id: String, message: String },

    #[error("invalid student record: {0}")]
    InvalidRecord(String),

    #[error("student metadata {path} is invalid: {source}")]
    RecordParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("candidate has no usable face image ({provided} provided)")]
    NoUsableCandidate { provided: usize },

    #[error("candidate has {usable} usable face image(s), {required} required")]
    TooFewCandidateImages { usable: usize, required: usize },

    #[error("similarity engine error: {0}")]
    Vision(#[from] VisionError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to append audit record to {path}: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode JSON record: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type GateResult<T> = std::result::Result<T, GateError>;
