use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExpdbError {
    #[error("invalid modality: {0}")]
    InvalidModality(String),

    #[error("invalid data type: {0}")]
    InvalidDataType(String),

    #[error("invalid sampling rate: {0}")]
    InvalidSamplingRate(f64),

    #[error("transform names and params must have the same length: {names} != {params}")]
    TransformLength { names: usize, params: usize },

    #[error("malformed transform JSON: {0}")]
    TransformJson(String),

    #[error("{0}")]
    Validation(String),

    #[error("payload shape rejected: {0}")]
    Shape(String),

    #[error("file name must have extension {expected} but was given {actual}")]
    ExtensionMismatch { expected: String, actual: String },

    #[error("no codec registered for {0}")]
    UnsupportedPayload(String),

    #[error("failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("failed to encode {path}: {message}")]
    Encode { path: String, message: String },

    #[error("source tree has uncommitted changes; refusing to record unreproducible provenance")]
    #[diagnostic(help("commit your changes or enable debug mode (environment: development)"))]
    UnreproducibleState,

    #[error("source control query failed: {0}")]
    SourceControl(String),

    #[error("transport failed for {uri}: {message}")]
    Transport { uri: String, message: String },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid bucket format: {0}, expected scheme://bucket_name/")]
    InvalidBucketFormat(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("media transcoding failed: {0}")]
    Transcode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ExpdbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ExpdbError::Integrity(message.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => ExpdbError::Database(err.to_string()),
        }
    }
}
