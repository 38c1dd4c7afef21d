use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::timestamp::SUPPORTED_FORMATS;

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("invalid partition path: {0}")]
    InvalidPath(String),

    #[error("unknown aggregation level: {0}")]
    InvalidLevel(String),

    #[error("download of {url} failed: {message}")]
    DownloadHttp { url: String, message: String },

    #[error("download of {url} returned status {status}: {message}")]
    DownloadStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read cached dataset: {0}")]
    Dataset(String),

    #[error("column `{column}` not present in the {level} dataset")]
    MissingColumn { level: String, column: String },

    #[error("timestamp is empty")]
    EmptyTimestamp,

    #[error(
        "unrecognized timestamp format: {value:?}; supported formats: {}",
        SUPPORTED_FORMATS.join(", ")
    )]
    UnrecognizedFormat { value: String },

    #[error("invalid date in timestamp {value:?}: {message}")]
    InvalidDate { value: String, message: String },

    #[error("timestamp must be text or a date-time value, got {0}")]
    InvalidType(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}
