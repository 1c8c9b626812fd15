use std::path::PathBuf;

use thiserror::Error;

/// Unified application error type; every pipeline stage bubbles one of these.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Data validation failed. {0}")]
    DataValidation(#[from] ValidationError),
    #[error(
        "No items left after filtering with a minimum frequency of {threshold}. Lower the threshold."
    )]
    EmptyResult { threshold: u64 },
    #[error("Invalid configuration. {0}")]
    Configuration(String),
    #[error("Unable to render the map. {0}")]
    Render(String),
    #[error("{} of {total} maps could not be produced: {}", failed.len(), failed.join(", "))]
    MapsFailed { failed: Vec<String>, total: usize },
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Error serializing json. {0}")]
    SerdeJsonSer(#[from] serde_json::Error),
    #[error("Error reading the config file {}. {source}", path.display())]
    Toml {
        path: PathBuf,
        source: serde_path_to_error::Error<toml::de::Error>,
    },
    #[error("Error encoding a cached topic model. {0}")]
    CacheEncode(#[from] bincode::error::EncodeError),
    #[error("Error decoding a cached topic model. {0}")]
    CacheDecode(#[from] bincode::error::DecodeError),
    #[error("Directory not found error. {0}")]
    Dir(#[from] topic_atlas_dirs::DirError),
    #[error("Error parsing the duration string. {0}")]
    DurationParse(#[from] humantime::DurationError),
}

/// Reasons an input file is rejected before any clustering happens.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is missing required column(s): {}", path.display(), columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },
    #[error("embedding matrix has {embeddings} rows but the table has {rows} rows")]
    ShapeMismatch { embeddings: usize, rows: usize },
    #[error("{} must hold a 2D array, found shape {shape:?}", path.display())]
    NotTwoDimensional { path: PathBuf, shape: Vec<usize> },
    #[error("{} uses unsupported dtype {descr:?}", path.display())]
    UnsupportedDtype { path: PathBuf, descr: String },
    #[error("{} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("{} has a non-finite value in row {row}", path.display())]
    NonFinite { path: PathBuf, row: usize },
    #[error("{}, line {line}: invalid {column} value {value:?}", path.display())]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
}

impl ValidationError {
    pub(crate) fn malformed<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
