//! Error types shared by every backend and by the query facade.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ResultError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultError {
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("schema mismatch in {dataset}: {message}")]
    SchemaMismatch { dataset: String, message: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Network registries disagree with the counts declared by the index.
    #[error("structural error: {0}")]
    Structural(String),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("unknown result type: {0}")]
    UnknownResultType(String),

    #[error("unsupported result file: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("no long profile has been resolved")]
    NoLongProfile,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("NetCDF call {call} failed with status {status}: {message}")]
    NetCdfStatus {
        call: &'static str,
        status: i32,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl ResultError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        ResultError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn schema(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        ResultError::SchemaMismatch {
            dataset: dataset.into(),
            message: message.into(),
        }
    }
}

/// Failures while walking the channel network.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("channel {0} is not part of the 1D network")]
    UnknownChannel(String),

    #[error("channels {from} and {to} are not connected")]
    NotConnected { from: String, to: String },

    #[error("downstream walk from {0} revisits a channel (cyclic network)")]
    Cycle(String),
}
