use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KfreqError>;

#[derive(Debug, Error)]
pub enum KfreqError {
    /// Bad parameters, caught before any file is touched
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("could not parse sequences in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: needletail::errors::ParseError,
    },

    /// Persisted table is not in a recognized layout
    #[error("format error: {0}")]
    Format(String),

    #[error("invalid k-mer: {0}")]
    InvalidKmer(String),
}

impl KfreqError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KfreqError::Io {
            path: path.into(),
            source,
        }
    }
}
