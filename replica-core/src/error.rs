use replica_scanner::ScanError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// Fatal: the run cannot start or cannot continue.
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to rewrite {target}: {reason}")]
    Rewrite { target: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl MirrorError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rewrite(target: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::Rewrite {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
