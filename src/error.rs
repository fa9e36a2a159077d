use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Only the current document failed; the caller may continue with the next one
    Content,
    /// The environment is broken; the whole run must stop
    Fatal,
}

/// Main error type for parsing and extraction
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML file '{}' does not exist or cannot be opened", path.display())]
    NotFound { path: PathBuf },

    #[error("Malformed XML in {document}: {details}")]
    Malformed { document: String, details: String },

    #[error("Could not write captured value to '{}': {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading {document}: {source}")]
    Io {
        document: String,
        #[source]
        source: std::io::Error,
    },

    #[error("XML parser engine could not be configured: {details}")]
    Engine { details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },

    #[error("File system traversal error: {} - {reason}", path.display())]
    FileSystemTraversal { path: PathBuf, reason: String },
}

impl XmlError {
    pub fn severity(&self) -> Severity {
        match self {
            XmlError::NotFound { .. }
            | XmlError::Malformed { .. }
            | XmlError::Sink { .. }
            | XmlError::FileSystemTraversal { .. } => Severity::Content,
            XmlError::Io { .. }
            | XmlError::Engine { .. }
            | XmlError::Config(_)
            | XmlError::Concurrency { .. } => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub(crate) fn malformed(document: &str, details: impl std::fmt::Display) -> Self {
        XmlError::Malformed {
            document: document.to_string(),
            details: details.to_string(),
        }
    }
}

impl From<ConfigError> for XmlError {
    fn from(err: ConfigError) -> Self {
        XmlError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, XmlError>;
