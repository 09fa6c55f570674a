//! Error types for toolchain bootstrapping.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required value is missing or inconsistent after cascading.
    #[error("{0}")]
    Config(String),

    /// Size or SHA-256 mismatch of a downloaded artifact.
    #[error("{path}: expected {what} {expected}, found {what} {actual}")]
    Integrity {
        path: PathBuf,
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("GET {url}: {message}")]
    Network { url: String, message: String },

    #[error("{command} failed: {status}")]
    Subprocess { command: String, status: String },

    /// An archive entry fell outside the expected prefix.
    #[error("{archive}: unexpected entry {entry} (expected prefix {expected})")]
    ArchiveShape {
        archive: PathBuf,
        entry: String,
        expected: String,
    },

    #[error("{tool} was not installed because {dependency} failed")]
    Dependency { tool: String, dependency: String },

    #[error("template {name}: {message}")]
    Template { name: String, message: String },

    #[error("failed to parse {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize {path}: {source}")]
    TomlWrite {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

/// Attach a short description to `std::io` failures.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::io(context(), source))
    }
}
