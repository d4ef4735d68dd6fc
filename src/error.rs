//! Error kinds surfaced by the pipeline and its components.
//!
//! Every component returns a tagged [`BuildError`] so the engine (and its
//! callers) can tell a bad flag from a corrupt checkpoint from a failed mkfs
//! without parsing messages. Messages still name the failing operation, since
//! they are what the user sees.

use std::io;
use std::path::Path;

use thiserror::Error;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Conflicting or unknown run-mode flags.
    #[error("{0}")]
    Validation(String),

    /// Missing work directory or missing/corrupt checkpoint on resume.
    #[error("{0}")]
    Resume(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The layout descriptor could not be read or parsed.
    #[error("Error loading layout descriptor '{path}': {message}")]
    Descriptor { path: String, message: String },

    /// Overlapping structures, offsets outside the image, unresolved layout.
    #[error("{0}")]
    Geometry(String),

    #[error("{context}: {message}")]
    ExternalTool { context: String, message: String },

    #[error("Error running mkfs: {0}")]
    FilesystemBuild(String),

    #[error("{context}: {message}")]
    Hook { context: String, message: String },

    #[error("Error cleaning up workDir '{path}': {source}")]
    Cleanup {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn tool(context: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalTool {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn hook(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Hook {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Short kind label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Resume(_) => "resume",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Descriptor { .. } => "descriptor",
            Self::Geometry(_) => "geometry",
            Self::ExternalTool { .. } => "external-tool",
            Self::FilesystemBuild(_) => "filesystem-build",
            Self::Hook { .. } => "hook",
            Self::Cleanup { .. } => "cleanup",
        }
    }
}

/// `with_context` for plain `io::Result`, producing [`BuildError::Io`].
pub trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| BuildError::io(f(), source))
    }
}

pub(crate) fn display(path: &Path) -> String {
    path.display().to_string()
}
