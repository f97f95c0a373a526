// ABOUTME: Error types for the big-export pipeline
// ABOUTME: Categorized export errors, browser process errors and context errors

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed taxonomy of export failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Validation,
    Renderer,
    Browser,
    Filesystem,
    Timeout,
    Memory,
    Network,
    Configuration,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Renderer => "renderer",
            ErrorType::Browser => "browser",
            ErrorType::Filesystem => "filesystem",
            ErrorType::Timeout => "timeout",
            ErrorType::Memory => "memory",
            ErrorType::Network => "network",
            ErrorType::Configuration => "configuration",
        }
    }

    /// Whether errors of this type are retryable when nothing more specific is known.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorType::Timeout | ErrorType::Browser | ErrorType::Memory | ErrorType::Network
        )
    }

    /// Code used when the failure site does not supply a more specific one.
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorType::Validation => "VALIDATION_ERROR",
            ErrorType::Renderer => "RENDERER_ERROR",
            ErrorType::Browser => "BROWSER_ERROR",
            ErrorType::Filesystem => "FILESYSTEM_ERROR",
            ErrorType::Timeout => "TIMEOUT_ERROR",
            ErrorType::Memory => "MEMORY_ERROR",
            ErrorType::Network => "NETWORK_ERROR",
            ErrorType::Configuration => "CONFIGURATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized export error. Everything leaving `ExportService` is one of these.
#[derive(Error, Debug)]
pub struct ExportError {
    pub kind: ErrorType,
    pub message: String,
    pub details: Option<String>,
    pub code: String,
    pub retryable: bool,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " - {}", details)?;
        }
        Ok(())
    }
}

impl ExportError {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            code: kind.default_code().to_string(),
            retryable: kind.default_retryable(),
            cause: None,
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, message)
            .with_code(format!("INVALID_{}", field.to_uppercase()))
            .with_details(format!("field: {}", field))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Configuration, message)
    }

    pub fn filesystem(message: impl Into<String>, cause: std::io::Error) -> Self {
        Self::new(ErrorType::Filesystem, message).with_cause(cause)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Terminal error for a context that finished before the export did.
    pub fn from_context(err: ContextError, during: &str) -> Self {
        let code = match err {
            ContextError::Canceled => "CANCELLED",
            ContextError::DeadlineExceeded => "DEADLINE_EXCEEDED",
        };
        Self::new(ErrorType::Timeout, format!("export {} {}", err, during))
            .with_code(code)
            .with_retryable(false)
            .with_cause(err)
    }
}

/// Errors from locating and driving the headless browser.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("chrome executable not found: {0}")]
    NotFound(String),

    #[error("chrome liveness probe failed: {0}")]
    Unavailable(String),

    #[error("invalid path (directory traversal is not allowed): {0:?}")]
    InvalidPath(PathBuf),

    #[error("failed to launch chrome: {source}")]
    LaunchFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed: {status}\noutput: {output}")]
    CommandFailed {
        operation: &'static str,
        status: String,
        output: String,
    },

    #[error("{operation} timeout: deadline exceeded\noutput: {output}")]
    Timeout {
        operation: &'static str,
        output: String,
    },

    #[error("{operation} canceled\noutput: {output}")]
    Canceled {
        operation: &'static str,
        output: String,
    },

    #[error("{operation} reported success but produced no output file at {path:?}")]
    OutputMissing {
        operation: &'static str,
        path: PathBuf,
    },

    #[error("browser cleanup finished with {} failure(s): {}", .0.len(), .0.join("; "))]
    Cleanup(Vec<String>),

    #[error("browser I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a `Context` is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, ExportError>;
