//! Unified error handling for unikit
//!
//! Every subsystem reports through `AppError`; request dispatch has its own
//! `RequestError` so callers can tell an abort from a real failure.

use std::fmt;

/// Boxed error type produced by initialization actions.
pub type InitActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Application-level error types
#[derive(Debug)]
pub enum AppError {
    /// Configuration-related errors
    Configuration(String),

    /// Validation errors
    Validation(String),

    /// A lazily constructed component was accessed before it existed
    NotInitialized(String),

    /// Plugin construction or installation errors
    Plugin(String),

    /// Navigation was blocked or could not be resolved
    Navigation(String),

    /// Resource not found errors
    NotFound(String),

    /// File system and I/O errors
    Io(std::io::Error),

    /// Request dispatch errors
    Request(RequestError),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            AppError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AppError::NotInitialized(msg) => write!(f, "Not initialized: {msg}"),
            AppError::Plugin(msg) => write!(f, "Plugin error: {msg}"),
            AppError::Navigation(msg) => write!(f, "Navigation error: {msg}"),
            AppError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            AppError::Io(err) => write!(f, "I/O error: {err}"),
            AppError::Request(err) => write!(f, "Request error: {err}"),
            AppError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        AppError::Request(err)
    }
}

/// Result type alias for application operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the request engine.
///
/// Every dispatch failure rejects the caller's future with one of these kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The controller was aborted by `cancel()`, by race-condition eviction,
    /// or the transport reported an abort.
    Abort { request_id: String },

    /// The transport failed before producing a response (network, DNS, timeout).
    Transport { message: String },

    /// The transport completed but its status marker was not the OK sentinel.
    Response { message: String },

    /// An interceptor rejected the request or response.
    Interceptor { message: String },

    /// The merged options could not be turned into a transport request.
    InvalidOptions { message: String },
}

impl RequestError {
    pub fn abort(request_id: impl Into<String>) -> Self {
        RequestError::Abort {
            request_id: request_id.into(),
        }
    }

    pub fn interceptor(message: impl Into<String>) -> Self {
        RequestError::Interceptor {
            message: message.into(),
        }
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        RequestError::InvalidOptions {
            message: message.into(),
        }
    }

    /// True for the abort kind, regardless of what triggered it.
    pub fn is_abort(&self) -> bool {
        matches!(self, RequestError::Abort { .. })
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Abort { request_id } => write!(f, "request {request_id} aborted"),
            RequestError::Transport { message } => write!(f, "request failed: {message}"),
            RequestError::Response { message } => write!(f, "bad response: {message}"),
            RequestError::Interceptor { message } => write!(f, "interceptor rejected: {message}"),
            RequestError::InvalidOptions { message } => write!(f, "invalid options: {message}"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Result type alias for request operations
pub type RequestResult<T> = std::result::Result<T, RequestError>;

/// A registered initialization task failed.
///
/// Wraps the original error so the chain can be walked with `source()`.
#[derive(Debug)]
pub struct InitTaskError {
    pub name: Option<String>,
    pub order: i32,
    /// Position in the sorted execution queue
    pub position: usize,
    pub source: InitActionError,
}

impl fmt::Display for InitTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(
                f,
                "init task '{name}' (order {}, #{}) failed",
                self.order, self.position
            ),
            None => write!(
                f,
                "init task #{} (order {}) failed",
                self.position, self.order
            ),
        }
    }
}

impl std::error::Error for InitTaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> AppResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Internal(format!("{context}: {e}")))
    }
}

/// Renders an error followed by its whole `source()` chain, one cause per
/// line, each indented two spaces deeper than the last.
pub struct ErrorChain<'a>(pub &'a (dyn std::error::Error + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut depth = 1;
        let mut cause = self.0.source();
        while let Some(err) = cause {
            write!(f, "\n{:indent$}caused by: {err}", "", indent = depth * 2)?;
            depth += 1;
            cause = err.source();
        }
        Ok(())
    }
}

/// Build an `AppError::Configuration` from format arguments
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::core::AppError::Configuration(format!($($arg)+))
    };
}
