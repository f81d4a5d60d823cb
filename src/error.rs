use thiserror::Error;

/// Error taxonomy from spec section 7. Every fallible core operation returns one of
/// these; the gateway maps them 1:1 onto the wire's stable machine codes and never
/// forwards anything else (no paths, no stack traces, no engine internals).
#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("internal error")]
    Internal(String),
}

impl AppError {
    /// Stable machine code carried on every `error` reply.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Unavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    /// Human-readable message. `Internal` never leaks its detail to callers; the
    /// detail is only available via `tracing::error!` at the call site.
    pub fn message(&self) -> String {
        match self {
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
