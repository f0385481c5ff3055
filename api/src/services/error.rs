//! Error handling utilities for route handlers

use axum::http::StatusCode;

/// Status plus the plain-text body sent back to the caller.
pub type Rejection = (StatusCode, &'static str);

/// Extension trait for logging errors and converting them into a [`Rejection`]
pub trait LogErr<T> {
    /// Log error with context and return 500 with the given body
    fn log_500(self, context: &str, body: &'static str) -> Result<T, Rejection>;

    /// Log error with context and return a custom status and body
    fn log_status(self, context: &str, status: StatusCode, body: &'static str)
    -> Result<T, Rejection>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str, body: &'static str) -> Result<T, Rejection> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            (StatusCode::INTERNAL_SERVER_ERROR, body)
        })
    }

    fn log_status(
        self,
        context: &str,
        status: StatusCode,
        body: &'static str,
    ) -> Result<T, Rejection> {
        self.map_err(|e| {
            tracing::warn!(error = %e, status = status.as_u16(), "{context}");
            (status, body)
        })
    }
}
