//! Error categorization for executor failures.
//!
//! Every failed unit of work is reported as an [`ExecutionError`] carrying an
//! [`ErrorCategory`], so results can be broken down by failure type (client
//! errors, server errors, network issues, timeouts, panics) in the summary.

use std::fmt;
use std::time::Duration;

/// Categories of errors that can occur while executing a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// The executor did not finish before its timeout
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// The executor panicked
    Panic,

    /// Other/unknown errors, including plain failures from generic executors
    OtherError,
}

impl ErrorCategory {
    /// Number of categories, used to size per-category counter arrays.
    pub const COUNT: usize = 7;

    /// Categorize an HTTP status code.
    ///
    /// Returns None if the status is a success (2xx/3xx).
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            let error_msg = error.to_string().to_lowercase();

            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                ErrorCategory::TlsError
            } else if error_msg.contains("timeout") {
                ErrorCategory::TimeoutError
            } else if error_msg.contains("dns")
                || error_msg.contains("resolve")
                || error_msg.contains("connect")
            {
                ErrorCategory::NetworkError
            } else {
                ErrorCategory::OtherError
            }
        }
    }

    /// Get the metric label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::Panic => "panic",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::Panic => "Executor Panics",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// Stable position of this category in [`ErrorCategory::all`].
    pub fn index(&self) -> usize {
        match self {
            ErrorCategory::ClientError => 0,
            ErrorCategory::ServerError => 1,
            ErrorCategory::NetworkError => 2,
            ErrorCategory::TimeoutError => 3,
            ErrorCategory::TlsError => 4,
            ErrorCategory::Panic => 5,
            ErrorCategory::OtherError => 6,
        }
    }

    /// Get all error categories in a consistent order.
    pub fn all() -> [ErrorCategory; Self::COUNT] {
        [
            ErrorCategory::ClientError,
            ErrorCategory::ServerError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::TlsError,
            ErrorCategory::Panic,
            ErrorCategory::OtherError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// The error half of an executor outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub category: ErrorCategory,

    /// HTTP status code if available
    pub status_code: Option<u16>,

    pub message: String,
}

impl ExecutionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status_code: None,
            message: message.into(),
        }
    }

    /// A failure without a more specific category.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::OtherError, message)
    }

    /// Create an error from a non-success HTTP status code.
    ///
    /// Returns None for 2xx/3xx codes.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Option<Self> {
        ErrorCategory::from_status_code(status_code).map(|category| Self {
            category,
            status_code: Some(status_code),
            message: message.into(),
        })
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status_code: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorCategory::TimeoutError,
            format!("execution timed out after {:?}", after),
        )
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Panic, message)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(
                f,
                "[{}] HTTP {}: {}",
                self.category.label(),
                status,
                self.message
            )
        } else {
            write!(f, "[{}] {}", self.category.label(), self.message)
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self::other(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self::other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_success_codes() {
        assert_eq!(ErrorCategory::from_status_code(200), None);
        assert_eq!(ErrorCategory::from_status_code(204), None);
        assert_eq!(ErrorCategory::from_status_code(302), None);
    }

    #[test]
    fn test_categorize_error_codes() {
        assert_eq!(
            ErrorCategory::from_status_code(404),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(429),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(503),
            Some(ErrorCategory::ServerError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(101),
            Some(ErrorCategory::OtherError)
        );
    }

    #[test]
    fn test_indices_match_all_order() {
        for (i, category) in ErrorCategory::all().iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::from_status(503, "unavailable").unwrap();
        assert_eq!(err.to_string(), "[server_error] HTTP 503: unavailable");

        let err = ExecutionError::timeout(Duration::from_millis(250));
        assert_eq!(err.category, ErrorCategory::TimeoutError);
        assert!(err.to_string().starts_with("[timeout_error]"));
    }

    #[test]
    fn test_from_string_is_other() {
        let err: ExecutionError = "boom".into();
        assert_eq!(err.category, ErrorCategory::OtherError);
        assert_eq!(err.message, "boom");
    }
}
