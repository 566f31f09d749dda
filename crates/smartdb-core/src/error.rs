//! Error types shared by every SmartDB operation.

use std::fmt;

/// Classification of a database error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fallback for unclassified failures
    Unknown,
    /// Bad configuration or missing required fields
    Configuration,
    /// Connection not open, pool closed, pool exhausted, lost connection
    Connection,
    /// Credential rejection by the backend
    Authentication,
    /// A deadline elapsed
    Timeout,
    /// Missing name or missing row
    NotFound,
    /// Caller-supplied argument is invalid
    InvalidArgument,
    /// begin/commit/rollback in an invalid state
    Transaction,
    /// SELECT-side failure
    Query,
    /// Mutation-side failure
    Execution,
    /// Unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// All kinds, in a stable order. Used by [`ErrorCounters`].
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Unknown,
        ErrorKind::Configuration,
        ErrorKind::Connection,
        ErrorKind::Authentication,
        ErrorKind::Timeout,
        ErrorKind::NotFound,
        ErrorKind::InvalidArgument,
        ErrorKind::Transaction,
        ErrorKind::Query,
        ErrorKind::Execution,
        ErrorKind::Internal,
    ];

    /// Stable string form, used in structured log events.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "Unknown",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::Connection => "Connection",
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Transaction => "Transaction",
            ErrorKind::Query => "Query",
            ErrorKind::Execution => "Execution",
            ErrorKind::Internal => "Internal",
        }
    }

    const fn index(self) -> usize {
        match self {
            ErrorKind::Unknown => 0,
            ErrorKind::Configuration => 1,
            ErrorKind::Connection => 2,
            ErrorKind::Authentication => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::InvalidArgument => 6,
            ErrorKind::Transaction => 7,
            ErrorKind::Query => 8,
            ErrorKind::Execution => 9,
            ErrorKind::Internal => 10,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified database error.
///
/// `code` is driver-defined (0 when unused). `retryable` tells callers and
/// the pool whether retrying the operation may succeed; a Timeout is always
/// retryable.
#[derive(Debug, Clone)]
pub struct Error {
    code: i32,
    message: String,
    kind: ErrorKind,
    retryable: bool,
}

impl Error {
    /// Create an error of the given kind. Code is 0; retryable defaults to
    /// false except for Timeout.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            kind,
            retryable: matches!(kind, ErrorKind::Timeout),
        }
    }

    /// Create an unclassified error (kind=Unknown, not retryable).
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a driver-defined numeric code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Set the retryable flag. Timeouts stay retryable no matter what.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable || matches!(self.kind, ErrorKind::Timeout);
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Re-classify an error while keeping its code, message and retryable
    /// flag. Drivers use this to fold a shared execution path into the
    /// kind required by the operation (e.g. Transaction for begin/commit).
    pub fn into_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self.retryable = self.retryable || matches!(kind, ErrorKind::Timeout);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code != 0 {
            write!(f, "{} error ({}): {}", self.kind, self.code, self.message)
        } else {
            write!(f, "{} error: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used across the whole workspace.
pub type DbResult<T> = Result<T, Error>;

/// Monotone per-kind failure counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    counts: [u64; 11],
}

impl ErrorCounters {
    /// Record one failure of the given kind.
    pub fn increment(&mut self, kind: ErrorKind) {
        self.counts[kind.index()] += 1;
    }

    /// Failures recorded for one kind.
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counts[kind.index()]
    }

    /// Failures recorded across all kinds.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
