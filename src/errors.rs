use std::fmt;

/// Pipeline-level error types.
///
/// Per-source fetch failures are a separate, retryable taxonomy
/// ([`FetchError`]); `AppError` covers the paths that can actually
/// stop a run or skip a row.
#[derive(Debug)]
pub enum AppError {
    /// Input row unusable (missing identity anchor, unparseable fields).
    /// Skipped and logged, never fatal to the batch.
    Validation(String),
    /// Storage-layer failure. The only fatal condition: the run aborts
    /// rather than silently losing results.
    Storage(sqlx::Error),
    /// Reading the batch file or writing the result file failed.
    Io(std::io::Error),
    /// Malformed delimited input that the reader itself rejects.
    Csv(csv::Error),
    /// Invalid runtime configuration detected after startup.
    Config(String),
    /// Invariant violation inside the pipeline.
    Internal(String),
    /// Error with context chain for better diagnostics.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Storage(e) => write!(f, "Storage error: {}", e),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Csv(e) => write!(f, "CSV error: {}", e),
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Csv(err)
    }
}

/// Failure taxonomy for one source-adapter call.
///
/// `NotFound` is a success-shaped absence: the registry answered and
/// confirmed there is no record. It is terminal, never retried and never
/// logged as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure: timeout, refused connection, 5xx, blocked
    /// proxy.
    Network(String),
    /// The source answered but the body could not be decoded.
    Parse(String),
    /// The source signalled throttling (429) or the local token bucket
    /// deadline elapsed.
    RateLimited(String),
    /// Registry confirms the entity has no record.
    NotFound,
    /// The per-source circuit breaker is open; call rejected locally.
    CircuitOpen,
}

impl FetchError {
    /// Whether the retry controller may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Parse(_) | FetchError::RateLimited(_)
        )
    }

    /// Whether this outcome counts as a source failure for proxy health
    /// and circuit-breaker accounting.
    pub fn is_failure(&self) -> bool {
        !matches!(self, FetchError::NotFound)
    }

    /// Stable label used in error logs and the API-call audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network_failure",
            FetchError::Parse(_) => "parse_failure",
            FetchError::RateLimited(_) => "rate_limited",
            FetchError::NotFound => "not_found",
            FetchError::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "network failure: {}", msg),
            FetchError::Parse(msg) => write!(f, "parse failure: {}", msg),
            FetchError::RateLimited(msg) => write!(f, "rate limited: {}", msg),
            FetchError::NotFound => write!(f, "not found"),
            FetchError::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    /// Maps transport errors to `Network` and body-decode errors to `Parse`.
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if err.is_timeout() {
            FetchError::Network(format!("timeout: {}", err))
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error so storage calls can be annotated at the call
/// site without an intermediate `map_err`.
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Storage(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Storage(e)),
            context: f(),
        })
    }
}
