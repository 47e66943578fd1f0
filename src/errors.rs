use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// A fetch or extraction failed in a way that may succeed on retry
    /// (timeout, connection reset, HTTP 429/5xx, empty extraction).
    TransientFetch(String),
    /// The source answered with a challenge page instead of content.
    Blocked(String),
    /// An SMTP handshake, MX resolution or WHOIS query exceeded its time budget.
    VerificationTimeout(String),
    /// A single write could not be applied; nothing was persisted for it.
    PersistenceConflict(String),
    /// A record carries neither a listing URL nor a usable phone number.
    MissingIdentity(String),
    /// Input that can never succeed, no matter how often it is retried.
    InvalidInput(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether the retry state machine should spend another attempt on this error.
    ///
    /// Blocked pages count as retryable: they consume an attempt and trigger
    /// identity rotation.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientFetch(_) | AppError::Blocked(_) | AppError::VerificationTimeout(_) => {
                true
            }
            AppError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::TransientFetch(msg) => write!(f, "Transient fetch error: {}", msg),
            AppError::Blocked(msg) => write!(f, "Blocked by challenge: {}", msg),
            AppError::VerificationTimeout(msg) => write!(f, "Verification timeout: {}", msg),
            AppError::PersistenceConflict(msg) => write!(f, "Persistence conflict: {}", msg),
            AppError::MissingIdentity(msg) => write!(f, "Missing identity: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::DatabaseError(e) => Some(e),
            AppError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound), // Simplified clone
            AppError::TransientFetch(msg) => AppError::TransientFetch(msg.clone()),
            AppError::Blocked(msg) => AppError::Blocked(msg.clone()),
            AppError::VerificationTimeout(msg) => AppError::VerificationTimeout(msg.clone()),
            AppError::PersistenceConflict(msg) => AppError::PersistenceConflict(msg.clone()),
            AppError::MissingIdentity(msg) => AppError::MissingIdentity(msg.clone()),
            AppError::InvalidInput(msg) => AppError::InvalidInput(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    ///
    /// Timeouts and connection failures are transient; everything else is not.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            AppError::TransientFetch(err.to_string())
        } else {
            AppError::InternalError(err.to_string())
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
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

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
