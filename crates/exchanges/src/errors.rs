//! Exchange error taxonomy
//!
//! Transport and protocol failures keep the exchange's own wording. Order
//! reconciliation resolves them into the domain kinds (`OrderExecuted`,
//! `OrderNotFound`, `NewOrderRejected`, `OrderCollision`, ...) and wraps them with
//! context. Predicates look through the wrapping, so callers can branch on the
//! underlying kind no matter how much context was attached.

use thiserror::Error;

use unitrade_core::RetryError;
use unitrade_core::fixed::FixedError;

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Fixed point error: {0}")]
    FixedPointError(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("order executed")]
    OrderExecuted,

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("new order rejected: {0}")]
    NewOrderRejected(String),

    #[error("different order with same ClientOrderID ({client_order_id}) was placed")]
    OrderCollision { client_order_id: String },

    #[error("too many orders with same clientOrderID")]
    AmbiguousOrder,

    #[error("order is not canceled, status {0}")]
    OrderNotCanceled(String),

    #[error("inconsistent exchange response: {0}")]
    InconsistentResponse(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ExchangeError>,
    },

    #[error("{source} [Subreason: {context}: {subreason}]")]
    WithSubreason {
        #[source]
        source: Box<ExchangeError>,
        subreason: Box<ExchangeError>,
        context: String,
    },
}

impl ExchangeError {
    /// Wrap with a short description of what was being done.
    pub fn context(self, context: impl Into<String>) -> Self {
        ExchangeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Keep `self` as the primary cause and attach a secondary failure as detail.
    pub fn with_subreason(self, context: impl Into<String>, subreason: ExchangeError) -> Self {
        ExchangeError::WithSubreason {
            source: Box::new(self),
            subreason: Box::new(subreason),
            context: context.into(),
        }
    }

    /// Innermost primary cause.
    pub fn root(&self) -> &ExchangeError {
        let mut current = self;
        loop {
            match current {
                ExchangeError::WithContext { source, .. }
                | ExchangeError::WithSubreason { source, .. } => current = source,
                other => return other,
            }
        }
    }

    pub fn is_order_executed(&self) -> bool {
        matches!(self.root(), ExchangeError::OrderExecuted)
    }

    pub fn is_order_not_found(&self) -> bool {
        matches!(self.root(), ExchangeError::OrderNotFound(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.root(), ExchangeError::NewOrderRejected(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ExchangeError::Cancelled)
    }

    /// True when a collision is the primary cause or one of the attached subreasons.
    pub fn is_order_collision(&self) -> bool {
        match self {
            ExchangeError::OrderCollision { .. } => true,
            ExchangeError::WithContext { source, .. } => source.is_order_collision(),
            ExchangeError::WithSubreason { source, subreason, .. } => {
                source.is_order_collision() || subreason.is_order_collision()
            }
            _ => false,
        }
    }

    /// Exchange error code when the root cause is an API error.
    pub fn api_code(&self) -> Option<i64> {
        match self.root() {
            ExchangeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Attach context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}

impl From<FixedError> for ExchangeError {
    fn from(err: FixedError) -> Self {
        Self::FixedPointError(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<RetryError<ExchangeError>> for ExchangeError {
    fn from(err: RetryError<ExchangeError>) -> Self {
        match err {
            RetryError::Cancelled => ExchangeError::Cancelled,
            RetryError::Failed(e) => e,
        }
    }
}
