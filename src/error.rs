use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

/// Errors surfaced by the bot's subsystems.
///
/// `ExchangeRejection` deliberately keeps the venue's raw message out of its
/// Display output; the reason is logged at the call site and callers only see
/// the numeric code.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network-level or venue-side transient failure; safe to retry
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// The venue rejected the request outright
    #[error("exchange rejected request (code {code})")]
    ExchangeRejection { code: i64, reason: String },

    /// Quantity did not survive filter normalization
    #[error("quantity {raw} for {symbol} normalized to unsubmittable {normalized}")]
    InvalidQuantity {
        symbol: String,
        raw: f64,
        normalized: f64,
    },

    /// Local records and exchange reality no longer agree
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl BotError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::Transient(_))
    }

    /// Display string with venue text stripped, suitable for user-facing
    /// surfaces.
    pub fn safe_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::Transient(e.to_string())
    }
}
