use crate::models::*;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Exchange Trait
// ---------------------------------------------------------------------------

/// Errors that can occur talking to the exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The exchange time endpoint could not be read; signed calls must not
    /// proceed on a guessed clock.
    #[error("Time source unavailable: {0}")]
    TimeSourceUnavailable(String),
    /// A signing secret or API key is absent or empty.
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
    /// The exchange answered with a non-success status. The message is the
    /// exchange's own wording. Never retried automatically.
    #[error("Exchange rejected request (HTTP {status}): {message}")]
    ExchangeRejected { status: u16, message: String },
    /// No price could be obtained for one asset. Recoverable per asset.
    #[error("No quote for {asset}: {reason}")]
    QuoteUnavailable { asset: String, reason: String },
    /// The request never produced an HTTP status (DNS, connect, timeout).
    #[error("Transport error: {0}")]
    Transport(String),
    /// A success response was missing or mistyped a required field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// The console's view of the exchange: submit orders, read balances and
/// prices. Implementations must be shareable across handlers.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Submit an order and return the validated execution report.
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderReport, ExchangeError>;

    /// Fetch every asset balance on the account.
    async fn account_balances(&self) -> Result<Vec<Balance>, ExchangeError>;

    /// Current price of `asset` quoted in `reference` (e.g. BTC in USDT).
    async fn price(&self, asset: &str, reference: &str) -> Result<PriceQuote, ExchangeError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), ExchangeError>;
}
