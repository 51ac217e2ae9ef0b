use std::sync::Arc;

use tokio::sync::Mutex;
use tradedesk_core::Exchange;
use tradedesk_portfolio::NormalizerConfig;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub exchange: Arc<dyn Exchange>,
    /// Operator PIN gating order placement. Checked with a local equality
    /// comparison; advisory only, not a security boundary.
    pin: String,
    pub normalizer: NormalizerConfig,
    /// Held across a portfolio refresh so overlapping polls cannot
    /// interleave partial reads. At most one refresh is in flight.
    pub refresh: Mutex<()>,
}

impl AppState {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        pin: impl Into<String>,
        normalizer: NormalizerConfig,
    ) -> Self {
        Self {
            exchange,
            pin: pin.into(),
            normalizer,
            refresh: Mutex::new(()),
        }
    }

    /// An empty configured PIN refuses every order rather than waving
    /// them all through.
    pub fn pin_matches(&self, supplied: &str) -> bool {
        !self.pin.is_empty() && self.pin == supplied
    }
}
