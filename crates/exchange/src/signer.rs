use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use tradedesk_core::ExchangeError;

use crate::params::RequestParams;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Clock drift
// ---------------------------------------------------------------------------

/// Offset of the exchange clock relative to ours, in milliseconds, at one
/// sampling instant. Positive means the exchange clock is ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDrift(pub i64);

impl ClockDrift {
    pub fn millis(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimeResponse {
    server_time: i64,
}

// ---------------------------------------------------------------------------
// Request signer
// ---------------------------------------------------------------------------

/// Signs authenticated requests with a timestamp corrected for drift between
/// our clock and the exchange's.
///
/// The exchange rejects any request whose timestamp falls outside its receive
/// window, so timestamps are never taken from the local clock alone: every
/// one is built from a fresh drift measurement. Nothing is cached between
/// calls.
#[derive(Clone)]
pub struct RequestSigner {
    http: Client,
    base_url: String,
    secret: String,
    local_clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl RequestSigner {
    pub fn new(http: Client, base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            secret: secret.into(),
            local_clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Replace the local clock. Tests use this to pin timestamps.
    pub fn with_local_clock(mut self, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.local_clock = clock;
        self
    }

    /// Measure `server_time - local_time` in milliseconds.
    ///
    /// The local clock is sampled once the server time is in hand, after the
    /// response arrives. Any failure to reach or read the time endpoint is
    /// `TimeSourceUnavailable`; callers must not fall back to zero drift.
    pub async fn measure_drift(&self) -> Result<ClockDrift, ExchangeError> {
        let url = format!("{}/api/v3/time", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::TimeSourceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::TimeSourceUnavailable(format!(
                "time endpoint answered HTTP {}",
                status.as_u16()
            )));
        }

        let body: ServerTimeResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::TimeSourceUnavailable(e.to_string()))?;

        let local_ms = (self.local_clock)();
        let drift = ClockDrift(body.server_time - local_ms);
        debug!(drift_ms = drift.0, "measured exchange clock drift");
        Ok(drift)
    }

    /// A timestamp the exchange will accept: local now plus freshly measured
    /// drift. Drift is re-measured on every call.
    pub async fn adjusted_timestamp(&self) -> Result<i64, ExchangeError> {
        let drift = self.measure_drift().await?;
        Ok((self.local_clock)() + drift.0)
    }

    /// HMAC-SHA256 of the canonical query string, as lowercase hex.
    ///
    /// The caller passes every parameter except the signature itself, in
    /// transmission order, with the timestamp already appended.
    pub fn sign(&self, params: &RequestParams) -> Result<String, ExchangeError> {
        if self.secret.is_empty() {
            return Err(ExchangeError::MissingCredential("signing secret"));
        }
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| ExchangeError::MissingCredential("signing secret"))?;
        mac.update(params.canonical().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
