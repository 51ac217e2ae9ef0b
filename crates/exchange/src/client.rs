use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, error, info};

use tradedesk_core::*;

use crate::params::RequestParams;
use crate::signer::{ClockDrift, RequestSigner};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings and credentials for the exchange REST API.
///
/// `Debug` masks the API key and never prints the secret.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    /// Applied to every request; the only cancellation policy there is.
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 10,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Counted in chars, not bytes; a slice offset could split a
        // multibyte character.
        let key_chars = self.api_key.chars().count();
        let masked_key = if key_chars > 8 {
            let head: String = self.api_key.chars().take(4).collect();
            let tail: String = self.api_key.chars().skip(key_chars - 4).collect();
            format!("{}...{}", head, tail)
        } else {
            "***".to_string()
        };

        f.debug_struct("ClientConfig")
            .field("api_key", &masked_key)
            .field("api_secret", &"***")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    status: String,
    side: Side,
    #[serde(default)]
    executed_qty: Option<Decimal>,
    #[serde(default)]
    orig_qty: Option<Decimal>,
}

impl OrderResponse {
    /// Market fills report the executed quantity, everything else the placed
    /// quantity. A fill without its quantity field is malformed.
    fn into_report(self, kind: &OrderKind) -> Result<OrderReport, ExchangeError> {
        let quantity = match kind {
            OrderKind::Market => self.executed_qty.ok_or_else(|| {
                ExchangeError::MalformedResponse("order response missing executedQty".to_string())
            })?,
            _ => self.orig_qty.ok_or_else(|| {
                ExchangeError::MalformedResponse("order response missing origQty".to_string())
            })?,
        };
        Ok(OrderReport {
            symbol: self.symbol,
            status: self.status,
            side: self.side,
            quantity,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcoOrderResponse {
    symbol: String,
    list_order_status: String,
    order_reports: Vec<OrderResponse>,
}

impl OcoOrderResponse {
    /// Both legs share side and placed quantity; the list status describes
    /// the pair as a whole.
    fn into_report(mut self) -> Result<OrderReport, ExchangeError> {
        if self.order_reports.is_empty() {
            return Err(ExchangeError::MalformedResponse(
                "OCO response carried no order reports".to_string(),
            ));
        }
        let leg = self.order_reports.remove(0);
        let quantity = leg.orig_qty.ok_or_else(|| {
            ExchangeError::MalformedResponse("OCO order report missing origQty".to_string())
        })?;
        Ok(OrderReport {
            symbol: self.symbol,
            status: self.list_order_status,
            side: leg.side,
            quantity,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerPriceResponse {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[allow(dead_code)]
    code: i64,
    msg: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the exchange.
///
/// Every authenticated endpoint goes through [`ExchangeClient::signed_request`],
/// so the credential check, timestamp, signature, and error mapping are applied
/// in exactly one place. Rejected orders are never resubmitted.
pub struct ExchangeClient {
    config: ClientConfig,
    http: Client,
    signer: RequestSigner,
}

impl ExchangeClient {
    pub fn new(config: ClientConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let signer = RequestSigner::new(http.clone(), &config.base_url, &config.api_secret);
        Ok(Self {
            config,
            http,
            signer,
        })
    }

    /// Replace the local clock behind the signer. Tests use this to pin
    /// timestamps.
    pub fn with_local_clock(mut self, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.signer = self.signer.with_local_clock(clock);
        self
    }

    /// Measured clock drift against the exchange, for diagnostics.
    pub async fn drift(&self) -> Result<ClockDrift, ExchangeError> {
        self.signer.measure_drift().await
    }

    /// Send one authenticated request.
    ///
    /// Appends exactly one `timestamp` (drift-corrected, measured now) and
    /// exactly one `signature` computed over all other parameters in
    /// transmission order. Parameters travel in the query string; the body
    /// stays empty. No `recvWindow` is sent, so the exchange default
    /// applies.
    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        mut params: RequestParams,
    ) -> Result<T, ExchangeError> {
        if self.config.api_key.is_empty() {
            return Err(ExchangeError::MissingCredential("api key"));
        }

        let timestamp = self.signer.adjusted_timestamp().await?;
        params.push("timestamp", timestamp);
        let signature = self.signer.sign(&params)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.base_url,
            path,
            params.canonical(),
            signature
        );

        debug!("{} (signed) {}", method, path);
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::decode_response(response).await
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: RequestParams,
    ) -> Result<T, ExchangeError> {
        let url = if params.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, params.canonical())
        };

        debug!("GET {}", path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::decode_response(response).await
    }

    /// Success bodies must parse completely; anything else surfaces the
    /// exchange's own error message verbatim.
    async fn decode_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("failed to parse response: {} - body: {}", e, body);
                ExchangeError::MalformedResponse(e.to_string())
            })
        } else {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|err| err.msg)
                .unwrap_or(body);
            Err(ExchangeError::ExchangeRejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl Exchange for ExchangeClient {
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderReport, ExchangeError> {
        let mut params = RequestParams::new();
        params.push("symbol", &ticket.symbol);
        params.push("side", ticket.side.as_str());

        let path = match &ticket.kind {
            OrderKind::Market => {
                params.push("type", "MARKET");
                params.push("quantity", ticket.quantity);
                "/api/v3/order"
            }
            OrderKind::Limit { price } => {
                params.push("type", "LIMIT");
                params.push("timeInForce", "GTC");
                params.push("quantity", ticket.quantity);
                params.push("price", price);
                "/api/v3/order"
            }
            OrderKind::Oco {
                price,
                stop_price,
                stop_limit_price,
            } => {
                params.push("quantity", ticket.quantity);
                params.push("price", price);
                params.push("stopPrice", stop_price);
                params.push("stopLimitPrice", stop_limit_price);
                params.push("stopLimitTimeInForce", "GTC");
                "/api/v3/order/oco"
            }
        };

        info!(
            "submitting {} {} order: {} x {}",
            ticket.side,
            ticket.kind.label(),
            ticket.symbol,
            ticket.quantity
        );

        let report = match &ticket.kind {
            OrderKind::Oco { .. } => {
                let resp: OcoOrderResponse = self.signed_request(Method::POST, path, params).await?;
                resp.into_report()?
            }
            kind => {
                let resp: OrderResponse = self.signed_request(Method::POST, path, params).await?;
                resp.into_report(kind)?
            }
        };

        info!("order accepted: {}", report.summary());
        Ok(report)
    }

    async fn account_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let resp: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", RequestParams::new())
            .await?;

        Ok(resp
            .balances
            .into_iter()
            .map(|b| Balance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    async fn price(&self, asset: &str, reference: &str) -> Result<PriceQuote, ExchangeError> {
        let mut params = RequestParams::new();
        params.push("symbol", format!("{}{}", asset, reference));

        let resp: Result<TickerPriceResponse, ExchangeError> =
            self.public_get("/api/v3/ticker/price", params).await;

        match resp {
            Ok(ticker) => Ok(PriceQuote {
                asset: asset.to_string(),
                price: ticker.price,
            }),
            Err(e) => Err(ExchangeError::QuoteUnavailable {
                asset: asset.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self.public_get("/api/v3/ping", RequestParams::new()).await?;
        Ok(())
    }
}
