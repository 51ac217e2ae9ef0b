use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tradedesk_core::{ExchangeError, OrderTicket, Side};

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Orders
        .route("/orders/market", post(place_market_order))
        .route("/orders/limit", post(place_limit_order))
        .route("/orders/oco", post(place_oco_order))
        .route("/orders/oco-short", post(place_oco_short))
        // Portfolio
        .route("/portfolio", get(portfolio))
}

/// HTTP status the console answers with for each failure.
fn error_status(err: &ExchangeError) -> StatusCode {
    match err {
        ExchangeError::TimeSourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ExchangeError::MissingCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ExchangeError::ExchangeRejected { .. }
        | ExchangeError::QuoteUnavailable { .. }
        | ExchangeError::Transport(_)
        | ExchangeError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MarketOrderRequest {
    symbol: String,
    side: Side,
    quantity: Decimal,
    pin: String,
}

#[derive(Deserialize)]
struct LimitOrderRequest {
    symbol: String,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    pin: String,
}

#[derive(Deserialize)]
struct OcoOrderRequest {
    symbol: String,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    stop_price: Decimal,
    stop_limit_price: Decimal,
    pin: String,
}

/// Buy-back OCO with no quantity: the server sizes it from the free balance
/// of `quote_asset`.
#[derive(Deserialize)]
struct OcoShortRequest {
    symbol: String,
    /// Asset funding the buy-back (the pair's quote side, e.g. USDT).
    quote_asset: String,
    price: Decimal,
    stop_price: Decimal,
    stop_limit_price: Decimal,
    pin: String,
}

fn pin_rejected() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid PIN" })),
    )
}

/// Submit one ticket and answer with a concrete summary or an explicit
/// error. One attempt only: a rejected order is reported, never resubmitted.
async fn submit(state: &AppState, ticket: OrderTicket) -> (StatusCode, Json<serde_json::Value>) {
    match state.exchange.submit_order(&ticket).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "summary": report.summary(),
                "report": report,
            })),
        ),
        Err(err) => {
            tracing::error!(symbol = %ticket.symbol, "order failed: {}", err);
            (error_status(&err), Json(json!({ "error": err.to_string() })))
        }
    }
}

async fn place_market_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MarketOrderRequest>,
) -> impl IntoResponse {
    if !state.pin_matches(&req.pin) {
        return pin_rejected();
    }
    submit(&state, OrderTicket::market(&req.symbol, req.side, req.quantity)).await
}

async fn place_limit_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LimitOrderRequest>,
) -> impl IntoResponse {
    if !state.pin_matches(&req.pin) {
        return pin_rejected();
    }
    submit(
        &state,
        OrderTicket::limit(&req.symbol, req.side, req.quantity, req.price),
    )
    .await
}

async fn place_oco_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OcoOrderRequest>,
) -> impl IntoResponse {
    if !state.pin_matches(&req.pin) {
        return pin_rejected();
    }
    submit(
        &state,
        OrderTicket::oco(
            &req.symbol,
            req.side,
            req.quantity,
            req.price,
            req.stop_price,
            req.stop_limit_price,
        ),
    )
    .await
}

/// Close a short: fetch the free quote balance, size a buy-back OCO from it,
/// and submit. The operator supplies prices only; the quantity is computed
/// here.
async fn place_oco_short(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OcoShortRequest>,
) -> impl IntoResponse {
    if !state.pin_matches(&req.pin) {
        return pin_rejected();
    }

    let balances = match state.exchange.account_balances().await {
        Ok(balances) => balances,
        Err(err) => {
            tracing::error!("balance fetch failed: {}", err);
            return (error_status(&err), Json(json!({ "error": err.to_string() })));
        }
    };
    let available = balances
        .iter()
        .find(|balance| balance.asset == req.quote_asset)
        .map(|balance| balance.free)
        .unwrap_or(Decimal::ZERO);

    let ticket = match OrderTicket::oco_buyback(
        &req.symbol,
        available,
        req.price,
        req.stop_price,
        req.stop_limit_price,
    ) {
        Some(ticket) => ticket,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!(
                        "free {} balance {} cannot fund a buy-back at these prices",
                        req.quote_asset, available
                    )
                })),
            );
        }
    };

    tracing::info!(
        symbol = %ticket.symbol,
        quantity = %ticket.quantity,
        "sized buy-back from free {} balance {}",
        req.quote_asset,
        available
    );
    submit(&state, ticket).await
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

async fn portfolio(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // One refresh at a time; a slow poll must finish before the next starts.
    let _refresh = state.refresh.lock().await;

    match tradedesk_portfolio::valuate(state.exchange.as_ref(), &state.normalizer).await {
        Ok(valuation) => (
            StatusCode::OK,
            Json(json!({
                "reference": valuation.reference,
                "positions": valuation.positions,
                "excluded": valuation.excluded,
                "total": valuation.total(),
            })),
        ),
        Err(err) => {
            tracing::error!("portfolio refresh failed: {}", err);
            (error_status(&err), Json(json!({ "error": err.to_string() })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tradedesk_exchange::{ClientConfig, ExchangeClient};
    use tradedesk_portfolio::NormalizerConfig;

    const SERVER_TIME: i64 = 1700000000000;

    /// Bind the full router on an ephemeral port, backed by a real
    /// `ExchangeClient` pointed at the mock exchange.
    async fn spawn_app(exchange: &MockServer, pin: &str) -> String {
        let config =
            ClientConfig::new("testkey", "testsecret").with_base_url(exchange.base_url());
        let client = ExchangeClient::new(config)
            .unwrap()
            .with_local_clock(Arc::new(|| 1650000000000));
        let state = Arc::new(AppState::new(
            Arc::new(client),
            pin,
            NormalizerConfig::default(),
        ));
        let app = crate::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn mock_server_time(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/time");
                then.status(200)
                    .json_body(json!({ "serverTime": SERVER_TIME }));
            })
            .await;
    }

    #[tokio::test]
    async fn test_health_reports_ok_and_version() {
        let exchange = MockServer::start_async().await;
        let base = spawn_app(&exchange, "1234").await;

        let response = reqwest::get(format!("{}/api/health", base)).await.unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_market_buy_round_trip_reports_summary() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        let order_mock = exchange
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v3/order")
                    .query_param("type", "MARKET")
                    .query_param_exists("signature");
                then.status(200).json_body(json!({
                    "symbol": "BTCUSDT",
                    "status": "FILLED",
                    "side": "BUY",
                    "executedQty": "0.01",
                    "origQty": "0.01"
                }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/market", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "side": "BUY",
                "quantity": "0.01",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["summary"], "status: FILLED, side: BUY, qty: 0.01");
        order_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_limit_order_reports_placed_quantity() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        exchange
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v3/order")
                    .query_param("type", "LIMIT")
                    .query_param("timeInForce", "GTC");
                then.status(200).json_body(json!({
                    "symbol": "ETHUSDT",
                    "status": "NEW",
                    "side": "SELL",
                    "executedQty": "0",
                    "origQty": "0.5"
                }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/limit", base))
            .json(&json!({
                "symbol": "ETHUSDT",
                "side": "SELL",
                "quantity": "0.5",
                "price": "2000",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["summary"], "status: NEW, side: SELL, qty: 0.5");
    }

    #[tokio::test]
    async fn test_oco_order_routes_to_oco_endpoint() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        let oco_mock = exchange
            .mock_async(|when, then| {
                when.method(POST).path("/api/v3/order/oco");
                then.status(200).json_body(json!({
                    "symbol": "BTCUSDT",
                    "listOrderStatus": "EXECUTING",
                    "orderReports": [
                        {
                            "symbol": "BTCUSDT",
                            "status": "NEW",
                            "side": "SELL",
                            "origQty": "0.2",
                            "executedQty": "0"
                        }
                    ]
                }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/oco", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "side": "SELL",
                "quantity": "0.2",
                "price": "70000",
                "stop_price": "60000",
                "stop_limit_price": "59900",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["report"]["status"], "EXECUTING");
        oco_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oco_short_sizes_buyback_from_quote_balance() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        exchange
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/account");
                then.status(200).json_body(json!({
                    "balances": [
                        { "asset": "USDT", "free": "660", "locked": "0" }
                    ]
                }));
            })
            .await;
        let oco_mock = exchange
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v3/order/oco")
                    .query_param("side", "BUY")
                    .query_param("quantity", "0.0099");
                then.status(200).json_body(json!({
                    "symbol": "BTCUSDT",
                    "listOrderStatus": "EXECUTING",
                    "orderReports": [
                        {
                            "symbol": "BTCUSDT",
                            "status": "NEW",
                            "side": "BUY",
                            "origQty": "0.0099",
                            "executedQty": "0"
                        }
                    ]
                }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/oco-short", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "quote_asset": "USDT",
                "price": "60000",
                "stop_price": "65000",
                "stop_limit_price": "66000",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        // 660 USDT at the 66000 worst fill, less the 1% reserve.
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["report"]["quantity"], "0.0099");
        oco_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oco_short_without_funding_balance_never_reaches_the_exchange() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        exchange
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/account");
                then.status(200).json_body(json!({
                    "balances": [
                        { "asset": "BTC", "free": "0.5", "locked": "0" }
                    ]
                }));
            })
            .await;
        let oco_mock = exchange
            .mock_async(|when, then| {
                when.method(POST).path("/api/v3/order/oco");
                then.status(200).json_body(json!({}));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/oco-short", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "quote_asset": "USDT",
                "price": "60000",
                "stop_price": "65000",
                "stop_limit_price": "66000",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("cannot fund"));
        oco_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_wrong_pin_rejected_before_any_exchange_call() {
        let exchange = MockServer::start_async().await;
        let time_mock = exchange
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/time");
                then.status(200)
                    .json_body(json!({ "serverTime": SERVER_TIME }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/market", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "side": "BUY",
                "quantity": "0.01",
                "pin": "9999"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 403);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid PIN");
        // The request died at the PIN gate; the exchange never heard of it.
        time_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_exchange_rejection_maps_to_bad_gateway_without_retry() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        let order_mock = exchange
            .mock_async(|when, then| {
                when.method(POST).path("/api/v3/order");
                then.status(400).json_body(json!({
                    "code": -2010,
                    "msg": "Account has insufficient balance for requested action."
                }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/orders/market", base))
            .json(&json!({
                "symbol": "BTCUSDT",
                "side": "BUY",
                "quantity": "5",
                "pin": "1234"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("Account has insufficient balance"));
        order_mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_portfolio_values_balances_and_reports_exclusions() {
        let exchange = MockServer::start_async().await;
        mock_server_time(&exchange).await;
        exchange
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/account");
                then.status(200).json_body(json!({
                    "balances": [
                        { "asset": "BTC", "free": "0.5", "locked": "0.1" },
                        { "asset": "USDT", "free": "100", "locked": "0" },
                        { "asset": "XYZ", "free": "5", "locked": "0" },
                        { "asset": "DUST", "free": "0", "locked": "7" }
                    ]
                }));
            })
            .await;
        exchange
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v3/ticker/price")
                    .query_param("symbol", "BTCUSDT");
                then.status(200)
                    .json_body(json!({ "symbol": "BTCUSDT", "price": "65000" }));
            })
            .await;
        exchange
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v3/ticker/price")
                    .query_param("symbol", "XYZUSDT");
                then.status(400)
                    .json_body(json!({ "code": -1121, "msg": "Invalid symbol." }));
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::get(format!("{}/api/portfolio", base))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["reference"], "USDT");
        assert_eq!(body["positions"].as_array().unwrap().len(), 2);
        assert_eq!(body["excluded"], json!(["XYZ"]));
        let total: Decimal = serde_json::from_value(body["total"].clone()).unwrap();
        assert_eq!(total, dec!(32600));
    }

    #[tokio::test]
    async fn test_portfolio_surfaces_time_source_failure_as_unavailable() {
        let exchange = MockServer::start_async().await;
        exchange
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/time");
                then.status(500).body("maintenance");
            })
            .await;

        let base = spawn_app(&exchange, "1234").await;
        let response = reqwest::get(format!("{}/api/portfolio", base))
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("Time source"));
    }
}
