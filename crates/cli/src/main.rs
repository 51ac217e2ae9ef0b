use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use tradedesk_core::{Exchange, OrderTicket, PortfolioValuation, Side};
use tradedesk_exchange::{ClientConfig, ExchangeClient};
use tradedesk_portfolio::{valuate, NormalizerConfig};

#[derive(Parser)]
#[command(name = "tradedesk")]
#[command(about = "Personal trading console — signed spot orders and balance valuation")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Exchange API key
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Exchange signing secret
    #[arg(long, env = "BINANCE_SECRET_KEY", hide_env_values = true)]
    api_secret: Option<String>,

    /// Operator PIN required for order placement
    #[arg(long, env = "PIN", hide_env_values = true)]
    pin: Option<String>,

    /// Exchange REST base URL
    #[arg(long, default_value = "https://api.binance.com")]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard API server
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Fetch balances and print their valuation in the reference currency
    Portfolio {
        /// Currency to value balances in
        #[arg(long, default_value = "USDT")]
        reference: String,

        /// Asset symbol to leave out of the valuation (repeatable)
        #[arg(long = "exclude", value_name = "ASSET")]
        exclude: Vec<String>,
    },

    /// Place a market order
    Market {
        /// Trading pair symbol (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: Side,

        /// Quantity in the base asset
        #[arg(short, long)]
        quantity: Decimal,

        /// Operator PIN
        #[arg(long)]
        pin: String,
    },

    /// Place a limit order (GTC)
    Limit {
        /// Trading pair symbol (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: Side,

        /// Quantity in the base asset
        #[arg(short, long)]
        quantity: Decimal,

        /// Limit price
        #[arg(short, long)]
        price: Decimal,

        /// Operator PIN
        #[arg(long)]
        pin: String,
    },

    /// Place an OCO order: a limit leg paired with a stop-limit leg
    Oco {
        /// Trading pair symbol (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: Side,

        /// Quantity in the base asset
        #[arg(short, long)]
        quantity: Decimal,

        /// Limit (take profit) price
        #[arg(short, long)]
        price: Decimal,

        /// Stop trigger price
        #[arg(long)]
        stop_price: Decimal,

        /// Limit price of the stop leg once triggered
        #[arg(long)]
        stop_limit_price: Decimal,

        /// Operator PIN
        #[arg(long)]
        pin: String,
    },

    /// Close a short with a buy-back OCO sized from the free quote balance
    OcoShort {
        /// Trading pair symbol (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// Asset whose free balance funds the buy-back
        #[arg(long, default_value = "USDT")]
        quote_asset: String,

        /// Limit (take profit) price
        #[arg(short, long)]
        price: Decimal,

        /// Stop trigger price
        #[arg(long)]
        stop_price: Decimal,

        /// Limit price of the stop leg once triggered
        #[arg(long)]
        stop_limit_price: Decimal,

        /// Operator PIN
        #[arg(long)]
        pin: String,
    },

    /// Measure the drift between the local clock and the exchange's
    Time,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ClientConfig::new(
        cli.api_key.clone().unwrap_or_default(),
        cli.api_secret.clone().unwrap_or_default(),
    )
    .with_base_url(cli.base_url.clone());
    let client = ExchangeClient::new(config)?;

    match cli.command {
        Commands::Serve { bind } => {
            client.ping().await?;
            tracing::info!("Exchange reachable, starting console API");
            let state = Arc::new(tradedesk_api::state::AppState::new(
                Arc::new(client),
                cli.pin.clone().unwrap_or_default(),
                NormalizerConfig::default(),
            ));
            tradedesk_api::start_server(state, &bind).await?;
        }
        Commands::Portfolio { reference, exclude } => {
            let normalizer = NormalizerConfig::new(reference).with_denylist(exclude);
            let valuation = valuate(&client, &normalizer).await?;
            print_valuation(&valuation);
        }
        Commands::Market {
            symbol,
            side,
            quantity,
            pin,
        } => {
            check_pin(cli.pin.as_deref(), &pin)?;
            let report = client
                .submit_order(&OrderTicket::market(&symbol, side, quantity))
                .await?;
            println!("Market order placed. {}", report.summary());
        }
        Commands::Limit {
            symbol,
            side,
            quantity,
            price,
            pin,
        } => {
            check_pin(cli.pin.as_deref(), &pin)?;
            let report = client
                .submit_order(&OrderTicket::limit(&symbol, side, quantity, price))
                .await?;
            println!("Limit order placed. {}", report.summary());
        }
        Commands::Oco {
            symbol,
            side,
            quantity,
            price,
            stop_price,
            stop_limit_price,
            pin,
        } => {
            check_pin(cli.pin.as_deref(), &pin)?;
            let report = client
                .submit_order(&OrderTicket::oco(
                    &symbol,
                    side,
                    quantity,
                    price,
                    stop_price,
                    stop_limit_price,
                ))
                .await?;
            println!("OCO order placed. {}", report.summary());
        }
        Commands::OcoShort {
            symbol,
            quote_asset,
            price,
            stop_price,
            stop_limit_price,
            pin,
        } => {
            check_pin(cli.pin.as_deref(), &pin)?;
            let balances = client.account_balances().await?;
            let available = balances
                .iter()
                .find(|balance| balance.asset == quote_asset)
                .map(|balance| balance.free)
                .unwrap_or_default();
            let ticket = OrderTicket::oco_buyback(
                &symbol,
                available,
                price,
                stop_price,
                stop_limit_price,
            )
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "free {} balance {} cannot fund a buy-back at these prices",
                    quote_asset,
                    available
                )
            })?;
            tracing::info!(
                quantity = %ticket.quantity,
                "sized buy-back from free {} balance {}",
                quote_asset,
                available
            );
            let report = client.submit_order(&ticket).await?;
            println!(
                "OCO buy-back placed for {} {}. {}",
                ticket.quantity,
                symbol,
                report.summary()
            );
        }
        Commands::Time => {
            let drift = client.drift().await?;
            println!("Exchange clock drift: {} ms", drift.millis());
        }
    }

    Ok(())
}

/// Local equality check against the configured PIN. Advisory only: it keeps
/// a mistyped command from reaching the exchange, nothing more.
fn check_pin(configured: Option<&str>, supplied: &str) -> Result<()> {
    match configured {
        Some(pin) if !pin.is_empty() && pin == supplied => Ok(()),
        Some(_) => anyhow::bail!("Invalid PIN"),
        None => anyhow::bail!("No PIN configured; set the PIN environment variable"),
    }
}

fn print_valuation(valuation: &PortfolioValuation) {
    let sep = "=".repeat(72);
    println!("\n{sep}");
    println!("  BALANCES ({})", valuation.reference);
    println!("{sep}");
    println!(
        "  {:<8} {:>16} {:>12} {:>14} {:>16}",
        "Asset", "Free", "Locked", "Price", "Value"
    );
    for position in &valuation.positions {
        println!(
            "  {:<8} {:>16} {:>12} {:>14} {:>16}",
            position.asset, position.free, position.locked, position.price, position.value
        );
    }
    println!("{sep}");
    println!("  Total: {} {}", valuation.total(), valuation.reference);
    if !valuation.excluded.is_empty() {
        println!(
            "  Omitted ({} assets, no usable quote): {}",
            valuation.excluded.len(),
            valuation.excluded.join(", ")
        );
    }
    println!("{sep}\n");
}
