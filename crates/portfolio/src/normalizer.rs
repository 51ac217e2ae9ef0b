use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use tradedesk_core::{
    AssetValuation, Balance, Exchange, ExchangeError, PortfolioValuation, PriceQuote,
};

use crate::config::NormalizerConfig;

/// Keep only balances whose free amount is strictly greater than zero.
///
/// A locked amount alone does not make a balance active; entries that stay
/// keep their locked amount for display.
pub fn filter_nonzero(balances: Vec<Balance>) -> Vec<Balance> {
    balances
        .into_iter()
        .filter(|balance| balance.free > Decimal::ZERO)
        .collect()
}

/// Look up one quote per distinct asset against the reference currency.
///
/// The reference currency itself and denylisted symbols are skipped. A
/// failed lookup leaves its asset absent from the map; the failure is logged
/// and recovered here, never bubbled up, and no synthetic price ever stands
/// in for a real one.
pub async fn quote_all(
    exchange: &dyn Exchange,
    assets: &[String],
    config: &NormalizerConfig,
) -> HashMap<String, PriceQuote> {
    let mut quotes = HashMap::new();
    for asset in assets {
        if config.is_reference(asset) || config.is_denylisted(asset) {
            continue;
        }
        if quotes.contains_key(asset) {
            continue;
        }
        match exchange.price(asset, &config.reference).await {
            Ok(quote) => {
                quotes.insert(asset.clone(), quote);
            }
            Err(err) => {
                warn!(asset = %asset, "no quote: {}", err);
            }
        }
    }
    quotes
}

/// Value each balance in the reference currency.
///
/// The reference currency is valued 1:1 without a quote. Balances without a
/// quote, and denylisted assets whether quoted or not, are left out of the
/// positions and reported in `excluded` instead. An asset is excluded,
/// never zero-valued into the total.
pub fn normalize(
    balances: &[Balance],
    quotes: &HashMap<String, PriceQuote>,
    config: &NormalizerConfig,
) -> PortfolioValuation {
    let mut positions = Vec::new();
    let mut excluded = Vec::new();

    for balance in balances {
        let price = if config.is_reference(&balance.asset) {
            Some(Decimal::ONE)
        } else if config.is_denylisted(&balance.asset) {
            None
        } else {
            quotes.get(&balance.asset).map(|quote| quote.price)
        };

        match price {
            Some(price) => positions.push(AssetValuation {
                asset: balance.asset.clone(),
                free: balance.free,
                locked: balance.locked,
                price,
                value: balance.free * price,
            }),
            None => excluded.push(balance.asset.clone()),
        }
    }

    PortfolioValuation {
        reference: config.reference.clone(),
        positions,
        excluded,
    }
}

/// The full refresh: fetch balances, drop empty ones, quote the rest, and
/// value them. Only the balance fetch itself can fail; quote failures cost
/// the affected asset its place in the total, nothing more.
pub async fn valuate(
    exchange: &dyn Exchange,
    config: &NormalizerConfig,
) -> Result<PortfolioValuation, ExchangeError> {
    let balances = filter_nonzero(exchange.account_balances().await?);
    let assets: Vec<String> = balances.iter().map(|b| b.asset.clone()).collect();
    let quotes = quote_all(exchange, &assets, config).await;
    let valuation = normalize(&balances, &quotes, config);

    debug!(
        reference = %valuation.reference,
        positions = valuation.positions.len(),
        excluded = valuation.excluded.len(),
        "portfolio valued"
    );
    Ok(valuation)
}
