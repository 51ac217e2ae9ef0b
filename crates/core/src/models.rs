use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side, serialized with the exchange's wire tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side {:?}, expected BUY or SELL", other)),
        }
    }
}

/// The kind of order the console can place, carrying its price terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit {
        price: Decimal,
    },
    /// One-cancels-other: a limit leg paired with a stop-limit leg.
    Oco {
        price: Decimal,
        /// Trigger price for the stop leg.
        stop_price: Decimal,
        /// Limit price of the stop leg once triggered.
        stop_limit_price: Decimal,
    },
}

impl OrderKind {
    pub fn label(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit { .. } => "LIMIT",
            OrderKind::Oco { .. } => "OCO",
        }
    }
}

/// An order request as the operator specifies it, before submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
}

/// Decimal places the exchange accepts for order quantities.
const QUANTITY_DP: u32 = 5;

impl OrderTicket {
    /// Create a market order ticket.
    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            quantity,
        }
    }

    /// Create a limit order ticket.
    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit { price },
            quantity,
        }
    }

    /// Create an OCO ticket pairing a limit leg with a stop-limit leg.
    pub fn oco(
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        stop_price: Decimal,
        stop_limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Oco {
                price,
                stop_price,
                stop_limit_price,
            },
            quantity,
        }
    }

    /// A buy-back OCO for closing a short, sized from the free quote balance
    /// that funds it: take-profit limit at `price`, stop leg triggering at
    /// `stop_price` and filling at `stop_limit_price`.
    ///
    /// Whichever leg executes pays at most the higher of the two limit
    /// prices, so the quantity is what `available` covers at that price,
    /// less a 1% reserve for fees, truncated to the exchange's quantity
    /// precision. Truncation keeps the order within the balance; rounding
    /// up could oversubscribe it. Returns `None` when a price is not
    /// positive, the balance cannot fund any quantity, or a near-zero
    /// price overflows the quotient.
    pub fn oco_buyback(
        symbol: &str,
        available: Decimal,
        price: Decimal,
        stop_price: Decimal,
        stop_limit_price: Decimal,
    ) -> Option<Self> {
        if price <= Decimal::ZERO || stop_price <= Decimal::ZERO || stop_limit_price <= Decimal::ZERO
        {
            return None;
        }
        let worst_fill = price.max(stop_limit_price);
        let reserve = Decimal::new(99, 2);
        // A near-zero divisor can push the quotient out of decimal range.
        let quantity = available
            .checked_div(worst_fill)?
            .checked_mul(reserve)?
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return None;
        }
        Some(Self::oco(
            symbol,
            Side::Buy,
            quantity,
            price,
            stop_price,
            stop_limit_price,
        ))
    }
}

// ---------------------------------------------------------------------------
// Execution report
// ---------------------------------------------------------------------------

/// What the exchange reported back for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    pub symbol: String,
    /// Lifecycle status exactly as the exchange spelled it (e.g. FILLED, NEW).
    pub status: String,
    pub side: Side,
    /// Executed quantity for market orders, placed quantity otherwise.
    pub quantity: Decimal,
}

impl OrderReport {
    /// One-line confirmation shown to the operator.
    pub fn summary(&self) -> String {
        format!(
            "status: {}, side: {}, qty: {}",
            self.status, self.side, self.quantity
        )
    }
}

// ---------------------------------------------------------------------------
// Balances & quotes
// ---------------------------------------------------------------------------

/// One asset's balance as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    /// Amount available to trade.
    pub free: Decimal,
    /// Amount tied up in open orders; shown but not tradeable.
    pub locked: Decimal,
}

/// A spot price for one asset in a reference currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: String,
    pub price: Decimal,
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// One asset's balance valued in the reference currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetValuation {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    /// Price used for the valuation (ONE for the reference currency itself).
    pub price: Decimal,
    /// free * price.
    pub value: Decimal,
}

/// The normalized view of the account in one reference currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioValuation {
    pub reference: String,
    pub positions: Vec<AssetValuation>,
    /// Assets held but left out of the total (no quote, or denylisted).
    pub excluded: Vec<String>,
}

impl PortfolioValuation {
    pub fn total(&self) -> Decimal {
        self.positions.iter().map(|p| p.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parses_wire_tokens_case_insensitively() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("HOLD".parse::<Side>().is_err());
    }

    #[test]
    fn test_oco_buyback_sizes_quantity_from_worst_leg() {
        // 660 USDT at a worst-case fill of 66000 covers 0.01 BTC; the 1%
        // reserve leaves 0.0099.
        let ticket =
            OrderTicket::oco_buyback("BTCUSDT", dec!(660), dec!(60000), dec!(65000), dec!(66000))
                .unwrap();

        assert_eq!(ticket.side, Side::Buy);
        assert_eq!(ticket.quantity, dec!(0.0099));
        assert_eq!(
            ticket.kind,
            OrderKind::Oco {
                price: dec!(60000),
                stop_price: dec!(65000),
                stop_limit_price: dec!(66000),
            }
        );
    }

    #[test]
    fn test_oco_buyback_never_oversubscribes_the_balance() {
        let available = dec!(1000);
        let ticket =
            OrderTicket::oco_buyback("BTCUSDT", available, dec!(61000), dec!(59000), dec!(59500))
                .unwrap();

        // Worst fill is the take-profit leg here (61000 > 59500); the cost
        // at that price stays within the funding balance.
        assert_eq!(ticket.quantity, dec!(0.01622));
        assert!(ticket.quantity * dec!(61000) <= available);
    }

    #[test]
    fn test_oco_buyback_refuses_unfundable_or_nonsense_inputs() {
        // Nothing to commit.
        assert!(
            OrderTicket::oco_buyback("BTCUSDT", dec!(0), dec!(60000), dec!(65000), dec!(66000))
                .is_none()
        );
        // Balance too small to fund any quantity at the allowed precision.
        assert!(OrderTicket::oco_buyback(
            "BTCUSDT",
            dec!(0.0001),
            dec!(60000),
            dec!(65000),
            dec!(66000)
        )
        .is_none());
        // Prices must be strictly positive.
        assert!(
            OrderTicket::oco_buyback("BTCUSDT", dec!(660), dec!(0), dec!(65000), dec!(66000))
                .is_none()
        );
    }

    #[test]
    fn test_oco_buyback_refuses_prices_that_overflow_the_quotient() {
        // Positive at the deepest scale the decimal type parses; dividing
        // any real balance by it leaves decimal range entirely.
        let tiny = dec!(0.0000000000000000000000000001);

        let ticket = OrderTicket::oco_buyback("BTCUSDT", dec!(660), tiny, tiny, tiny);

        assert!(ticket.is_none());
    }

    #[test]
    fn test_order_report_summary_format() {
        let report = OrderReport {
            symbol: "BTCUSDT".to_string(),
            status: "FILLED".to_string(),
            side: Side::Buy,
            quantity: dec!(0.01),
        };

        assert_eq!(report.summary(), "status: FILLED, side: BUY, qty: 0.01");
    }

    #[test]
    fn test_valuation_total_sums_position_values_only() {
        let valuation = PortfolioValuation {
            reference: "USDT".to_string(),
            positions: vec![
                AssetValuation {
                    asset: "BTC".to_string(),
                    free: dec!(0.5),
                    locked: dec!(0),
                    price: dec!(65000),
                    value: dec!(32500),
                },
                AssetValuation {
                    asset: "USDT".to_string(),
                    free: dec!(100),
                    locked: dec!(0),
                    price: dec!(1),
                    value: dec!(100),
                },
            ],
            excluded: vec!["XYZ".to_string()],
        };

        assert_eq!(valuation.total(), dec!(32600));
    }
}
