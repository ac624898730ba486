/// models.rs - Shared types: candles, order sides, signals, orders
///
/// A `Signal` is produced once per `analyze()` call and consumed right away
/// by the bot loop; nothing here is persisted.
use std::fmt;

use serde::{Deserialize, Serialize};

/// One OHLCV kline, ascending by `open_time` within a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, Unix ms
    pub open_time: i64,
    pub open:   f64,
    pub high:   f64,
    pub low:    f64,
    pub close:  f64,
    pub volume: f64,
}

/// Extract the close series of a candle window.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Exchange wire representation ("BUY" / "SELL").
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy  => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub price:    f64,
    pub quantity: f64,
    /// Human-readable reason, logged with the order
    pub reason:   String,
    /// Protective stop attached to an entry (EMA/RSI entries only)
    pub stop_loss:   Option<f64>,
    /// First profit target attached to an entry (EMA/RSI entries only)
    pub take_profit: Option<f64>,
}

impl TradeIntent {
    pub fn new(price: f64, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            price,
            quantity,
            reason: reason.into(),
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_exits(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }
}

/// Outcome of one strategy analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Signal {
    #[default]
    None,
    Buy(TradeIntent),
    Sell(TradeIntent),
}

impl Signal {
    pub fn is_none(&self) -> bool {
        matches!(self, Signal::None)
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::None    => None,
            Signal::Buy(_)  => Some(Side::Buy),
            Signal::Sell(_) => Some(Side::Sell),
        }
    }

    pub fn intent(&self) -> Option<&TradeIntent> {
        match self {
            Signal::None => None,
            Signal::Buy(t) | Signal::Sell(t) => Some(t),
        }
    }

    /// Split into side + intent, `None` when there is nothing to trade.
    pub fn into_order(self) -> Option<(Side, TradeIntent)> {
        match self {
            Signal::None    => None,
            Signal::Buy(t)  => Some((Side::Buy, t)),
            Signal::Sell(t) => Some((Side::Sell, t)),
        }
    }
}

/// Order submitted to an execution gateway.
/// `price = None` means a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol:   String,
    pub side:     Side,
    pub quantity: f64,
    pub price:    Option<f64>,
}

/// Gateway acknowledgement for an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub status:   String,
    pub executed_qty: f64,
    /// Realised profit, when the venue reports one
    pub profit: Option<f64>,
}

/// Non-zero balance of a single asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset:  String,
    pub free:   f64,
    pub locked: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}
