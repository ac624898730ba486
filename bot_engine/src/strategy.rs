/// strategy.rs - Strategy engine over a closed set of variants
///
/// Every variant consumes a candle window plus its own private state and
/// yields at most one `Signal` per call.  Variants keep state across calls
/// (previous averages, position flags, the EMA/RSI `Position`), so the same
/// engine instance must be driven by exactly one bot loop.
///
///   ┌─────────────────────┬──────────┬────────────┬──────────┐
///   │ variant             │ interval │ window     │ poll     │
///   ├─────────────────────┼──────────┼────────────┼──────────┤
///   │ SMA crossover       │ 15m      │ long + 10  │ 300s     │
///   │ RSI                 │ 15m      │ period + 20│ 300s     │
///   │ EMA20/EMA50 + RSI   │ 15m      │ 100        │ 300s     │
///   └─────────────────────┴──────────┴────────────┴──────────┘
pub mod ema_rsi;
pub mod rsi;
pub mod sma_crossover;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StrategyError;
use crate::models::{Candle, Signal};

pub use ema_rsi::{EmaRsiStrategy, Position};
pub use rsi::RsiStrategy;
pub use sma_crossover::SmaCrossover;

/// Default polling cadence shared by all variants.
pub const DEFAULT_POLL_SECS: u64 = 300;
/// All variants work on 15-minute candles.
pub const CANDLE_INTERVAL: &str = "15m";

/// Names a strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[serde(rename = "simple_moving_average")]
    SmaCrossover,
    Rsi,
    EmaRsi,
}

impl StrategyKind {
    /// Canonical names accepted by `FromStr`.
    pub fn available() -> &'static [&'static str] {
        &["simple_moving_average", "rsi", "ema_rsi"]
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::SmaCrossover => "simple_moving_average",
            StrategyKind::Rsi          => "rsi",
            StrategyKind::EmaRsi       => "ema_rsi",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple_moving_average" | "sma" | "sma_crossover" => Ok(StrategyKind::SmaCrossover),
            "rsi"                                             => Ok(StrategyKind::Rsi),
            "ema_rsi" | "ema20_ema50_rsi"                     => Ok(StrategyKind::EmaRsi),
            _ => Err(StrategyError::Unknown(s.to_owned())),
        }
    }
}

/// Tunables for the variants.  Unset fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub short_period: usize,
    pub long_period:  usize,
    pub rsi_period:   usize,
    pub oversold:     f64,
    pub overbought:   f64,
    /// Overrides the variant's polling cadence
    pub poll_interval_secs: Option<u64>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            short_period: 7,
            long_period:  25,
            rsi_period:   14,
            oversold:     30.0,
            overbought:   70.0,
            poll_interval_secs: None,
        }
    }
}

impl StrategyParams {
    fn validate(&self, kind: StrategyKind, trade_amount: f64) -> Result<(), StrategyError> {
        let invalid = |msg: String| Err(StrategyError::InvalidParams(msg));

        if !(trade_amount > 0.0) || !trade_amount.is_finite() {
            return invalid(format!("trade amount must be positive, got {trade_amount}"));
        }
        if self.poll_interval_secs == Some(0) {
            return invalid("poll interval must be at least one second".into());
        }
        match kind {
            StrategyKind::SmaCrossover => {
                if self.short_period == 0 || self.short_period >= self.long_period {
                    return invalid(format!(
                        "sma periods must satisfy 0 < short < long, got {}/{}",
                        self.short_period, self.long_period
                    ));
                }
            }
            StrategyKind::Rsi => {
                if self.rsi_period == 0 {
                    return invalid("rsi period must be positive".into());
                }
                if !(0.0..=100.0).contains(&self.oversold)
                    || !(0.0..=100.0).contains(&self.overbought)
                    || self.oversold >= self.overbought
                {
                    return invalid(format!(
                        "rsi thresholds must satisfy 0 <= oversold < overbought <= 100, got {}/{}",
                        self.oversold, self.overbought
                    ));
                }
            }
            StrategyKind::EmaRsi => {}
        }
        Ok(())
    }

    fn poll_secs(&self) -> u64 {
        self.poll_interval_secs.unwrap_or(DEFAULT_POLL_SECS)
    }
}

/// Closed set of strategy variants with static dispatch.
#[derive(Debug, Clone)]
pub enum StrategyEngine {
    SmaCrossover(SmaCrossover),
    Rsi(RsiStrategy),
    EmaRsi(EmaRsiStrategy),
}

impl StrategyEngine {
    /// Build a fresh variant.  Parameters are validated before anything
    /// else happens so a bad request never reaches the registry.
    pub fn build(
        kind:         StrategyKind,
        params:       &StrategyParams,
        trade_amount: f64,
    ) -> Result<Self, StrategyError> {
        params.validate(kind, trade_amount)?;
        let poll = params.poll_secs();

        Ok(match kind {
            StrategyKind::SmaCrossover => StrategyEngine::SmaCrossover(SmaCrossover::new(
                params.short_period,
                params.long_period,
                trade_amount,
                poll,
            )),
            StrategyKind::Rsi => StrategyEngine::Rsi(RsiStrategy::new(
                params.rsi_period,
                params.oversold,
                params.overbought,
                trade_amount,
                poll,
            )),
            StrategyKind::EmaRsi => StrategyEngine::EmaRsi(EmaRsiStrategy::new(trade_amount, poll)),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyEngine::SmaCrossover(_) => StrategyKind::SmaCrossover,
            StrategyEngine::Rsi(_)          => StrategyKind::Rsi,
            StrategyEngine::EmaRsi(_)       => StrategyKind::EmaRsi,
        }
    }

    /// Evaluate one candle window (ascending by time).
    pub fn analyze(&mut self, candles: &[Candle]) -> Signal {
        match self {
            StrategyEngine::SmaCrossover(s) => s.analyze(candles),
            StrategyEngine::Rsi(s)          => s.analyze(candles),
            StrategyEngine::EmaRsi(s)       => s.analyze(candles),
        }
    }

    /// How long the bot loop sleeps between analyses.
    pub fn polling_interval(&self) -> Duration {
        let secs = match self {
            StrategyEngine::SmaCrossover(s) => s.poll_secs,
            StrategyEngine::Rsi(s)          => s.poll_secs,
            StrategyEngine::EmaRsi(s)       => s.poll_secs,
        };
        Duration::from_secs(secs)
    }

    /// Kline interval requested from the gateway.
    pub fn candle_interval(&self) -> &'static str {
        CANDLE_INTERVAL
    }

    /// Number of candles requested per analysis.
    pub fn window_size(&self) -> usize {
        match self {
            StrategyEngine::SmaCrossover(s) => s.long_period + 10,
            StrategyEngine::Rsi(s)          => s.period + 20,
            StrategyEngine::EmaRsi(_)       => ema_rsi::WINDOW,
        }
    }
}
