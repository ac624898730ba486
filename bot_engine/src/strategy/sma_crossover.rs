/// strategy/sma_crossover.rs - Simple moving average crossover
///
/// BUY  when SMA(short) crosses above SMA(long) and we are flat.
/// SELL when SMA(short) crosses below SMA(long) and we are long.
///
/// The crossover compares this call's averages with the averages computed
/// on the *previous* call, so the first call can never signal.
use tracing::{debug, info};

use crate::indicators::{is_bearish_crossover, is_bullish_crossover, sma};
use crate::models::{closes, Candle, Signal, TradeIntent};

#[derive(Debug, Clone)]
pub struct SmaCrossover {
    pub(crate) short_period: usize,
    pub(crate) long_period:  usize,
    pub(crate) trade_amount: f64,
    pub(crate) poll_secs:    u64,
    /// (short, long) averages from the previous call
    prev: Option<(f64, f64)>,
    holding: bool,
}

impl SmaCrossover {
    pub fn new(short_period: usize, long_period: usize, trade_amount: f64, poll_secs: u64) -> Self {
        Self {
            short_period,
            long_period,
            trade_amount,
            poll_secs,
            prev: None,
            holding: false,
        }
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn analyze(&mut self, candles: &[Candle]) -> Signal {
        let closes = closes(candles);
        let (Some(short), Some(long), Some(&price)) = (
            sma(&closes, self.short_period),
            sma(&closes, self.long_period),
            closes.last(),
        ) else {
            debug!("SMA: {} candles, need {}", closes.len(), self.long_period);
            return Signal::None;
        };

        let mut signal = Signal::None;
        if let Some((prev_short, prev_long)) = self.prev {
            let reason = format!("SMA crossover (short={short:.2}, long={long:.2})");

            if !self.holding && is_bullish_crossover(short, long, prev_short, prev_long) {
                info!("BUY signal: {}", reason);
                signal = Signal::Buy(TradeIntent::new(price, self.trade_amount, reason));
                self.holding = true;
            } else if self.holding && is_bearish_crossover(short, long, prev_short, prev_long) {
                info!("SELL signal: {}", reason);
                signal = Signal::Sell(TradeIntent::new(price, self.trade_amount, reason));
                self.holding = false;
            }
        }

        self.prev = Some((short, long));
        debug!(
            "Price: {:.2}  SMA{}: {:.2}  SMA{}: {:.2}  holding: {}",
            price, self.short_period, short, self.long_period, long, self.holding
        );
        signal
    }
}
