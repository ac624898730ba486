/// strategy/rsi.rs - RSI mean-reversion
///
/// BUY  when RSI < oversold and flat.
/// SELL when RSI > overbought and long.
use tracing::{debug, info};

use crate::indicators::rsi;
use crate::models::{closes, Candle, Signal, TradeIntent};

#[derive(Debug, Clone)]
pub struct RsiStrategy {
    pub(crate) period:     usize,
    pub(crate) oversold:   f64,
    pub(crate) overbought: f64,
    pub(crate) trade_amount: f64,
    pub(crate) poll_secs:  u64,
    holding: bool,
}

impl RsiStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64, trade_amount: f64, poll_secs: u64) -> Self {
        Self {
            period,
            oversold,
            overbought,
            trade_amount,
            poll_secs,
            holding: false,
        }
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn analyze(&mut self, candles: &[Candle]) -> Signal {
        let closes = closes(candles);
        let (Some(value), Some(&price)) = (rsi(&closes, self.period), closes.last()) else {
            debug!("RSI: {} candles, need {}", closes.len(), self.period + 1);
            return Signal::None;
        };

        debug!("Price: {:.2}  RSI: {:.2}  holding: {}", price, value, self.holding);

        if value < self.oversold && !self.holding {
            let reason = format!("RSI oversold ({value:.2})");
            info!("BUY signal: {}", reason);
            self.holding = true;
            Signal::Buy(TradeIntent::new(price, self.trade_amount, reason))
        } else if value > self.overbought && self.holding {
            let reason = format!("RSI overbought ({value:.2})");
            info!("SELL signal: {}", reason);
            self.holding = false;
            Signal::Sell(TradeIntent::new(price, self.trade_amount, reason))
        } else {
            Signal::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(closes: impl IntoIterator<Item = f64>) -> Vec<Candle> {
        closes
            .into_iter()
            .enumerate()
            .map(|(i, c)| Candle { open_time: i as i64, open: c, high: c, low: c, close: c, volume: 1.0 })
            .collect()
    }

    #[test]
    fn oversold_buys_once_then_overbought_sells() {
        let mut s = RsiStrategy::new(14, 30.0, 70.0, 2.0, 300);
        let falling = window((0..34).map(|i| 200.0 - i as f64));
        let rising  = window((0..34).map(|i| 100.0 + i as f64));

        let sig = s.analyze(&falling);
        assert!(matches!(sig, Signal::Buy(ref t) if t.quantity == 2.0 && t.price == 167.0));
        // still oversold, but already long
        assert!(s.analyze(&falling).is_none());

        assert!(matches!(s.analyze(&rising), Signal::Sell(_)));
        assert!(!s.is_holding());
        // overbought while flat → nothing
        assert!(s.analyze(&rising).is_none());
    }

    #[test]
    fn too_few_candles() {
        let mut s = RsiStrategy::new(14, 30.0, 70.0, 1.0, 300);
        assert!(s.analyze(&window((0..14).map(|i| 100.0 - i as f64))).is_none());
        assert!(!s.is_holding());
    }
}
