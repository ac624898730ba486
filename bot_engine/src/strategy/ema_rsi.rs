/// strategy/ema_rsi.rs - EMA20/EMA50 trend pullback with RSI confirmation
///
/// ─────────────────────────────────────────────────────────────────────────
/// ENTRY (flat only, all must hold on the latest candle t):
///
///   trend      close_t > EMA50_t  ∧  EMA50_t > EMA50_{t−1}
///   pullback   low_{t−1} ≤ EMA20_{t−1}
///   breakout   close_t > EMA20_t
///   extension  close_t < EMA20_t · 1.06
///   momentum   RSI14_t > 50
///   cooldown   bar − last_entry_bar > 2
///
///   stop  = low_{t−1} · 0.997
///   risk  = close_t − stop
///   TP1   = close_t + 2·risk
///
/// EXITS (position open, first match wins, one signal per call):
///
///   1. breakeven  (close − entry)/entry ≥ 2% ∧ stop < entry ⇒ stop = entry
///                 (state only, never a signal by itself)
///   2. stop-loss  low ≤ stop                 ⇒ sell remaining, close
///   3. TP1        ¬tp1 ∧ high ≥ TP1           ⇒ sell 50% of initial
///   4. trailing   tp1 ∧ low ≤ highest · 0.98  ⇒ sell remaining, close
///
/// The bar counter advances once per flat call, not once per new candle:
/// with a poll shorter than the candle interval, "2 bars" of cooldown is
/// two calls, not two distinct candles.
/// ─────────────────────────────────────────────────────────────────────────
use tracing::{debug, info};

use crate::indicators::{ema_series, rsi};
use crate::models::{closes, Candle, Signal, TradeIntent};

/// Candles requested per analysis
pub const WINDOW: usize = 100;
/// Below this many candles the strategy stays silent
pub const MIN_CANDLES: usize = 60;

const FAST_EMA:   usize = 20;
const SLOW_EMA:   usize = 50;
const RSI_PERIOD: usize = 14;

const RSI_MOMENTUM:      f64 = 50.0;
const MAX_EXTENSION:     f64 = 1.06;
const STOP_BUFFER:       f64 = 0.997;
const TP1_R_MULTIPLE:    f64 = 2.0;
const TP1_FRACTION:      f64 = 0.5;
const BREAKEVEN_TRIGGER: f64 = 0.02;
const TRAILING_FRAC:     f64 = 0.98;
const COOLDOWN_BARS:     u64 = 2;

/// Open trade bookkeeping.  `0 ≤ remaining_amount ≤ initial_amount`.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub entry_price:      f64,
    pub stop_loss:        f64,
    pub take_profit_1:    f64,
    pub initial_amount:   f64,
    pub remaining_amount: f64,
    /// entry − initial stop
    pub risk:             f64,
    pub pullback_low:     f64,
}

/// Indicator values for the latest two candles of a window.
#[derive(Debug, Clone, Copy)]
struct BarView {
    close:      f64,
    high:       f64,
    low:        f64,
    prev_low:   f64,
    ema20:      f64,
    ema50:      f64,
    prev_ema20: f64,
    prev_ema50: f64,
    rsi:        f64,
}

impl BarView {
    fn from_window(candles: &[Candle]) -> Option<Self> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        let closes = closes(candles);
        let ema20: Vec<Option<f64>> = ema_series(&closes, FAST_EMA).collect();
        let ema50: Vec<Option<f64>> = ema_series(&closes, SLOW_EMA).collect();
        let n = candles.len();
        let (cur, prev) = (&candles[n - 1], &candles[n - 2]);

        Some(Self {
            close:      cur.close,
            high:       cur.high,
            low:        cur.low,
            prev_low:   prev.low,
            ema20:      ema20[n - 1]?,
            ema50:      ema50[n - 1]?,
            prev_ema20: ema20[n - 2]?,
            prev_ema50: ema50[n - 2]?,
            rsi:        rsi(&closes, RSI_PERIOD)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EmaRsiStrategy {
    pub(crate) trade_amount: f64,
    pub(crate) poll_secs:    u64,
    position: Option<Position>,
    bar_index:      u64,
    last_entry_bar: Option<u64>,
    tp1_reached:    bool,
    highest_since_entry: f64,
}

impl EmaRsiStrategy {
    pub fn new(trade_amount: f64, poll_secs: u64) -> Self {
        Self {
            trade_amount,
            poll_secs,
            position: None,
            bar_index: 0,
            last_entry_bar: None,
            tp1_reached: false,
            highest_since_entry: 0.0,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn tp1_reached(&self) -> bool {
        self.tp1_reached
    }

    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    pub fn highest_since_entry(&self) -> f64 {
        self.highest_since_entry
    }

    pub fn analyze(&mut self, candles: &[Candle]) -> Signal {
        let Some(bar) = BarView::from_window(candles) else {
            debug!("EMA/RSI: insufficient data ({} candles)", candles.len());
            return Signal::None;
        };

        debug!(
            "Close: {:.2}  EMA20: {:.2}  EMA50: {:.2}  RSI: {:.2}  open: {}",
            bar.close, bar.ema20, bar.ema50, bar.rsi, self.position.is_some()
        );

        if self.position.is_some() {
            self.evaluate_exit(&bar)
        } else {
            self.evaluate_entry(&bar)
        }
    }

    fn evaluate_exit(&mut self, bar: &BarView) -> Signal {
        let Some(pos) = self.position.as_mut() else {
            return Signal::None;
        };
        self.highest_since_entry = self.highest_since_entry.max(bar.high);

        // 1. Breakeven
        let profit = (bar.close - pos.entry_price) / pos.entry_price;
        if profit >= BREAKEVEN_TRIGGER && pos.stop_loss < pos.entry_price {
            info!(
                "Breakeven: stop {:.2} → {:.2} (profit {:.2}%)",
                pos.stop_loss, pos.entry_price, profit * 100.0
            );
            pos.stop_loss = pos.entry_price;
        }

        // 2. Stop-loss
        if bar.low <= pos.stop_loss {
            let qty  = pos.remaining_amount;
            let stop = pos.stop_loss;
            self.close_position();
            let reason = format!("Stop-loss hit (low {:.2} <= stop {:.2})", bar.low, stop);
            info!("SELL signal: {}", reason);
            return Signal::Sell(TradeIntent::new(bar.close, qty, reason));
        }

        // 3. Take-profit 1: half of the initial size, position stays open
        if !self.tp1_reached && bar.high >= pos.take_profit_1 {
            let qty = (pos.initial_amount * TP1_FRACTION).min(pos.remaining_amount);
            pos.remaining_amount -= qty;
            self.tp1_reached = true;
            let reason = format!(
                "TP1 reached (high {:.2} >= {:.2}), remaining {:.6}",
                bar.high, pos.take_profit_1, pos.remaining_amount
            );
            info!("SELL signal: {}", reason);
            return Signal::Sell(TradeIntent::new(bar.close, qty, reason));
        }

        // 4. Trailing stop, armed by TP1
        if self.tp1_reached {
            let highest = self.highest_since_entry;
            let trail = highest * TRAILING_FRAC;
            if bar.low <= trail {
                let qty = pos.remaining_amount;
                self.close_position();
                let reason = format!(
                    "Trailing stop (low {:.2} <= {:.2}, highest {:.2})",
                    bar.low, trail, highest
                );
                info!("SELL signal: {}", reason);
                return Signal::Sell(TradeIntent::new(bar.close, qty, reason));
            }
        }

        Signal::None
    }

    fn evaluate_entry(&mut self, bar: &BarView) -> Signal {
        self.bar_index += 1;

        let trend     = bar.close > bar.ema50 && bar.ema50 > bar.prev_ema50;
        let pullback  = bar.prev_low <= bar.prev_ema20;
        let breakout  = bar.close > bar.ema20;
        let extension = bar.close < bar.ema20 * MAX_EXTENSION;
        let momentum  = bar.rsi > RSI_MOMENTUM;
        let cooled    = self
            .last_entry_bar
            .map_or(true, |last| self.bar_index - last > COOLDOWN_BARS);

        if !(trend && pullback && breakout && extension && momentum && cooled) {
            debug!(
                "No entry: trend={} pullback={} breakout={} extension={} momentum={} cooled={}",
                trend, pullback, breakout, extension, momentum, cooled
            );
            return Signal::None;
        }

        let stop_loss = bar.prev_low * STOP_BUFFER;
        let risk = bar.close - stop_loss;
        if risk <= 0.0 {
            debug!("No entry: non-positive risk ({:.4})", risk);
            return Signal::None;
        }
        let take_profit_1 = bar.close + risk * TP1_R_MULTIPLE;

        self.position = Some(Position {
            entry_price:      bar.close,
            stop_loss,
            take_profit_1,
            initial_amount:   self.trade_amount,
            remaining_amount: self.trade_amount,
            risk,
            pullback_low:     bar.prev_low,
        });
        self.last_entry_bar = Some(self.bar_index);
        self.tp1_reached = false;
        self.highest_since_entry = bar.close;

        let reason = format!(
            "EMA pullback entry (EMA20 {:.2}, EMA50 {:.2}, RSI {:.2}) SL {:.2} TP1 {:.2}",
            bar.ema20, bar.ema50, bar.rsi, stop_loss, take_profit_1
        );
        info!("BUY signal: {}", reason);
        Signal::Buy(
            TradeIntent::new(bar.close, self.trade_amount, reason)
                .with_exits(stop_loss, take_profit_1),
        )
    }

    fn close_position(&mut self) {
        self.position = None;
        self.tp1_reached = false;
        self.highest_since_entry = 0.0;
    }
}
