/// backtest.rs - Offline replay of a strategy over historical candles
///
/// Feeds the strategy the same sliding window the live loop would fetch
/// (`window_size()` most recent candles ending at bar t) and fills every
/// signal at its intent price.
///
/// ARCHITECTURE
/// ┌─────────────────────────────────────────────────────┐
/// │  Candle feed (ascending)                            │
/// │        │                                            │
/// │        ▼  window = candles[t−W+1 ..= t]              │
/// │  StrategyEngine::analyze(window) → Signal           │
/// │        │                                            │
/// │   Buy  → add to position, average entry price       │
/// │   Sell → reduce position (capped at open qty),      │
/// │          realise (price − avg_entry) × qty          │
/// │        │                                            │
/// │   equity[t] = realised − fees + open × (close − avg)│
/// └─────────────────────────────────────────────────────┘
use std::fmt;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::models::{Candle, Side};
use crate::strategy::{StrategyEngine, StrategyKind};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Log every fill (true) or only the summary (false)
    pub verbose:  bool,
    /// Fee charged on each fill's notional
    pub fee_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { verbose: false, fee_rate: 0.001 }
    }
}

#[derive(Debug, Clone)]
pub struct Fill {
    pub bar:      usize,
    pub side:     Side,
    pub price:    f64,
    pub quantity: f64,
    pub reason:   String,
    /// Gross realised PnL (sells only)
    pub pnl:      Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub strategy:       StrategyKind,
    pub bars:           usize,
    pub buys:           usize,
    pub sells:          usize,
    pub winning_sells:  usize,
    pub realized_pnl:   f64,
    pub fees:           f64,
    pub open_quantity:  f64,
    pub unrealized_pnl: f64,
    /// Largest peak-to-trough fall of the equity curve, in quote currency
    pub max_drawdown:   f64,
    pub fills:          Vec<Fill>,
}

impl BacktestReport {
    pub fn win_rate(&self) -> f64 {
        if self.sells == 0 { 0.0 } else { self.winning_sells as f64 / self.sells as f64 }
    }

    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.fees + self.unrealized_pnl
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BOT ENGINE - BACKTEST REPORT ({})", self.strategy)?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Bars           : {}", self.bars)?;
        writeln!(f, "  Buys / Sells   : {} / {}", self.buys, self.sells)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate() * 100.0)?;
        writeln!(f, "  Realised PnL   : {:.4}", self.realized_pnl)?;
        writeln!(f, "  Fees           : {:.4}", self.fees)?;
        writeln!(f, "  Open Quantity  : {:.6}", self.open_quantity)?;
        writeln!(f, "  Unrealised PnL : {:.4}", self.unrealized_pnl)?;
        writeln!(f, "  Net PnL        : {:.4}", self.net_pnl())?;
        writeln!(f, "  Max Drawdown   : {:.4}", self.max_drawdown)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

#[derive(Default)]
struct Book {
    open_qty:  f64,
    avg_price: f64,
    realized:  f64,
    fees:      f64,
}

impl Book {
    fn equity(&self, mark: f64) -> f64 {
        self.realized - self.fees + self.open_qty * (mark - self.avg_price)
    }
}

/// Replay `candles` (ascending by open time) through `engine`.
pub fn run_backtest(
    engine:  &mut StrategyEngine,
    candles: &[Candle],
    cfg:     &BacktestConfig,
) -> Result<BacktestReport> {
    if candles.is_empty() {
        bail!("Backtest requires at least one candle");
    }

    let window = engine.window_size();
    let mut book = Book::default();
    let mut fills = Vec::new();
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;

    info!("Replaying {} bars through {} (window {})", candles.len(), engine.kind(), window);

    for end in 1..=candles.len() {
        let slice = &candles[end.saturating_sub(window)..end];
        let bar = end - 1;

        if let Some((side, intent)) = engine.analyze(slice).into_order() {
            match side {
                Side::Buy => {
                    let qty = intent.quantity;
                    let total = book.open_qty + qty;
                    book.avg_price = (book.avg_price * book.open_qty + intent.price * qty) / total;
                    book.open_qty = total;
                    book.fees += intent.price * qty * cfg.fee_rate;
                    fills.push(Fill {
                        bar, side, price: intent.price, quantity: qty, reason: intent.reason, pnl: None,
                    });
                }
                Side::Sell => {
                    let qty = intent.quantity.min(book.open_qty);
                    if qty <= 0.0 {
                        warn!("[Bar {bar:>5}] SELL with no open position ignored");
                    } else {
                        let pnl = (intent.price - book.avg_price) * qty;
                        book.realized += pnl;
                        book.fees += intent.price * qty * cfg.fee_rate;
                        book.open_qty -= qty;
                        if book.open_qty <= f64::EPSILON {
                            book.open_qty = 0.0;
                            book.avg_price = 0.0;
                        }
                        fills.push(Fill {
                            bar, side, price: intent.price, quantity: qty, reason: intent.reason, pnl: Some(pnl),
                        });
                    }
                }
            }

            if cfg.verbose {
                if let Some(fill) = fills.last().filter(|f| f.bar == bar) {
                    info!(
                        "  [Bar {:>5}] {:<4} {:.6} @ {:.2}  {}",
                        bar, fill.side, fill.quantity, fill.price, fill.reason
                    );
                }
            }
        }

        let equity = book.equity(candles[bar].close);
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(peak - equity);
    }

    let last_close = candles[candles.len() - 1].close;
    let buys = fills.iter().filter(|f| f.side == Side::Buy).count();
    let sells = fills.len() - buys;
    let winning_sells = fills.iter().filter(|f| f.pnl.is_some_and(|p| p > 0.0)).count();

    let report = BacktestReport {
        strategy: engine.kind(),
        bars: candles.len(),
        buys,
        sells,
        winning_sells,
        realized_pnl: book.realized,
        fees: book.fees,
        open_quantity: book.open_qty,
        unrealized_pnl: book.open_qty * (last_close - book.avg_price),
        max_drawdown,
        fills,
    };

    info!("{}", report);
    Ok(report)
}
