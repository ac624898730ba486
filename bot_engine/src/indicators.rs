/// indicators.rs - Technical indicators over ordered price sequences
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// SMA (last N values):
///
///   SMA_N = (1/N) · Σ_{i=n−N}^{n−1} P_i
///
/// EMA (seeded with the SMA of the first `period` values):
///
///   k     = 2 / (period + 1)
///   EMA_0 = (1/period) · Σ_{i<period} P_i
///   EMA_t = P_t · k + EMA_{t−1} · (1 − k)
///
/// RSI (Wilder smoothing):
///
///   Δ_i   = P_i − P_{i−1}
///   G_i   = max(Δ_i, 0),  L_i = max(−Δ_i, 0)
///   AG, AL seeded with the mean of the first `period` G / L values, then
///   AG ← (AG·(period−1) + G_i) / period   (same for AL)
///   RSI   = 100 − 100 / (1 + AG/AL),  and 100 when AL = 0
///
/// CROSSOVERS (equality stays on the "not yet crossed" side):
///
///   bullish ⇔ fast_{t−1} ≤ slow_{t−1} ∧ fast_t > slow_t
///   bearish ⇔ fast_{t−1} ≥ slow_{t−1} ∧ fast_t < slow_t
/// ─────────────────────────────────────────────────────────────────────────

/// Simple average of the last `period` values.
/// `None` when fewer than `period` values (or `period == 0`).
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let tail = &prices[prices.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

/// EMA of the whole sequence.  `None` if `prices.len() < period`.
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().flatten()
}

/// Lazy EMA series aligned 1:1 with `prices`: `None` for indices
/// `< period − 1`, otherwise the EMA of `prices[..=i]`.
///
/// The iterator is `Clone`, so a series can be restarted from any point.
pub fn ema_series(prices: &[f64], period: usize) -> EmaSeries<'_> {
    EmaSeries {
        prices,
        period,
        k: 2.0 / (period as f64 + 1.0),
        idx: 0,
        current: None,
    }
}

#[derive(Debug, Clone)]
pub struct EmaSeries<'a> {
    prices:  &'a [f64],
    period:  usize,
    k:       f64,
    idx:     usize,
    current: Option<f64>,
}

impl Iterator for EmaSeries<'_> {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.prices.len() {
            return None;
        }
        let i = self.idx;
        self.idx += 1;

        if self.period == 0 || i + 1 < self.period {
            return Some(None);
        }

        let value = match self.current {
            // Seed: SMA of the first `period` values
            None => self.prices[..self.period].iter().sum::<f64>() / self.period as f64,
            Some(prev) => self.prices[i] * self.k + prev * (1.0 - self.k),
        };
        self.current = Some(value);
        Some(Some(value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.prices.len() - self.idx;
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for EmaSeries<'_> {}

/// Wilder RSI over the whole sequence.  `None` if `prices.len() < period + 1`.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64>  = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let p = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / p;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Fast line crossed above slow line between two evaluations.
pub fn is_bullish_crossover(fast: f64, slow: f64, prev_fast: f64, prev_slow: f64) -> bool {
    prev_fast <= prev_slow && fast > slow
}

/// Fast line crossed below slow line between two evaluations.
pub fn is_bearish_crossover(fast: f64, slow: f64, prev_fast: f64, prev_slow: f64) -> bool {
    prev_fast >= prev_slow && fast < slow
}
