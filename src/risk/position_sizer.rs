//! Kelly-criterion position sizing.
//!
//! kelly_fraction = (p·avg_win − q·avg_loss) / avg_win, where p is the win
//! rate and q = 1 − p. The fraction is clamped into a configured band so a
//! degenerate input never produces a zero, negative, or oversized position.

use crate::config::ProposalConfig;

/// Raw Kelly fraction; `None` when `avg_win` is not a positive finite number.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> Option<f64> {
    if !(avg_win.is_finite() && avg_win > 0.0) {
        return None;
    }
    let p = if win_rate.is_finite() { win_rate.clamp(0.0, 1.0) } else { 0.0 };
    let q = 1.0 - p;
    let loss = if avg_loss.is_finite() { avg_loss.abs() } else { 0.0 };
    let k = (p * avg_win - q * loss) / avg_win;
    k.is_finite().then_some(k)
}

/// Kelly sizer with a floor and a cap on the position fraction.
#[derive(Debug, Clone)]
pub struct KellySizer {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub min: f64,
    pub max: f64,
}

impl KellySizer {
    pub fn new(win_rate: f64, avg_win: f64, avg_loss: f64, min: f64, max: f64) -> Self {
        Self { win_rate, avg_win, avg_loss, min, max }
    }

    pub fn from_config(cfg: &ProposalConfig) -> Self {
        Self::new(cfg.win_rate, cfg.avg_win, cfg.avg_loss, cfg.min_size_pct, cfg.max_size_pct)
    }

    /// Position size as a fraction of the portfolio, always in `[min, max]`.
    pub fn size_pct(&self) -> f64 {
        let lo = self.min.min(self.max);
        kelly_fraction(self.win_rate, self.avg_win, self.avg_loss)
            .unwrap_or(lo)
            .clamp(lo, self.max)
    }
}
