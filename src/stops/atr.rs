//! Average true range

use crate::gateway::Bar;
use rust_decimal::Decimal;

/// True range of `bar` given the previous close
pub fn true_range(bar: &Bar, prev_close: Option<Decimal>) -> Decimal {
    let range = bar.high - bar.low;
    match prev_close {
        Some(pc) => range.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
        None => range,
    }
}

/// Wilder-smoothed ATR over `period`
///
/// Seeds with the simple mean of the first `period` true ranges. With fewer
/// bars than that, returns the simple mean of what is available. `None` for
/// fewer than two bars.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<Decimal> {
    if bars.len() < 2 || period == 0 {
        return None;
    }

    let ranges: Vec<Decimal> = bars
        .windows(2)
        .map(|w| true_range(&w[1], Some(w[0].close)))
        .collect();

    if ranges.len() < period {
        let sum: Decimal = ranges.iter().sum();
        return Some(sum / Decimal::from(ranges.len()));
    }

    let n = Decimal::from(period);
    let seed: Decimal = ranges[..period].iter().sum::<Decimal>() / n;
    let atr = ranges[period..]
        .iter()
        .fold(seed, |atr, tr| (atr * (n - Decimal::ONE) + tr) / n);
    Some(atr)
}

/// ATR as a fraction of the last close
pub fn atr_pct(bars: &[Bar], period: usize) -> Option<Decimal> {
    let atr = average_true_range(bars, period)?;
    let close = bars.last()?.close;
    if close <= Decimal::ZERO {
        return None;
    }
    Some(atr / close)
}
