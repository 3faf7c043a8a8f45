//! Shared building blocks: true range and Wilder smoothing.

use crate::domain::Candle;

/// True Range series.
///
/// TR[0] is NaN (no previous close); TR[t] = max(high-low, |high-prev_close|, |low-prev_close|).
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let n = candles.len();
    let mut tr = vec![f64::NAN; n];

    for i in 1..n {
        let h = candles[i].high;
        let l = candles[i].low;
        let pc = candles[i - 1].close;
        if h.is_nan() || l.is_nan() || pc.is_nan() {
            continue;
        }
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }

    tr
}

/// Wilder smoothing (alpha = 1/period).
///
/// Seeded with the mean of the first run of `period` consecutive non-NaN
/// values; the seed lands on the last index of that run. A NaN after the
/// seed invalidates the remainder of the output.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n < period {
        return result;
    }

    let mut run = 0;
    let mut seed_end = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            run = 0;
            continue;
        }
        run += 1;
        if run == period {
            seed_end = Some(i + 1);
            break;
        }
    }
    let Some(seed_end) = seed_end else {
        return result;
    };

    let seed = values[seed_end - period..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let alpha = 1.0 / period as f64;
    let mut prev = seed;
    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_ohlc, DEFAULT_EPSILON};

    #[test]
    fn true_range_basic() {
        let candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0), // max(8, |108-102|, |100-102|) = 8
            (106.0, 107.0, 98.0, 99.0),   // max(9, |107-106|, |98-106|) = 9
        ]);
        let tr = true_range(&candles);
        assert!(tr[0].is_nan());
        assert_approx(tr[1], 8.0, DEFAULT_EPSILON);
        assert_approx(tr[2], 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let candles = make_ohlc(&[
            (98.0, 102.0, 97.0, 100.0),
            (110.0, 115.0, 108.0, 112.0), // max(7, 15, 8) = 15
        ]);
        assert_approx(true_range(&candles)[1], 15.0, DEFAULT_EPSILON);
    }

    #[test]
    fn wilder_seed_is_mean_of_first_run() {
        let out = wilder_smooth(&[f64::NAN, 2.0, 4.0, 6.0, 8.0], 3);
        assert!(out[0].is_nan());
        assert!(out[2].is_nan());
        assert_approx(out[3], 4.0, DEFAULT_EPSILON);
        // 8/3 + 4 * 2/3
        assert_approx(out[4], 8.0 / 3.0 + 8.0 / 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn wilder_too_short() {
        assert!(wilder_smooth(&[1.0, 2.0], 3).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn wilder_constant_input_is_constant() {
        let out = wilder_smooth(&[5.0; 10], 4);
        for v in &out[3..] {
            assert_approx(*v, 5.0, DEFAULT_EPSILON);
        }
    }
}
