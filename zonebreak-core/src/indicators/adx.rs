//! ADX: Average Directional Index (Wilder).
//!
//! Steps:
//! 1. Compute +DM and -DM from consecutive candles
//! 2. Smooth +DM, -DM, and TR using Wilder smoothing (alpha = 1/period)
//! 3. +DI = 100 * smoothed(+DM) / smoothed(TR), 0 when smoothed TR is 0
//! 4. -DI likewise
//! 5. DX = 100 * |+DI - -DI| / (+DI + -DI), 0 when the DI sum is 0
//! 6. ADX = Wilder-smoothed DX
//!
//! Lookback: 2 * period - 1 (the first value needs 2 * period candles).

use crate::domain::Candle;
use crate::indicators::smoothing::{true_range, wilder_smooth};
use crate::indicators::Indicator;

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    name: String,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ADX period must be >= 1");
        Self {
            period,
            name: format!("adx_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Adx {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        2 * self.period - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let n = candles.len();
        if n < 2 {
            return vec![f64::NAN; n];
        }

        let mut plus_dm = vec![f64::NAN; n];
        let mut minus_dm = vec![f64::NAN; n];

        for i in 1..n {
            let (cur, prev) = (&candles[i], &candles[i - 1]);
            if cur.high.is_nan() || cur.low.is_nan() || prev.high.is_nan() || prev.low.is_nan() {
                continue;
            }
            let up_move = cur.high - prev.high;
            let down_move = prev.low - cur.low;

            plus_dm[i] = if up_move > down_move && up_move > 0.0 {
                up_move
            } else {
                0.0
            };
            minus_dm[i] = if down_move > up_move && down_move > 0.0 {
                down_move
            } else {
                0.0
            };
        }

        let smooth_tr = wilder_smooth(&true_range(candles), self.period);
        let smooth_plus_dm = wilder_smooth(&plus_dm, self.period);
        let smooth_minus_dm = wilder_smooth(&minus_dm, self.period);

        let mut dx = vec![f64::NAN; n];
        for i in 0..n {
            if smooth_tr[i].is_nan() || smooth_plus_dm[i].is_nan() || smooth_minus_dm[i].is_nan()
            {
                continue;
            }
            if smooth_tr[i] == 0.0 {
                // No range at all: no directional movement.
                dx[i] = 0.0;
                continue;
            }

            let plus_di = 100.0 * smooth_plus_dm[i] / smooth_tr[i];
            let minus_di = 100.0 * smooth_minus_dm[i] / smooth_tr[i];
            let di_sum = plus_di + minus_di;

            dx[i] = if di_sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / di_sum
            };
        }

        wilder_smooth(&dx, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{make_candles, make_ohlc};

    #[test]
    fn adx_bounds() {
        let candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 107.0, 98.0, 99.0),
            (99.0, 103.0, 97.0, 101.0),
            (101.0, 106.0, 100.0, 105.0),
            (105.0, 110.0, 103.0, 108.0),
            (108.0, 112.0, 106.0, 110.0),
            (110.0, 111.0, 104.0, 105.0),
            (105.0, 109.0, 103.0, 107.0),
            (107.0, 113.0, 105.0, 112.0),
        ]);
        let result = Adx::new(3).compute(&candles);
        for (i, &v) in result.iter().enumerate() {
            if !v.is_nan() {
                assert!((0.0..=100.0).contains(&v), "ADX out of bounds at {i}: {v}");
            }
        }
    }

    #[test]
    fn adx_strong_trend_is_elevated() {
        let data: Vec<_> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 5.0;
                (base - 1.0, base + 3.0, base - 3.0, base + 2.0)
            })
            .collect();
        let result = Adx::new(5).compute(&make_ohlc(&data));
        let last = *result.last().unwrap();
        assert!(last > 50.0, "ADX should be high in a strong trend, got {last}");
    }

    #[test]
    fn adx_flat_window_is_zero() {
        let candles = make_candles(&[1.1; 40]);
        let result = Adx::new(14).compute(&candles);
        assert_eq!(*result.last().unwrap(), 0.0);
    }

    #[test]
    fn adx_first_value_at_two_periods() {
        let data: Vec<_> = (0..28)
            .map(|i| {
                let base = 100.0 + (i % 3) as f64;
                (base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let result = Adx::new(14).compute(&make_ohlc(&data));
        assert!(result[26].is_nan());
        assert!(!result[27].is_nan());
    }

    #[test]
    fn adx_lookback() {
        assert_eq!(Adx::new(14).lookback(), 27);
        assert_eq!(Adx::new(7).lookback(), 13);
    }

    #[test]
    fn adx_too_few_candles() {
        let candles = make_ohlc(&[(100.0, 105.0, 95.0, 102.0)]);
        assert!(Adx::new(3).compute(&candles).iter().all(|v| v.is_nan()));
    }
}
