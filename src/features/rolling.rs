//! Trailing time-window aggregates
//!
//! The window of row `i` covers rows `j <= i` (in time order) whose instant
//! lies in `(t_i - w, t_i]`. Rows sharing `t_i` that come later in order are
//! not visible to row `i`, so a row never sees anything recorded after it.
//! Missing values are skipped; an aggregate is missing when its window holds
//! no observation (standard deviation needs two). Mean, deviation and sum are
//! recomputed over each window; max and min come from monotonic deques.

use std::collections::VecDeque;

/// Aggregates of one row's trailing window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1)
    pub std: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub sum: Option<f64>,
}

/// Aggregates over the observed values of one window, in two passes over
/// the window itself. A window whose extremes coincide is constant: its mean
/// is that value and its deviation is exactly zero.
fn window_stats(values: &[Option<f64>], max: Option<f64>, min: Option<f64>) -> WindowStats {
    let observed = || values.iter().flatten().copied();
    let count = observed().count();
    if count == 0 {
        return WindowStats::default();
    }
    let sum: f64 = observed().sum();
    let constant = max.filter(|_| max == min);
    let mean = constant.unwrap_or(sum / count as f64);
    let std = match (count, constant) {
        (1, _) => None,
        (_, Some(_)) => Some(0.0),
        _ => {
            let m2: f64 = observed().map(|x| (x - mean).powi(2)).sum();
            Some((m2 / (count - 1) as f64).sqrt())
        }
    };
    WindowStats {
        count,
        mean: Some(mean),
        std,
        max,
        min,
        sum: Some(sum),
    }
}

/// Trailing-window aggregates for a time-ordered series.
///
/// `times` must be ascending; `window` uses the same unit as `times`.
pub fn trailing_stats(times: &[i64], values: &[Option<f64>], window: i64) -> Vec<WindowStats> {
    debug_assert_eq!(times.len(), values.len());

    let mut out = Vec::with_capacity(times.len());
    let mut max_queue: VecDeque<usize> = VecDeque::new();
    let mut min_queue: VecDeque<usize> = VecDeque::new();
    let mut start = 0;

    for i in 0..times.len() {
        if let Some(x) = values[i] {
            while max_queue.back().is_some_and(|&j| values[j].is_some_and(|v| v <= x)) {
                max_queue.pop_back();
            }
            max_queue.push_back(i);
            while min_queue.back().is_some_and(|&j| values[j].is_some_and(|v| v >= x)) {
                min_queue.pop_back();
            }
            min_queue.push_back(i);
        }

        let lower = times[i].saturating_sub(window);
        while start <= i && times[start] <= lower {
            if max_queue.front() == Some(&start) {
                max_queue.pop_front();
            }
            if min_queue.front() == Some(&start) {
                min_queue.pop_front();
            }
            start += 1;
        }

        let max = max_queue.front().and_then(|&j| values[j]);
        let min = min_queue.front().and_then(|&j| values[j]);
        out.push(window_stats(&values[start..=i], max, min));
    }
    out
}

/// `(value - mean) / std`; a zero or missing deviation yields missing
pub fn z_score(value: Option<f64>, stats: &WindowStats) -> Option<f64> {
    let std = stats.std.filter(|s| *s != 0.0)?;
    Some((value? - stats.mean?) / std)
}
