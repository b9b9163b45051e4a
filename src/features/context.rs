//! Context streams prepared for backward as-of joins
//!
//! Each stream is sorted by its own timestamp, derived columns are computed
//! on the full series, then only the first row of every distinct timestamp is
//! kept. A trade at `t` sees the last stream row at or before `t`.

use crate::data::{BalanceSnapshot, ContractEvent, GasSnapshot};
use chrono::{DateTime, Utc};

use super::rolling::trailing_stats;

const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// A time-indexed table of context values ready to be joined
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedStream {
    /// Ascending, distinct instants in microseconds
    pub times: Vec<i64>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl PreparedStream {
    /// Index of the latest row at or before `t`
    pub fn asof(&self, t: i64) -> Option<usize> {
        let after = self.times.partition_point(|&x| x <= t);
        after.checked_sub(1)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Build from time-sorted rows, keeping the first row per instant
    fn from_sorted(times: Vec<i64>, columns: Vec<(String, Vec<Option<f64>>)>) -> Self {
        let mut keep = Vec::with_capacity(times.len());
        for (i, t) in times.iter().enumerate() {
            if i == 0 || times[i - 1] != *t {
                keep.push(i);
            }
        }
        Self {
            times: keep.iter().map(|&i| times[i]).collect(),
            columns: columns
                .into_iter()
                .map(|(name, values)| (name, keep.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }
}

/// Rows with a parsable instant, stably sorted by it
fn sorted_by_time<T>(rows: &[T], time: impl Fn(&T) -> Option<DateTime<Utc>>) -> Vec<(i64, &T)> {
    let mut timed: Vec<(i64, &T)> = rows
        .iter()
        .filter_map(|r| time(r).map(|t| (t.timestamp_micros(), r)))
        .collect();
    timed.sort_by_key(|(t, _)| *t);
    timed
}

/// Balance deltas over `hours` observations plus the raw totals
pub fn prepare_balances(snapshots: &[BalanceSnapshot], hours: &[i64]) -> Option<PreparedStream> {
    let rows = sorted_by_time(snapshots, |s| s.time);
    if rows.is_empty() {
        return None;
    }
    let totals: Vec<Option<f64>> = rows.iter().map(|(_, s)| s.total_usdt).collect();

    let mut columns = Vec::new();
    for &h in hours {
        let lag = h as usize;
        let deltas = (0..totals.len())
            .map(|i| {
                let delta = if i >= lag {
                    match (totals[i], totals[i - lag]) {
                        (Some(now), Some(then)) => Some(now - then),
                        _ => None,
                    }
                } else {
                    None
                };
                Some(delta.unwrap_or(0.0))
            })
            .collect();
        columns.push((format!("balanceDelta_{}h", h), deltas));
    }
    columns.push(("total_usdt".to_string(), totals));
    columns.push((
        "total_dex_usdt".to_string(),
        rows.iter().map(|(_, s)| s.total_dex_usdt).collect(),
    ));
    columns.push((
        "total_cex_usdt".to_string(),
        rows.iter().map(|(_, s)| s.total_cex_usdt).collect(),
    ));

    let times = rows.iter().map(|(t, _)| *t).collect();
    Some(PreparedStream::from_sorted(times, columns))
}

pub fn prepare_gas(snapshots: &[GasSnapshot]) -> Option<PreparedStream> {
    let rows = sorted_by_time(snapshots, |s| s.time);
    if rows.is_empty() {
        return None;
    }
    let columns = vec![
        ("gasBalance".to_string(), rows.iter().map(|(_, s)| s.gas).collect()),
        ("isLowGas".to_string(), rows.iter().map(|(_, s)| s.is_low).collect()),
    ];
    let times = rows.iter().map(|(t, _)| *t).collect();
    Some(PreparedStream::from_sorted(times, columns))
}

/// Error flag plus a trailing one-hour error count
pub fn prepare_contracts(events: &[ContractEvent]) -> Option<PreparedStream> {
    let rows = sorted_by_time(events, |e| e.time);
    if rows.is_empty() {
        return None;
    }
    let times: Vec<i64> = rows.iter().map(|(t, _)| *t).collect();
    let errors: Vec<Option<f64>> = rows.iter().map(|(_, e)| e.is_error).collect();
    let counts = trailing_stats(&times, &errors, MICROS_PER_HOUR)
        .into_iter()
        .map(|s| s.sum)
        .collect();
    let columns = vec![
        ("isError".to_string(), errors),
        ("errorCount1h".to_string(), counts),
    ];
    Some(PreparedStream::from_sorted(times, columns))
}
