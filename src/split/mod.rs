//! Temporal splits
//!
//! Walk-forward folds with a purge gap between training and validation, and
//! the trailing holdout slice. Both are pure functions of the timestamp
//! vector, so the same data always yields the same partitions.
//!
//! Fold `i` validates on `[u[b(i+1)], u[b(i+2)]]` and trains on every row
//! strictly before `u[b(i+1)] - gap`, where `u` are the distinct sorted
//! instants and `b(k) = k * (len(u) - 1) / (folds + 1)`.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// Row positions of one cross-validation fold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Chronological train/holdout partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    /// Empty when the holdout is disabled
    pub holdout: Vec<usize>,
}

impl HoldoutSplit {
    pub fn is_enabled(&self) -> bool {
        !self.holdout.is_empty()
    }
}

/// Purged walk-forward folds over `timestamps`
pub fn time_splits(timestamps: &[DateTime<Utc>], fold_count: usize, gap: Duration) -> Vec<Fold> {
    let mut unique: Vec<DateTime<Utc>> = timestamps.to_vec();
    unique.sort();
    unique.dedup();

    if fold_count == 0 || unique.len() <= fold_count + 1 {
        warn!(
            distinct = unique.len(),
            folds = fold_count,
            "Not enough distinct timestamps for the requested folds"
        );
        return Vec::new();
    }

    let last = unique.len() - 1;
    let boundaries: Vec<usize> = (0..fold_count + 2)
        .map(|k| k * last / (fold_count + 1))
        .collect();

    let mut folds = Vec::with_capacity(fold_count);
    for i in 0..fold_count {
        let val_start = unique[boundaries[i + 1]];
        let val_end = unique[boundaries[i + 2]];
        let cutoff = val_start - gap;

        let train: Vec<usize> = (0..timestamps.len())
            .filter(|&r| timestamps[r] < cutoff)
            .collect();
        let validation: Vec<usize> = (0..timestamps.len())
            .filter(|&r| timestamps[r] >= val_start && timestamps[r] <= val_end)
            .collect();

        if train.is_empty() || validation.is_empty() {
            debug!(fold = i, train = train.len(), validation = validation.len(), "Skipping empty fold");
            continue;
        }
        folds.push(Fold { train, validation });
    }
    folds
}

/// Rows at or after `max(timestamps) - duration` form the holdout
pub fn holdout_split(timestamps: &[DateTime<Utc>], duration: Duration) -> HoldoutSplit {
    let all: Vec<usize> = (0..timestamps.len()).collect();
    let disabled = |reason: &str| {
        warn!(reason, "Holdout disabled; training on the full set");
        HoldoutSplit {
            train: all.clone(),
            holdout: Vec::new(),
        }
    };

    if duration <= Duration::zero() {
        return disabled("non-positive holdout duration");
    }
    let Some(max) = timestamps.iter().max() else {
        return disabled("no rows");
    };

    let cutoff = *max - duration;
    let (holdout, train): (Vec<usize>, Vec<usize>) =
        all.iter().partition(|&&r| timestamps[r] >= cutoff);

    if train.is_empty() {
        return disabled("holdout window covers every row");
    }
    if holdout.is_empty() {
        return disabled("holdout window is empty");
    }
    HoldoutSplit { train, holdout }
}
