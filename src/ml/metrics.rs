//! Evaluation metrics
//!
//! Each metric reports a [`MetricOutcome`] instead of failing the run.
//! When outcomes are flattened into a metric map, a failed metric becomes
//! `NaN` (written as JSON `null`) and a skipped one is left out.

use crate::config::Task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Metric name to value; one map per fold or per holdout evaluation
pub type MetricMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    Value(f64),
    /// Not applicable, e.g. no probability output
    Skipped,
    Failed(String),
}

/// Mean and spread of one metric across folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

/// Metrics for the configured task
pub fn evaluate(task: Task, y_true: &[f64], y_pred: &[f64], y_prob: Option<&[f64]>) -> Vec<(&'static str, MetricOutcome)> {
    match task {
        Task::Classification => classification_metrics(y_true, y_pred, y_prob),
        Task::Regression => regression_metrics(y_true, y_pred),
    }
}

/// Flatten outcomes, logging every failure
pub fn to_metric_map(outcomes: Vec<(&'static str, MetricOutcome)>) -> MetricMap {
    let mut map = MetricMap::new();
    for (name, outcome) in outcomes {
        match outcome {
            MetricOutcome::Value(v) => {
                map.insert(name.to_string(), v);
            }
            MetricOutcome::Skipped => {}
            MetricOutcome::Failed(reason) => {
                warn!(metric = name, %reason, "Metric could not be computed");
                map.insert(name.to_string(), f64::NAN);
            }
        }
    }
    map
}

pub fn classification_metrics(
    y_true: &[f64],
    y_pred: &[f64],
    y_prob: Option<&[f64]>,
) -> Vec<(&'static str, MetricOutcome)> {
    let mut out = Vec::with_capacity(5);
    match y_prob {
        Some(prob) => {
            out.push(("roc_auc", roc_auc(y_true, prob)));
            out.push(("avg_precision", average_precision(y_true, prob)));
        }
        None => {
            out.push(("roc_auc", MetricOutcome::Skipped));
            out.push(("avg_precision", MetricOutcome::Skipped));
        }
    }

    let (mut tp, mut fp, mut fneg) = (0.0, 0.0, 0.0);
    for (t, p) in y_true.iter().zip(y_pred) {
        match (*t > 0.5, *p > 0.5) {
            (true, true) => tp += 1.0,
            (false, true) => fp += 1.0,
            (true, false) => fneg += 1.0,
            (false, false) => {}
        }
    }
    let precision = ratio_or_zero(tp, tp + fp);
    let recall = ratio_or_zero(tp, tp + fneg);
    let f1 = ratio_or_zero(2.0 * precision * recall, precision + recall);
    out.push(("precision", MetricOutcome::Value(precision)));
    out.push(("recall", MetricOutcome::Value(recall)));
    out.push(("f1", MetricOutcome::Value(f1)));
    out
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

pub fn regression_metrics(y_true: &[f64], y_pred: &[f64]) -> Vec<(&'static str, MetricOutcome)> {
    if y_true.is_empty() {
        let reason = || MetricOutcome::Failed("no samples".to_string());
        return vec![("mae", reason()), ("mape", reason()), ("rmse", reason())];
    }
    let n = y_true.len() as f64;
    let mut abs = 0.0;
    let mut pct = 0.0;
    let mut sq = 0.0;
    for (t, p) in y_true.iter().zip(y_pred) {
        let err = t - p;
        abs += err.abs();
        pct += err.abs() / t.abs().max(f64::EPSILON);
        sq += err * err;
    }
    vec![
        ("mae", MetricOutcome::Value(abs / n)),
        ("mape", MetricOutcome::Value(pct / n)),
        ("rmse", MetricOutcome::Value((sq / n).sqrt())),
    ]
}

/// Area under the ROC curve from average ranks (ties share a rank)
pub fn roc_auc(y_true: &[f64], scores: &[f64]) -> MetricOutcome {
    let positives = y_true.iter().filter(|t| **t > 0.5).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return MetricOutcome::Failed("only one class present in y_true".to_string());
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] > 0.5 {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let (p, n) = (positives as f64, negatives as f64);
    MetricOutcome::Value((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Step-wise average precision: `sum((R_k - R_{k-1}) * P_k)` over score thresholds
pub fn average_precision(y_true: &[f64], scores: &[f64]) -> MetricOutcome {
    let positives = y_true.iter().filter(|t| **t > 0.5).count();
    if positives == 0 {
        return MetricOutcome::Failed("no positive samples in y_true".to_string());
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut seen) = (0.0, 0.0);
    let mut previous_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if y_true[order[i]] > 0.5 {
                tp += 1.0;
            }
            seen += 1.0;
            i += 1;
        }
        let recall = tp / positives as f64;
        ap += (recall - previous_recall) * (tp / seen);
        previous_recall = recall;
    }
    MetricOutcome::Value(ap)
}

/// Fraction of rows where the predicted class matches
pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return f64::NAN;
    }
    let hits = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| (**t > 0.5) == (**p > 0.5))
        .count();
    hits as f64 / y_true.len() as f64
}

/// Coefficient of determination; a constant target scores 1 when predicted exactly, 0 otherwise
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return f64::NAN;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Mean and sample standard deviation of each metric across folds
///
/// The `fold` index is not a metric. `NaN` entries are ignored; a metric
/// seen in fewer than two folds has a `NaN` spread.
pub fn summarize(folds: &[MetricMap]) -> BTreeMap<String, MetricSummary> {
    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for fold in folds {
        for (name, v) in fold {
            if name != "fold" {
                values.entry(name.as_str()).or_default().push(*v);
            }
        }
    }
    values
        .into_iter()
        .map(|(name, vs)| {
            let observed: Vec<f64> = vs.into_iter().filter(|v| !v.is_nan()).collect();
            let n = observed.len() as f64;
            let mean = if observed.is_empty() {
                f64::NAN
            } else {
                observed.iter().sum::<f64>() / n
            };
            let std = if observed.len() < 2 {
                f64::NAN
            } else {
                (observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            };
            (name.to_string(), MetricSummary { mean, std })
        })
        .collect()
}
