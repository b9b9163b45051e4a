//! Feature matrix construction
//!
//! Turns the loaded trades and per-server context streams into a
//! chronologically ordered [`FeatureFrame`], its target vector and the
//! [`FeatureMeta`] contract shared with training and serving.
//!
//! Every value in a row is computed from events at or before that row's
//! instant:
//! - rolling aggregates use trailing windows per (server, token) group
//! - context streams are joined backward (last observation at or before)

pub mod base;
pub mod context;
pub mod frame;
pub mod rolling;

#[cfg(test)]
mod tests;

pub use base::{safe_ratio, BaseValues, HOURLY_COLUMNS, ROLLING_NUMERIC_COLUMNS};
pub use frame::{Column, ColumnData, FeatureFrame};

use crate::config::{Task, TrainingConfig};
use crate::data::{ContextStreams, TradeRecord, TradeSet};
use crate::error::{MlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use base::rolling_input;
use context::{prepare_balances, prepare_contracts, prepare_gas, PreparedStream};
use rolling::{trailing_stats, z_score};

const MICROS_PER_MINUTE: i64 = 60_000_000;
const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// Textual trade fields always treated as categorical when present
const KNOWN_CATEGORICAL: [&str; 4] = ["status", "rejectReason", "propExecutionMode", "pair"];

/// Column layout the model was trained on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeta {
    pub feature_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub target: String,
    pub time_column: String,
    /// Instant of every feature row, row-aligned
    #[serde(skip)]
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Output of [`FeatureBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub features: FeatureFrame,
    pub target: Vec<f64>,
    pub meta: FeatureMeta,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Subset of rows, keeping features, target and timestamps aligned
    pub fn select_rows(&self, rows: &[usize]) -> FeatureSet {
        FeatureSet {
            features: self.features.select_rows(rows),
            target: rows.iter().map(|&i| self.target[i]).collect(),
            meta: FeatureMeta {
                timestamps: rows.iter().map(|&i| self.meta.timestamps[i]).collect(),
                ..self.meta.clone()
            },
        }
    }
}

/// Builds the feature matrix for one training configuration
pub struct FeatureBuilder<'a> {
    config: &'a TrainingConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(config: &'a TrainingConfig) -> Self {
        Self { config }
    }

    /// Build features, target and metadata. Inputs are not modified.
    pub fn build(
        &self,
        trades: &TradeSet,
        context_by_server: &BTreeMap<String, ContextStreams>,
    ) -> Result<FeatureSet> {
        if trades.is_empty() {
            return Ok(FeatureSet {
                meta: self.empty_meta(),
                ..FeatureSet::default()
            });
        }
        info!(trades = trades.len(), "Building feature matrix");

        let order = chronological_order(&trades.records);
        let records: Vec<&TradeRecord> = order.iter().map(|&i| &trades.records[i]).collect();
        let times: Vec<DateTime<Utc>> = records.iter().filter_map(|r| r.time).collect();
        let micros: Vec<i64> = times.iter().map(|t| t.timestamp_micros()).collect();
        let eps = self.config.imbalance_eps;
        let bases: Vec<BaseValues> = records.iter().map(|r| BaseValues::compute(r, eps)).collect();

        let mut frame = FeatureFrame::new(records.len());
        self.insert_trade_columns(&mut frame, trades, &records, &bases)?;
        self.insert_rolling_columns(&mut frame, &records, &bases, &micros)?;
        self.insert_context_columns(&mut frame, &records, &micros, context_by_server)?;

        self.finalize(frame, times)
    }

    fn empty_meta(&self) -> FeatureMeta {
        FeatureMeta {
            target: self.config.target().to_string(),
            time_column: self.config.time_column.clone(),
            ..FeatureMeta::default()
        }
    }

    /// Raw trade fields, labels and per-trade derived values
    fn insert_trade_columns(
        &self,
        frame: &mut FeatureFrame,
        trades: &TradeSet,
        records: &[&TradeRecord],
        bases: &[BaseValues],
    ) -> Result<()> {
        let cols = &trades.columns;
        let text = |f: fn(&TradeRecord) -> Option<String>| records.iter().map(|r| f(r)).collect::<Vec<_>>();
        let num = |f: fn(&TradeRecord) -> Option<f64>| records.iter().map(|r| f(r)).collect::<Vec<_>>();

        frame.insert_categorical(
            self.config.server_column.clone(),
            records.iter().map(|r| Some(r.server_id.clone())).collect(),
        )?;
        if cols.token {
            frame.insert_categorical(self.config.token_column.clone(), text(|r| r.token.clone()))?;
        }
        if cols.pair {
            frame.insert_categorical("pair", text(|r| r.pair.clone()))?;
        }
        if cols.cur_id {
            frame.insert_categorical("curId", text(|r| r.cur_id.clone()))?;
        }
        if cols.status {
            frame.insert_categorical("status", text(|r| r.status.clone()))?;
        }
        if cols.reject_reason {
            frame.insert_categorical("rejectReason", text(|r| r.reject_reason.clone()))?;
        }

        // fixed numeric set, created all-missing when the export lacks it
        frame.insert_numeric("executedQtyDst", num(|r| r.executed_qty_dst))?;
        frame.insert_numeric("executedDstPrice", num(|r| r.executed_dst_price))?;
        frame.insert_numeric("executedQtySrc", num(|r| r.executed_qty_src))?;
        frame.insert_numeric("executedSrcPrice", num(|r| r.executed_src_price))?;
        frame.insert_numeric("buyDiffBps", num(|r| r.buy_diff_bps))?;
        frame.insert_numeric("sellDiffBps", num(|r| r.sell_diff_bps))?;
        frame.insert_numeric("cexVol", num(|r| r.cex_vol))?;
        frame.insert_numeric("dexVolume", num(|r| r.dex_volume))?;
        frame.insert_numeric("serverBuy", num(|r| r.server_buy))?;
        frame.insert_numeric("serverSell", num(|r| r.server_sell))?;
        frame.insert_numeric("netProfit", num(|r| r.net_profit))?;

        if cols.executed_profit {
            frame.insert_numeric("executedProfit", num(|r| r.executed_profit))?;
        }
        if cols.executed_gross_profit {
            frame.insert_numeric("executedGrossProfit", num(|r| r.executed_gross_profit))?;
        }
        if cols.estimated_qty {
            frame.insert_numeric("estimatedQty", num(|r| r.estimated_qty))?;
        }
        if cols.is_hedged {
            frame.insert_numeric("isHedged", num(|r| r.is_hedged))?;
        }
        if cols.is_partial_fill {
            frame.insert_numeric("isPartialFill", num(|r| r.is_partial_fill))?;
        }
        if cols.has_diff_match {
            frame.insert_numeric("hasDiffMatch", num(|r| r.has_diff_match))?;
        }
        if cols.props {
            frame.insert_numeric("propDiff", num(|r| r.props.diff))?;
            frame.insert_numeric("propDexSlip", num(|r| r.props.dex_slip))?;
            frame.insert_numeric("propCexSlip", num(|r| r.props.cex_slip))?;
            frame.insert_numeric("propExecutionEta", num(|r| r.props.execution_eta))?;
        }
        if cols.execution_mode {
            frame.insert_categorical("propExecutionMode", text(|r| r.props.execution_mode.clone()))?;
        }

        if cols.regression_label {
            frame.insert_numeric(self.config.regression_target.clone(), num(|r| r.regression_label))?;
        }
        if cols.class_label {
            frame.insert_numeric(self.config.target_column.clone(), num(|r| r.class_label))?;
        }

        let derived = |f: fn(&BaseValues) -> Option<f64>| bases.iter().map(f).collect::<Vec<_>>();
        frame.insert_numeric("grossNotionalDst", derived(|b| Some(b.gross_notional_dst)))?;
        frame.insert_numeric("grossNotionalSrc", derived(|b| Some(b.gross_notional_src)))?;
        frame.insert_numeric("tradePnLRatio", derived(|b| b.trade_pnl_ratio))?;
        frame.insert_numeric("spreadMid", derived(|b| b.spread_mid))?;
        frame.insert_numeric("liquidityImbalance", derived(|b| b.liquidity_imbalance))?;
        frame.insert_numeric("hasRejectReason", derived(|b| Some(b.has_reject_reason)))?;
        Ok(())
    }

    /// Trailing minute and hour window aggregates per (server, token) group
    fn insert_rolling_columns(
        &self,
        frame: &mut FeatureFrame,
        records: &[&TradeRecord],
        bases: &[BaseValues],
        micros: &[i64],
    ) -> Result<()> {
        let groups = group_rows(records);
        let n = records.len();

        let rolled = |column: &str, window: i64| {
            let mut stats = vec![rolling::WindowStats::default(); n];
            for rows in groups.values() {
                let times: Vec<i64> = rows.iter().map(|&i| micros[i]).collect();
                let values: Vec<Option<f64>> = rows
                    .iter()
                    .map(|&i| rolling_input(records[i], &bases[i], column))
                    .collect();
                for (k, s) in trailing_stats(&times, &values, window).into_iter().enumerate() {
                    stats[rows[k]] = s;
                }
            }
            stats
        };
        let pick = |stats: &[rolling::WindowStats], f: fn(&rolling::WindowStats) -> Option<f64>| {
            stats.iter().map(f).collect::<Vec<_>>()
        };

        for &minutes in &self.config.feature_windows_minutes {
            let window = minutes * MICROS_PER_MINUTE;
            let label = format!("{}m", minutes);
            for column in ROLLING_NUMERIC_COLUMNS {
                let stats = rolled(column, window);
                frame.insert_numeric(format!("{}_mean_{}", column, label), pick(&stats, |s| s.mean))?;
                frame.insert_numeric(format!("{}_std_{}", column, label), pick(&stats, |s| s.std))?;
                frame.insert_numeric(format!("{}_max_{}", column, label), pick(&stats, |s| s.max))?;
                frame.insert_numeric(format!("{}_min_{}", column, label), pick(&stats, |s| s.min))?;
            }

            let rejects = rolled("hasRejectReason", window);
            frame.insert_numeric(format!("rejectRate_{}", label), pick(&rejects, |s| s.mean))?;

            let imbalance = rolled("liquidityImbalance", window);
            let z: Vec<Option<f64>> = imbalance
                .iter()
                .zip(bases)
                .map(|(s, b)| z_score(b.liquidity_imbalance, s))
                .collect();
            frame.insert_numeric(format!("liquidityImbalance_mean_{}", label), pick(&imbalance, |s| s.mean))?;
            frame.insert_numeric(format!("liquidityImbalance_std_{}", label), pick(&imbalance, |s| s.std))?;
            frame.insert_numeric(format!("liquidityImbalance_z_{}", label), z)?;
        }

        for &hours in &self.config.feature_windows_hours {
            let window = hours * MICROS_PER_HOUR;
            let label = format!("{}h", hours);
            for column in HOURLY_COLUMNS {
                let stats = rolled(column, window);
                frame.insert_numeric(format!("{}_mean_{}", column, label), pick(&stats, |s| s.mean))?;
                frame.insert_numeric(format!("{}_std_{}", column, label), pick(&stats, |s| s.std))?;
            }
        }
        Ok(())
    }

    /// Backward as-of join of every server's prepared context streams
    fn insert_context_columns(
        &self,
        frame: &mut FeatureFrame,
        records: &[&TradeRecord],
        micros: &[i64],
        context_by_server: &BTreeMap<String, ContextStreams>,
    ) -> Result<()> {
        let hours = &self.config.feature_windows_hours;
        let prepared: BTreeMap<&str, Vec<PreparedStream>> = context_by_server
            .iter()
            .map(|(server, streams)| {
                let joined: Vec<PreparedStream> = [
                    streams.balances.as_deref().and_then(|b| prepare_balances(b, hours)),
                    streams.gas.as_deref().and_then(prepare_gas),
                    streams.contracts.as_deref().and_then(prepare_contracts),
                ]
                .into_iter()
                .flatten()
                .collect();
                (server.as_str(), joined)
            })
            .collect();

        // column order follows the first server that carries each stream
        let mut names: Vec<String> = Vec::new();
        for streams in prepared.values() {
            for stream in streams {
                for name in stream.column_names() {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        if names.is_empty() {
            return Ok(());
        }

        let mut values: HashMap<&str, Vec<Option<f64>>> =
            names.iter().map(|n| (n.as_str(), vec![None; records.len()])).collect();
        for (row, record) in records.iter().enumerate() {
            let Some(streams) = prepared.get(record.server_id.as_str()) else {
                continue;
            };
            for stream in streams {
                let Some(hit) = stream.asof(micros[row]) else {
                    continue;
                };
                for (name, column) in &stream.columns {
                    if let Some(target) = values.get_mut(name.as_str()) {
                        target[row] = column[hit];
                    }
                }
            }
        }

        for name in &names {
            let column = values.remove(name.as_str()).unwrap_or_default();
            frame.insert_numeric(name.clone(), column)?;
        }
        Ok(())
    }

    /// Extract the target, drop unlabeled rows and empty columns, classify columns
    fn finalize(&self, mut frame: FeatureFrame, times: Vec<DateTime<Utc>>) -> Result<FeatureSet> {
        let target_name = self.config.target().to_string();
        let target_column = match frame.remove(&target_name) {
            Some(ColumnData::Numeric(values)) => values,
            Some(ColumnData::Categorical(_)) => {
                return Err(MlError::SchemaMismatch(format!(
                    "target column {} is not numeric",
                    target_name
                )))
            }
            None => return Err(MlError::MissingTarget(target_name)),
        };
        frame.remove(&self.config.regression_target);
        frame.remove(&self.config.target_column);
        frame.remove(&self.config.time_column);

        let keep: Vec<usize> = (0..target_column.len())
            .filter(|&i| target_column[i].is_some())
            .collect();
        let frame = frame.select_rows(&keep);
        let target: Vec<f64> = keep.iter().filter_map(|&i| target_column[i]).collect();
        let timestamps: Vec<DateTime<Utc>> = keep.iter().map(|&i| times[i]).collect();
        let mut features = frame;

        let dropped: Vec<String> = features
            .columns()
            .iter()
            .filter(|c| !c.data.has_observations())
            .map(|c| c.name.clone())
            .collect();
        if !dropped.is_empty() {
            info!(count = dropped.len(), columns = ?dropped, "Dropping features with no observed values");
            features.retain_columns(|c| c.data.has_observations());
        }

        let feature_columns = features.names();
        let mut categorical_columns: Vec<String> = feature_columns
            .iter()
            .filter(|name| {
                features.column(name).is_some_and(|c| c.is_categorical())
                    || KNOWN_CATEGORICAL.contains(&name.as_str())
                    || **name == self.config.server_column
                    || **name == self.config.token_column
            })
            .cloned()
            .collect();
        categorical_columns.sort();
        let numeric_columns: Vec<String> = feature_columns
            .iter()
            .filter(|name| !categorical_columns.contains(name))
            .cloned()
            .collect();

        if self.config.task == Task::Classification {
            let positives = target.iter().filter(|v| **v > 0.5).count();
            info!(
                positives,
                negatives = target.len() - positives,
                "Target distribution"
            );
        }
        info!(
            rows = target.len(),
            features = feature_columns.len(),
            categorical = categorical_columns.len(),
            "Feature matrix ready"
        );

        Ok(FeatureSet {
            features,
            target,
            meta: FeatureMeta {
                feature_columns,
                categorical_columns,
                numeric_columns,
                target: target_name,
                time_column: self.config.time_column.clone(),
                timestamps,
            },
        })
    }
}

/// Positions of timestamped records, stably sorted by instant
fn chronological_order(records: &[TradeRecord]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len())
        .filter(|&i| records[i].time.is_some())
        .collect();
    order.sort_by_key(|&i| records[i].time);
    order
}

/// Row positions per (server, token); rows arrive already time-ordered
fn group_rows<'r>(records: &[&'r TradeRecord]) -> BTreeMap<(&'r str, Option<&'r str>), Vec<usize>> {
    let mut groups: BTreeMap<(&str, Option<&str>), Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        groups
            .entry((record.server_id.as_str(), record.token.as_deref()))
            .or_default()
            .push(i);
    }
    groups
}
