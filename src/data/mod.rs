//! Raw trade and context data
//!
//! Per-server exports are read once into typed records. Columns that may or
//! may not exist in a given export are tracked by [`TradeColumns`] presence
//! flags so downstream code never inspects table shape again.
//!
//! - [`loader`]: directory walking, label resolution, token filter
//! - [`table`]: CSV tables with by-name column lookup
//! - [`token`]: token identifier derivation
//! - [`timestamp`]: lenient instant parsing

pub mod loader;
pub mod table;
pub mod timestamp;
pub mod token;


pub use loader::DatasetLoader;
pub use timestamp::parse_timestamp;
pub use token::{extract_token, token_from_cur_id};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Auxiliary key/value properties attached to a trade
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeProps {
    pub diff: Option<f64>,
    pub dex_slip: Option<f64>,
    pub cex_slip: Option<f64>,
    pub execution_eta: Option<f64>,
    pub execution_mode: Option<String>,
}

impl TradeProps {
    /// Parse a JSON `props` payload using the export's key-matching rules.
    /// Anything that is not a JSON object yields empty properties.
    pub fn from_json(payload: &str) -> Self {
        let mut props = TradeProps::default();
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return props;
        }
        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return props,
        };
        let Some(object) = value.as_object() else {
            return props;
        };

        for (key, raw) in object {
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if key == "diff" {
                props.diff = json_f64(raw);
            } else if key == "dexslip" || key == "dex_slip" || (key.contains("dex") && key.contains("slip")) {
                props.dex_slip = json_f64(raw);
            } else if key == "cexslip" || key == "cex_slip" || (key.contains("cex") && key.contains("slip")) {
                props.cex_slip = json_f64(raw);
            } else if key == "executioneta" || key == "execeta" || key == "eta" || (key.contains("eta") && key.contains("exec")) {
                props.execution_eta = json_f64(raw);
            } else if key == "exec" || key == "execution" || key == "mode" {
                props.execution_mode = match raw {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                };
            }
        }
        props
    }
}

fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// One executed (or rejected) trade joined with its diff snapshot
#[derive(Debug, Clone, Default)]
pub struct TradeRecord {
    pub server_id: String,
    pub id: Option<String>,
    pub token: Option<String>,
    pub pair: Option<String>,
    pub cur_id: Option<String>,
    pub status: Option<String>,
    pub reject_reason: Option<String>,
    /// Primary event time
    pub time: Option<DateTime<Utc>>,
    pub diff_time: Option<DateTime<Utc>>,
    pub executed_qty_dst: Option<f64>,
    pub executed_dst_price: Option<f64>,
    pub executed_qty_src: Option<f64>,
    pub executed_src_price: Option<f64>,
    pub buy_diff_bps: Option<f64>,
    pub sell_diff_bps: Option<f64>,
    pub cex_vol: Option<f64>,
    pub dex_volume: Option<f64>,
    pub server_buy: Option<f64>,
    pub server_sell: Option<f64>,
    pub net_profit: Option<f64>,
    pub executed_profit: Option<f64>,
    pub executed_gross_profit: Option<f64>,
    pub estimated_qty: Option<f64>,
    pub is_hedged: Option<f64>,
    pub is_partial_fill: Option<f64>,
    pub has_diff_match: Option<f64>,
    pub props: TradeProps,
    pub regression_label: Option<f64>,
    pub class_label: Option<f64>,
}

/// Which optional trade columns exist in the loaded exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TradeColumns {
    pub id: bool,
    pub token: bool,
    pub pair: bool,
    pub cur_id: bool,
    pub status: bool,
    pub reject_reason: bool,
    pub diff_time: bool,
    pub estimated_qty: bool,
    pub is_hedged: bool,
    pub is_partial_fill: bool,
    pub has_diff_match: bool,
    pub props: bool,
    pub execution_mode: bool,
    pub executed_profit: bool,
    pub executed_gross_profit: bool,
    pub regression_label: bool,
    pub class_label: bool,
}

impl TradeColumns {
    /// Columns present in either export
    pub fn union(self, other: TradeColumns) -> TradeColumns {
        TradeColumns {
            id: self.id || other.id,
            token: self.token || other.token,
            pair: self.pair || other.pair,
            cur_id: self.cur_id || other.cur_id,
            status: self.status || other.status,
            reject_reason: self.reject_reason || other.reject_reason,
            diff_time: self.diff_time || other.diff_time,
            estimated_qty: self.estimated_qty || other.estimated_qty,
            is_hedged: self.is_hedged || other.is_hedged,
            is_partial_fill: self.is_partial_fill || other.is_partial_fill,
            has_diff_match: self.has_diff_match || other.has_diff_match,
            props: self.props || other.props,
            execution_mode: self.execution_mode || other.execution_mode,
            executed_profit: self.executed_profit || other.executed_profit,
            executed_gross_profit: self.executed_gross_profit || other.executed_gross_profit,
            regression_label: self.regression_label || other.regression_label,
            class_label: self.class_label || other.class_label,
        }
    }
}

/// Trades of one or more servers plus the columns they carry
#[derive(Debug, Clone, Default)]
pub struct TradeSet {
    pub records: Vec<TradeRecord>,
    pub columns: TradeColumns,
}

impl TradeSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Wallet balance snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSnapshot {
    pub time: Option<DateTime<Utc>>,
    pub total_usdt: Option<f64>,
    pub total_dex_usdt: Option<f64>,
    pub total_cex_usdt: Option<f64>,
}

/// Gas balance snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GasSnapshot {
    pub time: Option<DateTime<Utc>>,
    pub gas: Option<f64>,
    pub is_low: Option<f64>,
}

/// On-chain contract transaction outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractEvent {
    pub time: Option<DateTime<Utc>>,
    pub is_error: Option<f64>,
}

/// Context streams of a single server; an absent stream is `None`
#[derive(Debug, Clone, Default)]
pub struct ContextStreams {
    pub balances: Option<Vec<BalanceSnapshot>>,
    pub gas: Option<Vec<GasSnapshot>>,
    pub contracts: Option<Vec<ContractEvent>>,
}

impl ContextStreams {
    pub fn is_empty(&self) -> bool {
        self.balances.is_none() && self.gas.is_none() && self.contracts.is_none()
    }
}

/// Everything the feature builder consumes
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub trades: TradeSet,
    pub context_by_server: BTreeMap<String, ContextStreams>,
}
