//! Per-server dataset loading
//!
//! Reads `<data_root>/<server>/trades_with_diff` plus the balance, gas and
//! contract-transaction context tables, unions all servers and resolves the
//! label columns.

use crate::config::{Task, TrainingConfig};
use crate::error::{MlError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::table::RawTable;
use super::token::{extract_token, token_from_cur_id};
use super::{
    BalanceSnapshot, ContextStreams, ContractEvent, Dataset, GasSnapshot, TradeColumns,
    TradeProps, TradeRecord, TradeSet,
};

/// Primary trade table of each server directory
pub const TRADES_TABLE: &str = "trades_with_diff";
pub const BALANCES_TABLE: &str = "balances_history";
pub const GAS_TABLE: &str = "gas_balances";
pub const CONTRACTS_TABLE: &str = "contract_transactions";

/// Profit-like columns tried in order when the regression target is empty
pub const LABEL_FALLBACK_COLUMNS: [&str; 3] = ["netProfit", "executedProfit", "executedGrossProfit"];

/// Loads and unions per-server exports
pub struct DatasetLoader<'a> {
    config: &'a TrainingConfig,
}

impl<'a> DatasetLoader<'a> {
    pub fn new(config: &'a TrainingConfig) -> Self {
        Self { config }
    }

    /// Load every configured server, apply the token filter and compute labels
    pub fn load(&self) -> Result<Dataset> {
        info!(root = %self.config.data_root.display(), "Loading datasets");

        let mut trades = TradeSet::default();
        let mut context_by_server = BTreeMap::new();

        for server_id in self.server_ids()? {
            let Some((server_trades, context)) = self.load_server(&server_id)? else {
                continue;
            };
            info!(server = %server_id, rows = server_trades.len(), "Loaded server trades");
            trades.columns = trades.columns.union(server_trades.columns);
            trades.records.extend(server_trades.records);
            context_by_server.insert(server_id, context);
        }

        if trades.is_empty() {
            warn!("No trades loaded from any server");
            return Ok(Dataset {
                trades,
                context_by_server,
            });
        }

        self.apply_token_filter(&mut trades);
        resolve_labels(&mut trades, self.config);

        Ok(Dataset {
            trades,
            context_by_server,
        })
    }

    fn server_ids(&self) -> Result<Vec<String>> {
        if let Some(servers) = &self.config.servers {
            return Ok(servers.clone());
        }
        let root = &self.config.data_root;
        if !root.exists() {
            warn!(root = %root.display(), "Data root missing");
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(root).map_err(|e| MlError::io(root, e))? {
            let entry = entry.map_err(|e| MlError::io(root, e))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Trades and context of one server; `None` when it has no trades
    pub fn load_server(&self, server_id: &str) -> Result<Option<(TradeSet, ContextStreams)>> {
        let server_dir = self.config.data_root.join(server_id);
        if !server_dir.exists() {
            warn!(dir = %server_dir.display(), "Server directory missing");
            return Ok(None);
        }

        let Some(table) = RawTable::read(&server_dir.join(TRADES_TABLE), self.config.row_limit)? else {
            return Ok(None);
        };
        let trades = trades_from_table(&table, server_id, self.config);
        let context = self.load_context(&server_dir)?;
        Ok(Some((trades, context)))
    }

    fn load_context(&self, server_dir: &Path) -> Result<ContextStreams> {
        let limit = self.config.row_limit;
        let balances = RawTable::read(&server_dir.join(BALANCES_TABLE), limit)?.map(|t| balances_from_table(&t));
        let gas = RawTable::read(&server_dir.join(GAS_TABLE), limit)?.map(|t| gas_from_table(&t));
        let contracts = RawTable::read(&server_dir.join(CONTRACTS_TABLE), limit)?.map(|t| contracts_from_table(&t));
        Ok(ContextStreams {
            balances,
            gas,
            contracts,
        })
    }

    fn apply_token_filter(&self, trades: &mut TradeSet) {
        let Some(tokens) = self.config.tokens.as_ref().filter(|t| !t.is_empty()) else {
            return;
        };
        if !trades.columns.token {
            warn!(column = %self.config.token_column, "Token filter specified but token column not found");
            return;
        }
        let wanted: Vec<String> = tokens.iter().map(|t| t.trim().to_lowercase()).collect();
        let before = trades.len();
        trades.records.retain(|r| {
            r.token
                .as_ref()
                .is_some_and(|t| wanted.contains(&t.trim().to_lowercase()))
        });
        info!(before, after = trades.len(), "Applied token filter");
    }
}

/// Map a raw trade table to typed records, deriving the token when absent
pub fn trades_from_table(table: &RawTable, server_id: &str, config: &TrainingConfig) -> TradeSet {
    let n = table.len();
    let mut columns = TradeColumns {
        id: table.has_column("id"),
        pair: table.has_column("pair"),
        cur_id: table.has_column("curId"),
        status: table.has_column("status"),
        reject_reason: table.has_column("rejectReason"),
        diff_time: table.has_column("diff_ts"),
        estimated_qty: table.has_column("estimatedQty"),
        is_hedged: table.has_column("isHedged"),
        is_partial_fill: table.has_column("isPartialFill"),
        has_diff_match: table.has_column("hasDiffMatch"),
        executed_profit: table.has_column("executedProfit"),
        executed_gross_profit: table.has_column("executedGrossProfit"),
        regression_label: table.has_column(&config.regression_target),
        ..TradeColumns::default()
    };

    let pairs = table.text_or_missing("pair");
    let cur_ids = table.text_or_missing("curId");

    let tokens: Vec<Option<String>> = if let Some(tokens) = table.text(&config.token_column) {
        columns.token = true;
        tokens
    } else if columns.pair {
        info!(column = %config.token_column, "Token column not found, derived from 'pair'");
        columns.token = true;
        pairs.iter().map(|p| p.as_deref().and_then(extract_token)).collect()
    } else if columns.cur_id {
        info!(column = %config.token_column, "Token column not found, derived from 'curId'");
        columns.token = true;
        cur_ids.iter().map(|c| c.as_deref().and_then(token_from_cur_id)).collect()
    } else {
        warn!(column = %config.token_column, server = %server_id, "Could not derive token column from 'pair' or 'curId'");
        vec![None; n]
    };

    let props = read_props(table, &mut columns);

    let ids = table.text_or_missing("id");
    let statuses = table.text_or_missing("status");
    let reject_reasons = table.text_or_missing("rejectReason");
    let times = table.timestamps(&config.time_column).unwrap_or_else(|| vec![None; n]);
    let diff_times = table.timestamps("diff_ts").unwrap_or_else(|| vec![None; n]);
    let qty_dst = table.numeric_or_missing("executedQtyDst");
    let dst_price = table.numeric_or_missing("executedDstPrice");
    let qty_src = table.numeric_or_missing("executedQtySrc");
    let src_price = table.numeric_or_missing("executedSrcPrice");
    let buy_diff = table.numeric_or_missing("buyDiffBps");
    let sell_diff = table.numeric_or_missing("sellDiffBps");
    let cex_vol = table.numeric_or_missing("cexVol");
    let dex_volume = table.numeric_or_missing("dexVolume");
    let server_buy = table.numeric_or_missing("serverBuy");
    let server_sell = table.numeric_or_missing("serverSell");
    let net_profit = table.numeric_or_missing("netProfit");
    let executed_profit = table.numeric_or_missing("executedProfit");
    let gross_profit = table.numeric_or_missing("executedGrossProfit");
    let estimated_qty = table.numeric_or_missing("estimatedQty");
    let hedged = table.numeric_or_missing("isHedged");
    let partial = table.numeric_or_missing("isPartialFill");
    let diff_match = table.numeric_or_missing("hasDiffMatch");
    let regression = table.numeric_or_missing(&config.regression_target);

    let records = (0..n)
        .map(|i| TradeRecord {
            server_id: server_id.to_string(),
            id: ids[i].clone(),
            token: tokens[i].clone(),
            pair: pairs[i].clone(),
            cur_id: cur_ids[i].clone(),
            status: statuses[i].clone(),
            reject_reason: reject_reasons[i].clone(),
            time: times[i],
            diff_time: diff_times[i],
            executed_qty_dst: qty_dst[i],
            executed_dst_price: dst_price[i],
            executed_qty_src: qty_src[i],
            executed_src_price: src_price[i],
            buy_diff_bps: buy_diff[i],
            sell_diff_bps: sell_diff[i],
            cex_vol: cex_vol[i],
            dex_volume: dex_volume[i],
            server_buy: server_buy[i],
            server_sell: server_sell[i],
            net_profit: net_profit[i],
            executed_profit: executed_profit[i],
            executed_gross_profit: gross_profit[i],
            estimated_qty: estimated_qty[i],
            is_hedged: hedged[i],
            is_partial_fill: partial[i],
            has_diff_match: diff_match[i],
            props: props[i].clone(),
            regression_label: regression[i],
            class_label: None,
        })
        .collect();

    TradeSet { records, columns }
}

/// Flattened `prop*` columns win over the raw JSON `props` blob
fn read_props(table: &RawTable, columns: &mut TradeColumns) -> Vec<TradeProps> {
    let n = table.len();
    let flattened = ["propDiff", "propDexSlip", "propCexSlip", "propExecutionEta", "propExecutionMode"];

    if flattened.iter().any(|c| table.has_column(c)) {
        columns.props = true;
        columns.execution_mode = table.has_column("propExecutionMode");
        let diff = table.numeric_or_missing("propDiff");
        let dex_slip = table.numeric_or_missing("propDexSlip");
        let cex_slip = table.numeric_or_missing("propCexSlip");
        let eta = table.numeric_or_missing("propExecutionEta");
        let mode = table.text_or_missing("propExecutionMode");
        return (0..n)
            .map(|i| TradeProps {
                diff: diff[i],
                dex_slip: dex_slip[i],
                cex_slip: cex_slip[i],
                execution_eta: eta[i],
                execution_mode: mode[i].clone(),
            })
            .collect();
    }

    match table.text("props") {
        Some(blobs) => {
            columns.props = true;
            let parsed: Vec<TradeProps> = blobs
                .iter()
                .map(|b| b.as_deref().map(TradeProps::from_json).unwrap_or_default())
                .collect();
            columns.execution_mode = parsed.iter().any(|p| p.execution_mode.is_some());
            parsed
        }
        None => vec![TradeProps::default(); n],
    }
}

/// Resolve the regression label (with profit fallbacks) and derive the class label
pub fn resolve_labels(trades: &mut TradeSet, config: &TrainingConfig) {
    let has_target_values = trades.columns.regression_label
        && trades.records.iter().any(|r| r.regression_label.is_some());

    if !has_target_values {
        // absent columns were read as all-missing, so "has a value" implies "present"
        let fallback = LABEL_FALLBACK_COLUMNS
            .iter()
            .copied()
            .find(|name| trades.records.iter().any(|r| profit_value(r, name).is_some()));

        match fallback {
            Some(name) => {
                info!(column = name, "Regression target empty, using fallback column");
                for record in &mut trades.records {
                    record.regression_label = profit_value(record, name);
                }
            }
            None => {
                warn!(target = %config.regression_target, "No label source has any values; labels are missing");
                for record in &mut trades.records {
                    record.regression_label = None;
                }
            }
        }
    }
    trades.columns.regression_label = true;

    if config.task == Task::Classification {
        let threshold = config.classification_threshold;
        for record in &mut trades.records {
            record.class_label = record
                .regression_label
                .map(|v| if v > threshold { 1.0 } else { 0.0 });
        }
        trades.columns.class_label = true;
    }
}

fn profit_value(record: &TradeRecord, column: &str) -> Option<f64> {
    match column {
        "netProfit" => record.net_profit,
        "executedProfit" => record.executed_profit,
        "executedGrossProfit" => record.executed_gross_profit,
        _ => None,
    }
}

pub fn balances_from_table(table: &RawTable) -> Vec<BalanceSnapshot> {
    let n = table.len();
    let times = table
        .first_column(&["balance_ts", "timestamp"])
        .and_then(|c| table.timestamps(c))
        .unwrap_or_else(|| vec![None; n]);
    let total = table.numeric_or_missing("total_usdt");
    let dex = table.numeric_or_missing("total_dex_usdt");
    let cex = table.numeric_or_missing("total_cex_usdt");
    (0..n)
        .map(|i| BalanceSnapshot {
            time: times[i],
            total_usdt: total[i],
            total_dex_usdt: dex[i],
            total_cex_usdt: cex[i],
        })
        .collect()
}

pub fn gas_from_table(table: &RawTable) -> Vec<GasSnapshot> {
    let n = table.len();
    let times = table
        .first_column(&["gas_ts", "timestamp"])
        .and_then(|c| table.timestamps(c))
        .unwrap_or_else(|| vec![None; n]);
    let gas = table.numeric_or_missing("gas");
    // absent flag column means "never low"
    let is_low = table.numeric("is_low").unwrap_or_else(|| vec![Some(0.0); n]);
    (0..n)
        .map(|i| GasSnapshot {
            time: times[i],
            gas: gas[i],
            is_low: is_low[i],
        })
        .collect()
}

pub fn contracts_from_table(table: &RawTable) -> Vec<ContractEvent> {
    let n = table.len();
    let times = table
        .first_column(&["tx_ts", "timestamp"])
        .and_then(|c| table.timestamps(c))
        .unwrap_or_else(|| vec![None; n]);
    let errors: Vec<Option<f64>> = match table.numeric("isError") {
        Some(values) => values.into_iter().map(|v| Some(v.unwrap_or(0.0))).collect(),
        None => vec![Some(0.0); n],
    };
    (0..n)
        .map(|i| ContractEvent {
            time: times[i],
            is_error: errors[i],
        })
        .collect()
}
