//! Per-trade derived columns

use crate::data::TradeRecord;

/// Diff columns aggregated over minute windows
pub const ROLLING_NUMERIC_COLUMNS: [&str; 6] = [
    "buyDiffBps",
    "sellDiffBps",
    "cexVol",
    "dexVolume",
    "serverBuy",
    "serverSell",
];

/// Columns aggregated over hour windows
pub const HOURLY_COLUMNS: [&str; 3] = ["spreadMid", "tradePnLRatio", "netProfit"];

/// `numerator / (denominator + eps)`, missing when either side is missing
pub fn safe_ratio(numerator: Option<f64>, denominator: Option<f64>, eps: f64) -> Option<f64> {
    Some(numerator? / (denominator? + eps))
}

/// Derived values of a single trade
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaseValues {
    pub gross_notional_dst: f64,
    pub gross_notional_src: f64,
    pub trade_pnl_ratio: Option<f64>,
    pub spread_mid: Option<f64>,
    pub liquidity_imbalance: Option<f64>,
    pub has_reject_reason: f64,
}

impl BaseValues {
    /// A trade from an export without `rejectReason` reads as never rejected
    pub fn compute(record: &TradeRecord, eps: f64) -> Self {
        let gross_notional_dst =
            record.executed_qty_dst.unwrap_or(0.0) * record.executed_dst_price.unwrap_or(0.0);
        let gross_notional_src =
            record.executed_qty_src.unwrap_or(0.0) * record.executed_src_price.unwrap_or(0.0);
        let spread_mid = match (record.buy_diff_bps, record.sell_diff_bps) {
            (Some(buy), Some(sell)) => Some((buy + sell) / 2.0),
            _ => None,
        };
        let has_reject_reason = if record.reject_reason.is_some() { 1.0 } else { 0.0 };

        Self {
            gross_notional_dst,
            gross_notional_src,
            trade_pnl_ratio: safe_ratio(record.net_profit, Some(gross_notional_dst), eps),
            spread_mid,
            liquidity_imbalance: safe_ratio(record.cex_vol, record.dex_volume, eps),
            has_reject_reason,
        }
    }
}

/// Raw value of a rolling input column
pub fn rolling_input(record: &TradeRecord, base: &BaseValues, column: &str) -> Option<f64> {
    match column {
        "buyDiffBps" => record.buy_diff_bps,
        "sellDiffBps" => record.sell_diff_bps,
        "cexVol" => record.cex_vol,
        "dexVolume" => record.dex_volume,
        "serverBuy" => record.server_buy,
        "serverSell" => record.server_sell,
        "netProfit" => record.net_profit,
        "spreadMid" => base.spread_mid,
        "tradePnLRatio" => base.trade_pnl_ratio,
        "liquidityImbalance" => base.liquidity_imbalance,
        "hasRejectReason" => Some(base.has_reject_reason),
        _ => None,
    }
}
