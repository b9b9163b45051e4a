//! Tests for the feature builder

use super::*;
use crate::config::{Task, TrainingConfig};
use crate::data::loader::resolve_labels;
use crate::data::{BalanceSnapshot, ContextStreams, ContractEvent, GasSnapshot, TradeColumns, TradeRecord, TradeSet};
use chrono::{Duration, TimeZone};
use std::collections::BTreeMap;

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn trade(server: &str, token: &str, minutes: i64, profit: f64) -> TradeRecord {
    TradeRecord {
        server_id: server.to_string(),
        token: Some(token.to_string()),
        time: Some(at(minutes)),
        net_profit: Some(profit),
        buy_diff_bps: Some(profit * 10.0),
        sell_diff_bps: Some(profit),
        cex_vol: Some(100.0 + minutes as f64),
        dex_volume: Some(50.0),
        ..Default::default()
    }
}

fn trade_set(records: Vec<TradeRecord>, config: &TrainingConfig) -> TradeSet {
    let mut set = TradeSet {
        records,
        columns: TradeColumns {
            token: true,
            ..Default::default()
        },
    };
    resolve_labels(&mut set, config);
    set
}

fn small_config() -> TrainingConfig {
    TrainingConfig {
        feature_windows_minutes: vec![5],
        feature_windows_hours: vec![1],
        ..Default::default()
    }
}

fn value(set: &FeatureSet, column: &str, row: usize) -> Option<f64> {
    set.features.numeric(column).unwrap()[row]
}

#[test]
fn test_two_trade_scenario() {
    let config = small_config();
    let trades = trade_set(vec![trade("s1", "eth", 0, 5.0), trade("s1", "eth", 10, -3.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();

    assert_eq!(set.target, vec![1.0, 0.0]);
    // t=0 lies outside the trailing 5 minute window of t=10
    assert_eq!(value(&set, "buyDiffBps_mean_5m", 1), Some(-30.0));
    assert_eq!(value(&set, "netProfit_mean_1h", 1), Some(1.0));
    assert_eq!(set.meta.timestamps, vec![at(0), at(10)]);
}

#[test]
fn test_window_containing_both_trades() {
    let config = TrainingConfig {
        feature_windows_minutes: vec![15],
        ..small_config()
    };
    let trades = trade_set(vec![trade("s1", "eth", 0, 5.0), trade("s1", "eth", 10, -3.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(value(&set, "sellDiffBps_mean_15m", 1), Some(1.0));
    assert_eq!(value(&set, "sellDiffBps_max_15m", 1), Some(5.0));
    assert_eq!(value(&set, "sellDiffBps_min_15m", 1), Some(-3.0));
}

#[test]
fn test_rolling_never_sees_future_rows() {
    let config = TrainingConfig {
        feature_windows_minutes: vec![30],
        ..small_config()
    };
    let base = vec![
        trade("s1", "eth", 0, 1.0),
        trade("s1", "eth", 5, 2.0),
        trade("s1", "eth", 12, -1.0),
        trade("s1", "eth", 20, 4.0),
    ];
    let mut extended = base.clone();
    extended.push(trade("s1", "eth", 25, 100.0));
    extended.push(trade("s1", "eth", 25, -100.0));

    let builder = FeatureBuilder::new(&config);
    let before = builder.build(&trade_set(base, &config), &BTreeMap::new()).unwrap();
    let after = builder.build(&trade_set(extended, &config), &BTreeMap::new()).unwrap();

    for column in before.features.names() {
        let (Some(old), Some(new)) = (before.features.column(&column), after.features.column(&column)) else {
            continue;
        };
        match (old, new) {
            (ColumnData::Numeric(old), ColumnData::Numeric(new)) => {
                assert_eq!(&new[..old.len()], &old[..], "column {}", column);
            }
            (ColumnData::Categorical(old), ColumnData::Categorical(new)) => {
                assert_eq!(&new[..old.len()], &old[..], "column {}", column);
            }
            _ => panic!("column {} changed kind", column),
        }
    }
}

#[test]
fn test_groups_are_independent() {
    let config = TrainingConfig {
        feature_windows_minutes: vec![60],
        ..small_config()
    };
    let trades = trade_set(
        vec![
            trade("s1", "eth", 0, 1.0),
            trade("s1", "bnb", 1, 9.0),
            trade("s2", "eth", 2, 5.0),
            trade("s1", "eth", 3, 3.0),
        ],
        &config,
    );
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(value(&set, "sellDiffBps_mean_60m", 3), Some(2.0));
    assert_eq!(value(&set, "sellDiffBps_mean_60m", 1), Some(9.0));
    assert_eq!(value(&set, "sellDiffBps_mean_60m", 2), Some(5.0));
}

#[test]
fn test_rows_ordered_and_untimed_rows_dropped() {
    let config = small_config();
    let mut untimed = trade("s1", "eth", 0, 1.0);
    untimed.time = None;
    let records = vec![trade("s1", "eth", 20, 1.0), untimed, trade("s1", "eth", 10, -1.0)];
    let trades = trade_set(records, &config);
    let snapshot = trades.records.clone();

    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(set.meta.timestamps, vec![at(10), at(20)]);
    assert_eq!(set.target, vec![0.0, 1.0]);
    // inputs are left as they were
    assert_eq!(trades.records.len(), snapshot.len());
    assert_eq!(trades.records[1].time, None);
}

#[test]
fn test_unlabeled_rows_dropped() {
    let config = small_config();
    let mut unlabeled = trade("s1", "eth", 5, 1.0);
    unlabeled.net_profit = None;
    let trades = trade_set(vec![trade("s1", "eth", 0, 1.0), unlabeled], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.features.len(), 1);
}

#[test]
fn test_missing_target_is_fatal() {
    let config = small_config();
    let trades = TradeSet {
        records: vec![trade("s1", "eth", 0, 1.0)],
        columns: TradeColumns::default(),
    };
    let result = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new());
    assert!(matches!(result, Err(MlError::MissingTarget(name)) if name == "label_class"));
}

#[test]
fn test_labels_and_identifiers_excluded() {
    let config = small_config();
    let trades = trade_set(vec![trade("s1", "eth", 0, 1.0), trade("s1", "eth", 1, 2.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    let names = &set.meta.feature_columns;

    assert!(!names.contains(&"label_class".to_string()));
    assert!(!names.contains(&"label_regression".to_string()));
    assert!(!names.contains(&"trade_ts".to_string()));
    assert_eq!(set.meta.categorical_columns, vec!["serverId".to_string(), "token".to_string()]);
    assert!(set.meta.numeric_columns.contains(&"liquidityImbalance".to_string()));
    assert_eq!(
        set.meta.numeric_columns.len() + set.meta.categorical_columns.len(),
        names.len()
    );
}

#[test]
fn test_all_missing_columns_dropped() {
    let config = small_config();
    let trades = trade_set(vec![trade("s1", "eth", 0, 1.0), trade("s1", "eth", 1, 2.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    let names = &set.meta.feature_columns;

    // no quantities were exported
    assert!(!names.contains(&"executedQtyDst".to_string()));
    assert!(names.contains(&"grossNotionalDst".to_string()));
    assert!(!set.features.contains("executedQtyDst"));
}

#[test]
fn test_zero_std_imbalance_z_score_is_missing() {
    let config = small_config();
    let mut first = trade("s1", "eth", 0, 1.0);
    let mut second = trade("s1", "eth", 1, 2.0);
    first.cex_vol = Some(10.0);
    second.cex_vol = Some(10.0);
    let third = TradeRecord {
        cex_vol: Some(30.0),
        ..trade("s1", "eth", 2, 3.0)
    };
    let trades = trade_set(vec![first, second, third], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();

    assert_eq!(value(&set, "liquidityImbalance_std_5m", 1), Some(0.0));
    assert_eq!(value(&set, "liquidityImbalance_z_5m", 1), None);
    assert!(value(&set, "liquidityImbalance_z_5m", 2).unwrap().is_finite());
}

#[test]
fn test_context_joined_backward() {
    let config = small_config();
    let trades = trade_set(
        vec![
            trade("s1", "eth", 0, 1.0),
            trade("s1", "eth", 30, 2.0),
            trade("s2", "eth", 30, 2.0),
        ],
        &config,
    );
    let mut context = BTreeMap::new();
    context.insert(
        "s1".to_string(),
        ContextStreams {
            balances: Some(vec![
                BalanceSnapshot { time: Some(at(10)), total_usdt: Some(100.0), ..Default::default() },
                BalanceSnapshot { time: Some(at(31)), total_usdt: Some(500.0), ..Default::default() },
            ]),
            gas: Some(vec![GasSnapshot { time: Some(at(-5)), gas: Some(0.2), is_low: Some(1.0) }]),
            contracts: Some(vec![ContractEvent { time: Some(at(20)), is_error: Some(1.0) }]),
        },
    );
    context.insert("s2".to_string(), ContextStreams::default());

    let set = FeatureBuilder::new(&config).build(&trades, &context).unwrap();

    // rows are chronological: s1@0, s1@30, s2@30
    assert_eq!(value(&set, "total_usdt", 0), None);
    assert_eq!(value(&set, "total_usdt", 1), Some(100.0));
    assert_eq!(value(&set, "gasBalance", 0), Some(0.2));
    assert_eq!(value(&set, "isLowGas", 1), Some(1.0));
    assert_eq!(value(&set, "errorCount1h", 1), Some(1.0));
    assert_eq!(value(&set, "balanceDelta_1h", 1), Some(0.0));
    assert_eq!(value(&set, "gasBalance", 2), None);
    assert_eq!(value(&set, "total_usdt", 2), None);
}

#[test]
fn test_regression_task_targets_profit() {
    let config = TrainingConfig {
        task: Task::Regression,
        ..small_config()
    };
    let trades = trade_set(vec![trade("s1", "eth", 0, 5.0), trade("s1", "eth", 10, -3.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(set.target, vec![5.0, -3.0]);
    assert_eq!(set.meta.target, "label_regression");
}

#[test]
fn test_deterministic() {
    let config = small_config();
    let trades = trade_set(
        vec![trade("s1", "eth", 0, 5.0), trade("s1", "bnb", 3, -1.0), trade("s2", "eth", 4, 2.0)],
        &config,
    );
    let builder = FeatureBuilder::new(&config);
    let a = builder.build(&trades, &BTreeMap::new()).unwrap();
    let b = builder.build(&trades, &BTreeMap::new()).unwrap();
    assert_eq!(a.features, b.features);
    assert_eq!(a.meta, b.meta);
}

#[test]
fn test_empty_trades() {
    let config = small_config();
    let set = FeatureBuilder::new(&config)
        .build(&TradeSet::default(), &BTreeMap::new())
        .unwrap();
    assert!(set.is_empty());
    assert_eq!(set.meta.target, "label_class");
}

#[test]
fn test_select_rows_keeps_alignment() {
    let config = small_config();
    let trades = trade_set(vec![trade("s1", "eth", 0, 5.0), trade("s1", "eth", 10, -3.0)], &config);
    let set = FeatureBuilder::new(&config).build(&trades, &BTreeMap::new()).unwrap();
    let tail = set.select_rows(&[1]);
    assert_eq!(tail.target, vec![0.0]);
    assert_eq!(tail.meta.timestamps, vec![at(10)]);
    assert_eq!(tail.features.numeric("netProfit").unwrap(), &[Some(-3.0)]);
}
