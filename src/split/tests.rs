//! Tests for temporal splits

use super::*;
use chrono::TimeZone;

fn minutes(values: &[i64]) -> Vec<DateTime<Utc>> {
    let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    values.iter().map(|m| origin + Duration::minutes(*m)).collect()
}

fn max_of(ts: &[DateTime<Utc>], rows: &[usize]) -> DateTime<Utc> {
    rows.iter().map(|&r| ts[r]).max().unwrap()
}

fn min_of(ts: &[DateTime<Utc>], rows: &[usize]) -> DateTime<Utc> {
    rows.iter().map(|&r| ts[r]).min().unwrap()
}

#[test]
fn test_fold_boundaries() {
    // 7 distinct instants, 2 folds: boundaries 0, 2, 4, 6
    let ts = minutes(&[0, 10, 20, 30, 40, 50, 60]);
    let folds = time_splits(&ts, 2, Duration::zero());

    assert_eq!(folds.len(), 2);
    assert_eq!(folds[0].train, vec![0, 1]);
    assert_eq!(folds[0].validation, vec![2, 3, 4]);
    assert_eq!(folds[1].train, vec![0, 1, 2, 3]);
    assert_eq!(folds[1].validation, vec![4, 5, 6]);
}

#[test]
fn test_gap_purges_training_rows() {
    let ts = minutes(&[0, 10, 20, 30, 40, 50, 60]);
    let folds = time_splits(&ts, 2, Duration::minutes(15));
    assert_eq!(folds[0].train, vec![0]);
    assert_eq!(folds[1].train, vec![0, 1, 2]);
}

#[test]
fn test_gap_invariant_holds() {
    let ts = minutes(&[0, 0, 3, 7, 7, 9, 15, 22, 22, 23, 40, 41, 55, 58, 58, 70, 71, 90]);
    let gap = Duration::minutes(5);
    for folds in 1..6 {
        let splits = time_splits(&ts, folds, gap);
        let mut previous_start = None;
        for fold in &splits {
            assert!(max_of(&ts, &fold.train) + gap <= min_of(&ts, &fold.validation));
            let start = min_of(&ts, &fold.validation);
            if let Some(prev) = previous_start {
                assert!(start > prev);
            }
            previous_start = Some(start);
        }
    }
}

#[test]
fn test_rows_with_duplicate_instants_share_a_side() {
    let ts = minutes(&[0, 10, 10, 20, 30, 30, 40]);
    for fold in time_splits(&ts, 2, Duration::zero()) {
        let train_has = fold.train.contains(&1);
        assert_eq!(train_has, fold.train.contains(&2));
        assert_eq!(fold.validation.contains(&4), fold.validation.contains(&5));
    }
}

#[test]
fn test_too_few_timestamps_yield_no_folds() {
    let ts = minutes(&[0, 10, 20]);
    assert!(time_splits(&ts, 2, Duration::zero()).is_empty());
    assert!(time_splits(&minutes(&[0, 0, 0, 0, 0]), 1, Duration::zero()).is_empty());
    assert!(time_splits(&[], 3, Duration::zero()).is_empty());
}

#[test]
fn test_fold_with_empty_train_is_skipped() {
    // the gap swallows everything before the first validation window
    let ts = minutes(&[0, 10, 20, 30, 40, 50, 60]);
    let folds = time_splits(&ts, 2, Duration::minutes(25));
    assert_eq!(folds.len(), 1);
    assert_eq!(folds[0].validation, vec![4, 5, 6]);
    assert_eq!(folds[0].train, vec![0, 1]);
}

#[test]
fn test_holdout_trailing_window() {
    let ts = minutes(&[0, 1440, 2880, 4320]);
    let split = holdout_split(&ts, Duration::days(1));
    assert!(split.is_enabled());
    assert_eq!(split.train, vec![0, 1]);
    assert_eq!(split.holdout, vec![2, 3]);
}

#[test]
fn test_holdout_disabled_when_it_covers_everything() {
    let ts = minutes(&[0, 60, 120]);
    let first = holdout_split(&ts, Duration::days(14));
    let second = holdout_split(&ts, Duration::days(14));

    assert!(!first.is_enabled());
    assert_eq!(first.train, vec![0, 1, 2]);
    assert_eq!(first, second);
}

#[test]
fn test_holdout_disabled_for_degenerate_inputs() {
    assert!(!holdout_split(&[], Duration::days(1)).is_enabled());
    let ts = minutes(&[0, 60]);
    let split = holdout_split(&ts, Duration::zero());
    assert!(!split.is_enabled());
    assert_eq!(split.train, vec![0, 1]);
}
