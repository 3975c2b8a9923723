// Robust aggregation: median for filtering, mean of the survivors for output.
// Pure functions; the engine owns all state.

use crate::consensus::round::Submission;
use crate::types::{within_bps, Balance, IndexValue};

/// Lower-middle element of the sorted values. None on empty input.
pub fn lower_median(values: &[IndexValue]) -> Option<IndexValue> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[(sorted.len() - 1) / 2])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<'a> {
    pub median: IndexValue,
    pub valid: Vec<&'a Submission>,
    pub outliers: Vec<&'a Submission>,
}

/// Split submissions into those within `max_deviation_bps` of the median and the rest.
/// Ledger order is kept inside each side.
pub fn partition(submissions: &[Submission], max_deviation_bps: u64) -> Option<Partition<'_>> {
    let values: Vec<IndexValue> = submissions.iter().map(|s| s.value).collect();
    let median = lower_median(&values)?;
    let (valid, outliers): (Vec<&Submission>, Vec<&Submission>) =
        submissions.iter().partition(|s| {
            within_bps(
                u128::from(s.value),
                u128::from(median),
                u128::from(median),
                max_deviation_bps,
            )
        });
    Some(Partition {
        median,
        valid,
        outliers,
    })
}

/// Floor of the arithmetic mean.
pub fn mean(values: &[IndexValue]) -> Option<IndexValue> {
    if values.is_empty() {
        return None;
    }
    let sum: u128 = values.iter().map(|v| u128::from(*v)).sum();
    // The mean of u64 values always fits a u64.
    IndexValue::try_from(sum / values.len() as u128).ok()
}

/// Floor of the weight-averaged value. Falls back to the plain mean when all weights are zero.
pub fn weighted_mean(pairs: &[(IndexValue, u32)]) -> Option<IndexValue> {
    if pairs.is_empty() {
        return None;
    }
    let total_weight: u128 = pairs.iter().map(|(_, w)| u128::from(*w)).sum();
    if total_weight == 0 {
        let values: Vec<IndexValue> = pairs.iter().map(|(v, _)| *v).collect();
        return mean(&values);
    }
    let weighted: u128 = pairs
        .iter()
        .map(|(v, w)| u128::from(*v) * u128::from(*w))
        .sum();
    IndexValue::try_from(weighted / total_weight).ok()
}

/// Relative change from `previous` to `next` is at most `bps`.
pub fn change_within(previous: IndexValue, next: IndexValue, bps: u64) -> bool {
    within_bps(
        u128::from(next),
        u128::from(previous),
        u128::from(previous),
        bps,
    )
}

/// Supply change implied by an index move: `total * (next - previous) / previous`,
/// truncated toward zero. None on overflow or a zero baseline.
pub fn supply_delta(total: Balance, previous: IndexValue, next: IndexValue) -> Option<i128> {
    if previous == 0 {
        return None;
    }
    let total = i128::try_from(total).ok()?;
    let diff = i128::from(next) - i128::from(previous);
    total.checked_mul(diff)?.checked_div(i128::from(previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;

    fn subs(values: &[IndexValue]) -> Vec<Submission> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Submission {
                submitter: AccountId::from_label(&format!("s{}", i)),
                value: *v,
                timestamp: i as u64,
            })
            .collect()
    }

    #[test]
    fn even_count_takes_lower_middle() {
        assert_eq!(lower_median(&[4, 1, 3, 2]), Some(2));
        assert_eq!(lower_median(&[7]), Some(7));
        assert_eq!(lower_median(&[]), None);
    }

    #[test]
    fn outlier_is_filtered_and_survivors_averaged() {
        let s = subs(&[100, 150, 101]);
        let p = partition(&s, 500).unwrap();
        assert_eq!(p.median, 101);
        assert_eq!(p.outliers.len(), 1);
        assert_eq!(p.outliers[0].value, 150);
        let valid: Vec<IndexValue> = p.valid.iter().map(|s| s.value).collect();
        assert_eq!(valid, vec![100, 101]);
        assert_eq!(mean(&valid), Some(100));
    }

    #[test]
    fn weighted_mean_leans_towards_heavier_weight() {
        assert_eq!(weighted_mean(&[(100, 100), (110, 50)]), Some(103));
        assert_eq!(weighted_mean(&[(100, 0), (110, 0)]), Some(105));
    }

    #[test]
    fn delta_tracks_relative_index_move() {
        assert_eq!(supply_delta(1_000_000, 100, 104), Some(40_000));
        assert_eq!(supply_delta(1_000_000, 100, 97), Some(-30_000));
        // 1_000_000 * 1 / 3 truncated.
        assert_eq!(supply_delta(1_000_000, 3, 4), Some(333_333));
        assert_eq!(supply_delta(1_000_000, 0, 4), None);
    }

    #[test]
    fn change_band_is_symmetric_around_previous() {
        assert!(change_within(100, 105, 500));
        assert!(change_within(100, 95, 500));
        assert!(!change_within(100, 106, 500));
    }
}
