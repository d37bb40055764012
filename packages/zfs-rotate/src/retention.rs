// Retention policy and the keep/prune decision
use crate::naming::SnapshotName;
use crate::period::Period;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid retention policy: keep-count for {period} is {count}, must be zero or greater")]
    NegativeKeepCount { period: Period, count: i64 },
}

/// How many snapshots of each period to keep
///
/// Counts are validated once, when the policy is built, so a policy value is
/// always usable by [`decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    keep: BTreeMap<Period, usize>,
}

impl RetentionPolicy {
    /// Build a policy from signed counts, starting from the per-period defaults
    pub fn from_counts<I>(counts: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (Period, i64)>,
    {
        let mut keep = BTreeMap::new();
        for period in Period::ALL {
            keep.insert(period, period.default_keep() as usize);
        }

        for (period, count) in counts {
            let count = usize::try_from(count)
                .map_err(|_| PolicyError::NegativeKeepCount { period, count })?;
            keep.insert(period, count);
        }

        Ok(Self { keep })
    }

    pub fn keep_count(&self, period: Period) -> usize {
        self.keep.get(&period).copied().unwrap_or(0)
    }

    /// Run the retention decision for one period
    pub fn decide(&self, period: Period, snapshots: Vec<Snapshot>) -> RetentionDecision {
        decide(snapshots, self.keep_count(period))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        let keep = Period::ALL
            .into_iter()
            .map(|period| (period, period.default_keep() as usize))
            .collect();
        Self { keep }
    }
}

/// A snapshot of one dataset that decoded under this tool's naming
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snapshot {
    pub dataset: String,
    pub name: SnapshotName,
    /// Name as reported by the backend, without the `dataset@` part
    pub encoded: String,
}

/// Partition of a snapshot set into what survives and what gets destroyed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Newest first
    pub keep: Vec<Snapshot>,
    /// Newest first
    pub prune: Vec<Snapshot>,
}

/// Decide which snapshots survive.
///
/// The `keep_count` newest snapshots are kept and the rest are pruned. Ties
/// on the creation instant are broken by the encoded name, both descending,
/// so the result never depends on input order.
pub fn decide(mut snapshots: Vec<Snapshot>, keep_count: usize) -> RetentionDecision {
    snapshots.sort_by(|a, b| {
        b.name
            .instant()
            .cmp(&a.name.instant())
            .then_with(|| b.encoded.cmp(&a.encoded))
    });

    let prune = snapshots.split_off(keep_count.min(snapshots.len()));

    RetentionDecision {
        keep: snapshots,
        prune,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingCodec;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn hourly(hours_after_base: i64, suffix: Option<&str>) -> Snapshot {
        let codec = NamingCodec::new("auto").unwrap();
        let name = SnapshotName::new(
            Period::Hourly,
            base() + Duration::hours(hours_after_base),
            suffix.map(str::to_string),
        )
        .unwrap();
        Snapshot {
            dataset: "tank/data".to_string(),
            encoded: codec.encode(&name),
            name,
        }
    }

    fn encoded(snapshots: &[Snapshot]) -> Vec<&str> {
        snapshots.iter().map(|s| s.encoded.as_str()).collect()
    }

    #[test]
    fn test_keeps_newest() {
        let input = (0..5).map(|h| hourly(h, None)).collect();
        let decision = decide(input, 3);

        assert_eq!(
            encoded(&decision.keep),
            vec![
                "auto-2024.03.01.04H",
                "auto-2024.03.01.03H",
                "auto-2024.03.01.02H"
            ]
        );
        assert_eq!(
            encoded(&decision.prune),
            vec!["auto-2024.03.01.01H", "auto-2024.03.01.00H"]
        );
    }

    #[test]
    fn test_fewer_than_keep_count() {
        let input = vec![hourly(1, None), hourly(0, None)];
        let decision = decide(input.clone(), 24);

        assert_eq!(decision.keep, input);
        assert!(decision.prune.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(decide(Vec::new(), 3), RetentionDecision::default());
        assert_eq!(decide(Vec::new(), 0), RetentionDecision::default());
    }

    #[test]
    fn test_keep_count_zero_prunes_everything() {
        let input: Vec<_> = (0..4).map(|h| hourly(h, None)).collect();
        let decision = decide(input, 0);

        assert!(decision.keep.is_empty());
        assert_eq!(decision.prune.len(), 4);
    }

    #[test]
    fn test_ties_broken_by_encoded_name() {
        let input = vec![
            hourly(0, Some("a")),
            hourly(0, None),
            hourly(0, Some("b")),
        ];
        let decision = decide(input, 2);

        assert_eq!(
            encoded(&decision.keep),
            vec!["auto-2024.03.01.00H-b", "auto-2024.03.01.00H-a"]
        );
        assert_eq!(encoded(&decision.prune), vec!["auto-2024.03.01.00H"]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward: Vec<_> = (0..6).map(|h| hourly(h, None)).collect();
        let mut backward = forward.clone();
        backward.reverse();

        assert_eq!(decide(forward, 2), decide(backward, 2));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.keep_count(Period::Hourly), 24);
        assert_eq!(policy.keep_count(Period::Daily), 28);
        assert_eq!(policy.keep_count(Period::Monthly), 12);
        assert_eq!(policy.keep_count(Period::Yearly), 2);
        assert_eq!(RetentionPolicy::from_counts([]).unwrap(), policy);
    }

    #[test]
    fn test_policy_overrides() {
        let policy = RetentionPolicy::from_counts([(Period::Daily, 7), (Period::Yearly, 0)]).unwrap();
        assert_eq!(policy.keep_count(Period::Hourly), 24);
        assert_eq!(policy.keep_count(Period::Daily), 7);
        assert_eq!(policy.keep_count(Period::Yearly), 0);
    }

    #[test]
    fn test_negative_keep_count_is_rejected() {
        let err = RetentionPolicy::from_counts([(Period::Monthly, -1)]).unwrap_err();
        assert_eq!(
            err,
            PolicyError::NegativeKeepCount {
                period: Period::Monthly,
                count: -1
            }
        );
    }

    #[test]
    fn test_policy_decide_uses_period_count() {
        let policy = RetentionPolicy::from_counts([(Period::Hourly, 1)]).unwrap();
        let input = (0..3).map(|h| hourly(h, None)).collect();
        let decision = policy.decide(Period::Hourly, input);

        assert_eq!(encoded(&decision.keep), vec!["auto-2024.03.01.02H"]);
        assert_eq!(decision.prune.len(), 2);
    }

    fn arb_snapshots() -> impl Strategy<Value = Vec<Snapshot>> {
        proptest::collection::vec((0i64..200, proptest::option::of("[a-c]{1,2}")), 0..40).prop_map(
            |entries| {
                // The backend never reports the same name twice.
                let mut seen = HashSet::new();
                entries
                    .into_iter()
                    .map(|(h, suffix)| hourly(h, suffix.as_deref()))
                    .filter(|s| seen.insert(s.encoded.clone()))
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_partitions_input(snapshots in arb_snapshots(), k in 0usize..50) {
            let decision = decide(snapshots.clone(), k);

            prop_assert_eq!(decision.keep.len(), snapshots.len().min(k));
            prop_assert_eq!(decision.keep.len() + decision.prune.len(), snapshots.len());

            let keep: HashSet<_> = decision.keep.iter().map(|s| &s.encoded).collect();
            let prune: HashSet<_> = decision.prune.iter().map(|s| &s.encoded).collect();
            let input: HashSet<_> = snapshots.iter().map(|s| &s.encoded).collect();
            prop_assert!(keep.is_disjoint(&prune));
            prop_assert_eq!(keep.union(&prune).cloned().collect::<HashSet<_>>(), input);
        }

        #[test]
        fn prop_never_keeps_older_than_pruned(snapshots in arb_snapshots(), k in 0usize..50) {
            let decision = decide(snapshots, k);
            let oldest_kept = decision.keep.iter().map(|s| s.name.instant()).min();
            let newest_pruned = decision.prune.iter().map(|s| s.name.instant()).max();

            if let (Some(kept), Some(pruned)) = (oldest_kept, newest_pruned) {
                prop_assert!(kept >= pruned);
            }
        }

        #[test]
        fn prop_idempotent_on_keep_set(snapshots in arb_snapshots(), k in 0usize..50) {
            let first = decide(snapshots, k);
            let second = decide(first.keep.clone(), k);

            prop_assert_eq!(&second.keep, &first.keep);
            prop_assert!(second.prune.is_empty());
        }

        #[test]
        fn prop_monotone_in_keep_count(snapshots in arb_snapshots(), k in 0usize..50) {
            let smaller = decide(snapshots.clone(), k);
            let larger = decide(snapshots, k + 1);

            for kept in &smaller.keep {
                prop_assert!(larger.keep.contains(kept));
            }
        }
    }
}
