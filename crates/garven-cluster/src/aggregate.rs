//! Aggregation over scatter/gather outcomes.
//!
//! Every statistic carries a `partial_response` flag computed by one rule:
//!
//! ```text
//! partial = (any outcome is not a usable Success) OR (usable successes != expected)
//! ```
//!
//! A `Success` whose value does not have the shape the statistic needs counts
//! as a failed peer. The expected count comes from process configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gather::{Outcome, Outcomes};

// ─────────────────────────────────────────────
// Partial rule
// ─────────────────────────────────────────────

/// Usable per-cluster values plus whether anything was missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally<T> {
    /// Successful, well-shaped values keyed by cluster identifier.
    pub values: BTreeMap<String, T>,
    /// `true` if at least one peer failed or replied with the wrong shape.
    pub any_failed: bool,
}

impl<T> Tally<T> {
    pub fn partial(&self, expected: usize) -> bool {
        self.any_failed || self.values.len() != expected
    }
}

/// Keep the successful values that deserialize into `T`.
pub fn tally<T: DeserializeOwned>(label: &str, outcomes: &Outcomes) -> Tally<T> {
    let mut values = BTreeMap::new();
    let mut any_failed = false;

    for (cluster, outcome) in outcomes {
        match outcome {
            Outcome::Success(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(v) => {
                    values.insert(cluster.clone(), v);
                }
                Err(e) => {
                    any_failed = true;
                    warn!(cluster = %cluster, error = %e, "{label}: unusable reply");
                }
            },
            other => {
                any_failed = true;
                warn!(cluster = %cluster, outcome = %other, "{label}: cluster did not answer");
            }
        }
    }
    Tally { values, any_failed }
}

// ─────────────────────────────────────────────
// Guild count
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    pub statistic: u64,
    pub partial_response: bool,
}

/// Sum of every cluster's guild count.
pub fn guild_count(outcomes: &Outcomes, expected_clusters: usize) -> Statistic {
    let tally = tally::<u64>("guild count", outcomes);
    let partial = tally.partial(expected_clusters);
    if tally.values.len() != expected_clusters {
        warn!(
            responded = tally.values.len(),
            expected = expected_clusters,
            "guild count did not get a response from every cluster"
        );
    }
    let (statistic, overflowed) = tally
        .values
        .values()
        .fold((0u64, false), |(acc, over), v| add_saturating(acc, *v, over));
    if overflowed {
        warn!("guild count overflowed u64, clamped");
    }
    Statistic {
        statistic,
        partial_response: partial || overflowed,
    }
}

// ─────────────────────────────────────────────
// Cached item counts
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedItemsStatistic {
    /// Verbatim counts from each cluster that answered.
    pub per_cluster: BTreeMap<String, BTreeMap<String, u64>>,
    /// Element-wise sum over `per_cluster`.
    pub total_counts: BTreeMap<String, u64>,
    pub partial_response: bool,
}

pub fn cached_items(outcomes: &Outcomes, expected_clusters: usize) -> CachedItemsStatistic {
    let tally = tally::<BTreeMap<String, u64>>("cached item count", outcomes);
    let partial = tally.partial(expected_clusters);

    let mut overflowed = false;
    let mut total_counts: BTreeMap<String, u64> = BTreeMap::new();
    for counts in tally.values.values() {
        for (key, count) in counts {
            let total = total_counts.entry(key.clone()).or_insert(0);
            let (sum, over) = add_saturating(*total, *count, overflowed);
            *total = sum;
            overflowed = over;
        }
    }
    if overflowed {
        warn!("cached item count overflowed u64, clamped");
    }

    CachedItemsStatistic {
        per_cluster: tally.values,
        total_counts,
        partial_response: partial || overflowed,
    }
}

// ─────────────────────────────────────────────
// Cluster health
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub latency: f64,
    pub is_currently_up: bool,
}

/// What one cluster reports from its `cluster_status` route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub shards: BTreeMap<u64, ShardInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub clusters: BTreeMap<String, ClusterInfo>,
    /// Every shard from every answering cluster, flattened.
    pub shards: BTreeMap<u64, ShardInfo>,
    pub partial_response: bool,
}

impl ClusterHealth {
    pub fn shards_up(&self) -> usize {
        self.shards.values().filter(|s| s.is_currently_up).count()
    }
}

/// Merge shard status maps. The partial rule runs against the shard count.
pub fn cluster_health(outcomes: &Outcomes, expected_shards: usize) -> ClusterHealth {
    let tally = tally::<ClusterInfo>("cluster status", outcomes);

    let mut shards = BTreeMap::new();
    for (cluster, info) in &tally.values {
        for (shard_id, status) in &info.shards {
            if shards.insert(*shard_id, status.clone()).is_some() {
                warn!(
                    cluster = %cluster,
                    shard = shard_id,
                    "shard reported by more than one cluster"
                );
            }
        }
    }

    let partial = tally.any_failed || shards.len() != expected_shards;
    ClusterHealth {
        clusters: tally.values,
        shards,
        partial_response: partial,
    }
}

// ─────────────────────────────────────────────
// Shared guilds
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedGuilds {
    pub shared_guilds: Vec<u64>,
    pub partial_response: bool,
}

/// Union of the guild ids each cluster reports it shares with a user.
pub fn shared_guilds(outcomes: &Outcomes, expected_clusters: usize) -> SharedGuilds {
    let tally = tally::<Vec<u64>>("shared guilds", outcomes);
    let partial = tally.partial(expected_clusters);
    let merged: BTreeSet<u64> = tally.values.into_values().flatten().collect();
    SharedGuilds {
        shared_guilds: merged.into_iter().collect(),
        partial_response: partial,
    }
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

/// For fan-out commands that must land everywhere: the sorted ids that did not
/// succeed, or the number of clusters that did.
pub fn all_succeeded(outcomes: &Outcomes) -> Result<usize, Vec<String>> {
    let mut failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, o)| !o.is_success())
        .map(|(id, o)| {
            warn!(cluster = %id, outcome = %o, "command failed on cluster");
            id.clone()
        })
        .collect();

    if failed.is_empty() {
        Ok(outcomes.len())
    } else {
        failed.sort();
        Err(failed)
    }
}

/// Clamp at `u64::MAX`; the flag records that a clamp ever happened.
fn add_saturating(acc: u64, value: u64, overflowed: bool) -> (u64, bool) {
    match acc.checked_add(value) {
        Some(sum) => (sum, overflowed),
        None => (u64::MAX, true),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn success(value: impl Into<Value>) -> Outcome {
        Outcome::Success(value.into())
    }

    fn outcomes(entries: Vec<(&str, Outcome)>) -> Outcomes {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn guild_count_sums_and_flags_failures() {
        let o = outcomes(vec![
            ("1", success(10)),
            ("2", Outcome::RemoteFailure("boom".into())),
            ("3", success(5)),
        ]);
        let stat = guild_count(&o, 3);
        assert_eq!(stat.statistic, 15);
        assert!(stat.partial_response);
    }

    #[test]
    fn guild_count_complete_is_not_partial() {
        let o = outcomes(vec![("1", success(10)), ("2", success(1))]);
        assert_eq!(guild_count(&o, 2), Statistic { statistic: 11, partial_response: false });
    }

    #[test]
    fn missing_clusters_make_it_partial() {
        let o = outcomes(vec![("1", success(10))]);
        assert!(guild_count(&o, 11).partial_response);
        assert!(!guild_count(&o, 1).partial_response);
    }

    #[test]
    fn null_guild_count_counts_as_failure() {
        let o = outcomes(vec![("1", success(10)), ("2", Outcome::Success(Value::Null))]);
        let stat = guild_count(&o, 2);
        assert_eq!(stat.statistic, 10);
        assert!(stat.partial_response);
    }

    #[test]
    fn huge_guild_counts_clamp_instead_of_overflowing() {
        let o = outcomes(vec![("1", success(u64::MAX)), ("2", success(1))]);
        let stat = guild_count(&o, 2);
        assert_eq!(stat.statistic, u64::MAX);
        assert!(stat.partial_response);
    }

    #[test]
    fn huge_cached_counts_clamp_instead_of_overflowing() {
        let o = outcomes(vec![
            ("A", success(json!({"x": u64::MAX, "y": 1}))),
            ("B", success(json!({"x": 1, "y": 2}))),
        ]);
        let stat = cached_items(&o, 2);
        assert_eq!(stat.total_counts["x"], u64::MAX);
        assert_eq!(stat.total_counts["y"], 3);
        assert!(stat.partial_response);
    }

    #[test]
    fn cached_items_sum_elementwise() {
        let o = outcomes(vec![
            ("A", success(json!({"x": 2, "y": 1}))),
            ("B", success(json!({"x": 3}))),
        ]);
        let stat = cached_items(&o, 2);
        assert_eq!(stat.total_counts, BTreeMap::from([("x".to_string(), 5), ("y".to_string(), 1)]));
        assert_eq!(stat.per_cluster.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(stat.per_cluster["B"], BTreeMap::from([("x".to_string(), 3)]));
        assert!(!stat.partial_response);
    }

    #[test]
    fn cached_items_breakdown_excludes_failed_peers() {
        let o = outcomes(vec![("A", success(json!({"x": 2}))), ("B", Outcome::Timeout)]);
        let stat = cached_items(&o, 2);
        assert_eq!(stat.per_cluster.len(), 1);
        assert!(stat.partial_response);
    }

    #[test]
    fn cluster_health_merges_shards() {
        let o = outcomes(vec![
            ("1", success(json!({"shards": {"0": {"latency": 0.1, "is_currently_up": true},
                                           "1": {"latency": 0.2, "is_currently_up": false}}}))),
            ("2", success(json!({"shards": {"2": {"latency": 0.3, "is_currently_up": true}}}))),
        ]);
        let health = cluster_health(&o, 3);
        assert_eq!(health.shards.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(health.shards_up(), 2);
        assert_eq!(health.clusters.len(), 2);
        assert!(!health.partial_response);

        assert!(cluster_health(&o, 4).partial_response);
    }

    #[test]
    fn shared_guilds_union() {
        let o = outcomes(vec![
            ("1", success(json!([3, 1]))),
            ("2", success(json!([2, 3]))),
            ("3", Outcome::Disconnected),
        ]);
        let shared = shared_guilds(&o, 3);
        assert_eq!(shared.shared_guilds, vec![1, 2, 3]);
        assert!(shared.partial_response);
    }

    #[test]
    fn all_succeeded_lists_failures() {
        let ok = outcomes(vec![("1", success(json!(null))), ("2", success(json!(true)))]);
        assert_eq!(all_succeeded(&ok), Ok(2));

        let bad = outcomes(vec![
            ("2", Outcome::Timeout),
            ("1", Outcome::RemoteFailure("x".into())),
            ("3", success(json!(null))),
        ]);
        assert_eq!(all_succeeded(&bad), Err(vec!["1".to_string(), "2".to_string()]));
    }
}
