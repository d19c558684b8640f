//! Opportunity Tracker - Promote persistent, recurring spreads to execution candidates
//!
//! Purpose:
//!     A single profitable probe is often a transient artifact of one pool
//!     updating before its peer. The tracker aggregates opportunities per route
//!     and only emits a candidate once the route has stayed open long enough,
//!     been seen more than once, and reached a worthwhile profit.
//!
//! Design:
//!     - Route key: (buy_pool, sell_pool)
//!     - Gates, in order: persistence (last_seen - first_seen), recurrence
//!       (occurrences), profitability (best net USD)
//!     - A route that passes fires again on every later observation
//!       (heartbeat); consumers de-duplicate if they need to
//!     - Entries expire after `entry_ttl` without observations; the map is
//!       capped at `max_entries`, evicting the least recently seen route

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::{ExecutionCandidate, PoolAddress, SpreadOpportunity};

/// Unique identifier for a route: (buy_pool, sell_pool)
type RouteKey = (PoolAddress, PoolAddress);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_min_persistence_ms")]
    pub min_persistence_ms: u64,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: u32,
    #[serde(default = "default_min_net_usd")]
    pub min_net_usd: f64,
    /// Seconds without an observation before a route is forgotten
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_min_persistence_ms() -> u64 {
    50
}
fn default_min_occurrences() -> u32 {
    2
}
fn default_min_net_usd() -> f64 {
    5.0
}
fn default_entry_ttl_secs() -> u64 {
    60
}
fn default_max_entries() -> usize {
    10_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_persistence_ms: default_min_persistence_ms(),
            min_occurrences: default_min_occurrences(),
            min_net_usd: default_min_net_usd(),
            entry_ttl_secs: default_entry_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

/// Aggregate for a single route
#[derive(Debug, Clone)]
struct TrackedOpportunity {
    first_seen: Instant,
    last_seen: Instant,
    occurrences: u32,
    best_net_usd: f64,
}

impl TrackedOpportunity {
    fn persistence(&self) -> Duration {
        self.last_seen.saturating_duration_since(self.first_seen)
    }
}

/// Which gate stopped a route, for debug logs and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Persistence,
    Recurrence,
    Profitability,
    Passed,
}

pub struct OpportunityTracker {
    entries: HashMap<RouteKey, TrackedOpportunity>,
    config: TrackerConfig,
}

impl OpportunityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Swap thresholds in place (SIGHUP reload). Tracked routes are kept.
    pub fn update_config(&mut self, config: TrackerConfig) {
        info!(
            "Tracker thresholds: persistence>={}ms occurrences>={} net>=${:.2}",
            config.min_persistence_ms, config.min_occurrences, config.min_net_usd
        );
        self.config = config;
    }

    /// Upsert the route for `opportunity` at `now` and run the gates.
    /// Returns a candidate when all gates pass.
    pub fn observe(&mut self, opportunity: &SpreadOpportunity, now: Instant) -> Option<ExecutionCandidate> {
        let key = (opportunity.buy_pool.clone(), opportunity.sell_pool.clone());

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict_least_recent();
        }

        let entry = self
            .entries
            .entry(key)
            .and_modify(|e| {
                e.last_seen = now;
                e.occurrences = e.occurrences.saturating_add(1);
                e.best_net_usd = e.best_net_usd.max(opportunity.net_profit_usd);
            })
            .or_insert_with(|| TrackedOpportunity {
                first_seen: now,
                last_seen: now,
                occurrences: 1,
                best_net_usd: opportunity.net_profit_usd,
            });

        let outcome = Self::gate(&self.config, entry);
        if outcome != GateOutcome::Passed {
            debug!(
                "Route {}->{} held at {:?} gate | seen {} | best ${:.2}",
                opportunity.buy_pool.short(),
                opportunity.sell_pool.short(),
                outcome,
                entry.occurrences,
                entry.best_net_usd
            );
            return None;
        }

        let candidate = ExecutionCandidate {
            buy_pool: opportunity.buy_pool.clone(),
            sell_pool: opportunity.sell_pool.clone(),
            best_net_usd: entry.best_net_usd,
            persistence_ms: entry.persistence().as_millis() as u64,
            occurrences: entry.occurrences,
        };

        info!(
            "CANDIDATE: {}->{} | best ${:.2} | persisted {}ms | seen {}x",
            candidate.buy_pool.short(),
            candidate.sell_pool.short(),
            candidate.best_net_usd,
            candidate.persistence_ms,
            candidate.occurrences
        );

        Some(candidate)
    }

    fn gate(config: &TrackerConfig, entry: &TrackedOpportunity) -> GateOutcome {
        if entry.persistence() < Duration::from_millis(config.min_persistence_ms) {
            return GateOutcome::Persistence;
        }
        if entry.occurrences < config.min_occurrences {
            return GateOutcome::Recurrence;
        }
        if entry.best_net_usd < config.min_net_usd {
            return GateOutcome::Profitability;
        }
        GateOutcome::Passed
    }

    /// Current gate outcome for a route, if tracked
    pub fn status(&self, buy_pool: &PoolAddress, sell_pool: &PoolAddress) -> Option<GateOutcome> {
        self.entries
            .get(&(buy_pool.clone(), sell_pool.clone()))
            .map(|e| Self::gate(&self.config, e))
    }

    /// Remove routes not observed within `entry_ttl_secs` of `now`.
    /// Call periodically (maintenance tick).
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let ttl = Duration::from_secs(self.config.entry_ttl_secs);
        let before = self.entries.len();
        self.entries
            .retain(|_key, entry| now.saturating_duration_since(entry.last_seen) < ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Tracker cleanup: removed {} stale routes", removed);
        }
        removed
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            debug!("Tracker full, evicting {}->{}", key.0.short(), key.1.short());
            self.entries.remove(&key);
        }
    }

    /// Number of tracked routes
    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for OpportunityTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(buy: &str, sell: &str, net: f64) -> SpreadOpportunity {
        SpreadOpportunity {
            buy_pool: PoolAddress::new(buy),
            sell_pool: PoolAddress::new(sell),
            probe_usd: 100.0,
            gross_profit_usd: net + 0.01,
            net_profit_usd: net,
            sequence: 1,
            sizing: None,
        }
    }

    #[test]
    fn test_second_observation_emits_candidate() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();

        assert!(tracker.observe(&opp("P", "Q", 6.0), t0).is_none());
        let candidate = tracker
            .observe(&opp("P", "Q", 7.0), t0 + Duration::from_millis(60))
            .expect("all gates pass");

        assert_eq!(candidate.pair_key(), "P->Q");
        assert_eq!(candidate.best_net_usd, 7.0);
        assert_eq!(candidate.persistence_ms, 60);
        assert_eq!(candidate.occurrences, 2);
    }

    #[test]
    fn test_single_observation_never_emits() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        assert!(tracker.observe(&opp("P", "Q", 6.0), t0).is_none());
        assert_eq!(tracker.status(&PoolAddress::new("P"), &PoolAddress::new("Q")), Some(GateOutcome::Persistence));
    }

    #[test]
    fn test_gate_order() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        let p = PoolAddress::new("P");
        let q = PoolAddress::new("Q");

        // Too quick
        tracker.observe(&opp("P", "Q", 1.0), t0);
        tracker.observe(&opp("P", "Q", 1.0), t0 + Duration::from_millis(10));
        assert_eq!(tracker.status(&p, &q), Some(GateOutcome::Persistence));

        // Long enough, too small
        assert!(tracker.observe(&opp("P", "Q", 2.0), t0 + Duration::from_millis(80)).is_none());
        assert_eq!(tracker.status(&p, &q), Some(GateOutcome::Profitability));
    }

    #[test]
    fn test_recurrence_gate() {
        let mut tracker = OpportunityTracker::new(TrackerConfig {
            min_occurrences: 3,
            ..TrackerConfig::default()
        });
        let t0 = Instant::now();
        tracker.observe(&opp("P", "Q", 9.0), t0);
        assert!(tracker.observe(&opp("P", "Q", 9.0), t0 + Duration::from_millis(60)).is_none());
        assert!(tracker.observe(&opp("P", "Q", 9.0), t0 + Duration::from_millis(70)).is_some());
    }

    #[test]
    fn test_repeated_firing() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        tracker.observe(&opp("P", "Q", 6.0), t0);
        assert!(tracker.observe(&opp("P", "Q", 6.0), t0 + Duration::from_millis(60)).is_some());
        let again = tracker.observe(&opp("P", "Q", 5.5), t0 + Duration::from_millis(90)).unwrap();
        assert_eq!(again.occurrences, 3);
        // best is sticky
        assert_eq!(again.best_net_usd, 6.0);
    }

    #[test]
    fn test_routes_are_directional() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        tracker.observe(&opp("P", "Q", 6.0), t0);
        assert!(tracker.observe(&opp("Q", "P", 6.0), t0 + Duration::from_millis(60)).is_none());
        assert_eq!(tracker.active_count(), 2);
    }

    #[test]
    fn test_evict_stale() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        tracker.observe(&opp("P", "Q", 6.0), t0);
        tracker.observe(&opp("R", "S", 6.0), t0 + Duration::from_secs(30));

        assert_eq!(tracker.evict_stale(t0 + Duration::from_secs(61)), 1);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.status(&PoolAddress::new("R"), &PoolAddress::new("S")).is_some());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut tracker = OpportunityTracker::new(TrackerConfig {
            max_entries: 2,
            ..TrackerConfig::default()
        });
        let t0 = Instant::now();
        tracker.observe(&opp("A", "B", 6.0), t0);
        tracker.observe(&opp("C", "D", 6.0), t0 + Duration::from_millis(1));
        tracker.observe(&opp("E", "F", 6.0), t0 + Duration::from_millis(2));

        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.status(&PoolAddress::new("A"), &PoolAddress::new("B")).is_none());
    }

    #[test]
    fn test_update_config_keeps_routes() {
        let mut tracker = OpportunityTracker::default();
        let t0 = Instant::now();
        tracker.observe(&opp("P", "Q", 3.0), t0);
        tracker.update_config(TrackerConfig {
            min_net_usd: 2.0,
            ..TrackerConfig::default()
        });
        assert!(tracker.observe(&opp("P", "Q", 3.0), t0 + Duration::from_millis(60)).is_some());
    }
}
