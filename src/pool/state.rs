//! Pool State Reconciler
//!
//! Merges asynchronously arriving pool updates into consistent snapshots.
//!
//! Constant-product pools are reported by two independent vault accounts
//! (base reserve, quote reserve). A snapshot is published only once both
//! sides carry the same sequence number, so reserves observed at different
//! slots are never combined into one "torn" price. Concentrated-liquidity
//! pools are reported by a single account and become consistent on every
//! update.
//!
//! Storage is a DashMap keyed by pool address; each transition runs under
//! that key's entry guard, which gives per-address mutual exclusion when
//! the reconciler is shared between threads.

use crate::types::{
    CurveState, CurveType, FullUpdate, PartialUpdate, PoolAddress, PoolMetadata, PoolSnapshot,
    PoolUpdate, ReserveSide,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reconciliation state of a single pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Nothing observed yet (or buffers pruned)
    Empty,
    /// At least one side observed, sides not aligned on a sequence
    PartiallyUpdated,
    /// Last published snapshot reflects the latest observations
    Consistent,
}

/// One observed reserve and the slot it was observed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SideValue {
    value: u128,
    sequence: u64,
}

#[derive(Debug, Clone, Default)]
struct ReserveBuffer {
    base: Option<SideValue>,
    quote: Option<SideValue>,
    /// (base, quote) of the last published snapshot
    published: Option<(u128, u128)>,
}

impl ReserveBuffer {
    fn side_mut(&mut self, side: ReserveSide) -> &mut Option<SideValue> {
        match side {
            ReserveSide::Base => &mut self.base,
            ReserveSide::Quote => &mut self.quote,
        }
    }

    fn latest_sequence(&self) -> Option<u64> {
        match (self.base, self.quote) {
            (Some(b), Some(q)) => Some(b.sequence.max(q.sequence)),
            (Some(s), None) | (None, Some(s)) => Some(s.sequence),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickState {
    sqrt_price_q64: u128,
    liquidity: u128,
    sequence: u64,
}

#[derive(Debug, Clone)]
enum Buffer {
    ConstantProduct(ReserveBuffer),
    ConcentratedLiquidity(Option<TickState>),
}

#[derive(Debug, Clone)]
struct PoolEntry {
    meta: PoolMetadata,
    buffer: Buffer,
}

impl PoolEntry {
    fn new(meta: PoolMetadata) -> Self {
        let buffer = match meta.curve_type {
            CurveType::ConstantProduct => Buffer::ConstantProduct(ReserveBuffer::default()),
            CurveType::ConcentratedLiquidity => Buffer::ConcentratedLiquidity(None),
        };
        Self { meta, buffer }
    }

    fn state(&self) -> ReconcileState {
        match &self.buffer {
            Buffer::ConstantProduct(buf) => match (buf.base, buf.quote) {
                (None, None) => ReconcileState::Empty,
                (Some(b), Some(q)) if b.sequence == q.sequence && buf.published == Some((b.value, q.value)) => {
                    ReconcileState::Consistent
                }
                _ => ReconcileState::PartiallyUpdated,
            },
            Buffer::ConcentratedLiquidity(None) => ReconcileState::Empty,
            Buffer::ConcentratedLiquidity(Some(_)) => ReconcileState::Consistent,
        }
    }

    fn latest_sequence(&self) -> Option<u64> {
        match &self.buffer {
            Buffer::ConstantProduct(buf) => buf.latest_sequence(),
            Buffer::ConcentratedLiquidity(tick) => tick.map(|t| t.sequence),
        }
    }
}

/// Per-pool state machine turning raw updates into consistent snapshots
#[derive(Debug)]
pub struct PoolStateReconciler {
    pools: Arc<DashMap<PoolAddress, PoolEntry>>,
}

impl PoolStateReconciler {
    pub fn new() -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
        }
    }

    /// Register a pool from the catalog. Re-registering resets its buffers.
    pub fn register_pool(&self, meta: PoolMetadata) {
        debug!("Registering pool {} ({})", meta.address, meta.curve_type);
        self.pools.insert(meta.address.clone(), PoolEntry::new(meta));
    }

    /// Apply one update. Returns a snapshot when a new consistent state forms.
    pub fn apply(&self, update: PoolUpdate) -> Option<PoolSnapshot> {
        match update {
            PoolUpdate::Partial(u) => self.apply_partial(u),
            PoolUpdate::Full(u) => self.apply_full(u),
        }
    }

    fn apply_partial(&self, update: PartialUpdate) -> Option<PoolSnapshot> {
        let mut entry = match self.pools.get_mut(&update.address) {
            Some(e) => e,
            None => {
                debug!("Reserve update for unregistered pool {}", update.address);
                return None;
            }
        };
        let entry = entry.value_mut();

        let buf = match &mut entry.buffer {
            Buffer::ConstantProduct(buf) => buf,
            Buffer::ConcentratedLiquidity(_) => {
                warn!(
                    "Reserve update for concentrated-liquidity pool {} ignored",
                    update.address
                );
                return None;
            }
        };

        let slot = buf.side_mut(update.side);
        if let Some(current) = slot {
            if update.sequence < current.sequence {
                debug!(
                    "Stale {} reserve for {}: seq {} < {}",
                    update.side, update.address, update.sequence, current.sequence
                );
                return None;
            }
        }
        *slot = Some(SideValue {
            value: update.value,
            sequence: update.sequence,
        });

        let (base, quote) = match (buf.base, buf.quote) {
            (Some(b), Some(q)) => (b, q),
            _ => return None,
        };

        if base.sequence != quote.sequence {
            return None;
        }

        if buf.published == Some((base.value, quote.value)) {
            // Same reserves re-observed at a newer slot
            return None;
        }

        buf.published = Some((base.value, quote.value));

        debug!(
            "CPMM {} | seq {} | reserves ({}, {})",
            update.address.short(),
            base.sequence,
            base.value,
            quote.value
        );

        Some(PoolSnapshot {
            meta: entry.meta.clone(),
            curve: CurveState::ConstantProduct {
                reserve_base: base.value,
                reserve_quote: quote.value,
            },
            sequence: base.sequence,
        })
    }

    fn apply_full(&self, update: FullUpdate) -> Option<PoolSnapshot> {
        let mut entry = match self.pools.get_mut(&update.address) {
            Some(e) => e,
            None => {
                debug!("Tick update for unregistered pool {}", update.address);
                return None;
            }
        };
        let entry = entry.value_mut();

        let tick = match &mut entry.buffer {
            Buffer::ConcentratedLiquidity(tick) => tick,
            Buffer::ConstantProduct(_) => {
                warn!(
                    "Tick update for constant-product pool {} ignored",
                    update.address
                );
                return None;
            }
        };

        if let Some(current) = tick {
            if update.sequence < current.sequence {
                debug!(
                    "Stale tick state for {}: seq {} < {}",
                    update.address, update.sequence, current.sequence
                );
                return None;
            }
        }

        *tick = Some(TickState {
            sqrt_price_q64: update.sqrt_price_q64,
            liquidity: update.liquidity,
            sequence: update.sequence,
        });

        debug!(
            "CLMM {} | seq {} | sqrt_price {} | liquidity {}",
            update.address.short(),
            update.sequence,
            update.sqrt_price_q64,
            update.liquidity
        );

        Some(PoolSnapshot {
            meta: entry.meta.clone(),
            curve: CurveState::ConcentratedLiquidity {
                sqrt_price_q64: update.sqrt_price_q64,
                liquidity: update.liquidity,
            },
            sequence: update.sequence,
        })
    }

    /// Current reconciliation state, `None` for unregistered pools
    pub fn state_of(&self, address: &PoolAddress) -> Option<ReconcileState> {
        self.pools.get(address).map(|entry| entry.state())
    }

    /// Drop buffered observations older than `min_sequence`. Pools stay
    /// registered and return to `Empty`. Returns the number of pools reset.
    pub fn prune_stale(&self, min_sequence: u64) -> usize {
        let mut reset = 0;
        for mut entry in self.pools.iter_mut() {
            let stale = matches!(entry.latest_sequence(), Some(seq) if seq < min_sequence);
            if stale {
                let meta = entry.meta.clone();
                *entry.value_mut() = PoolEntry::new(meta);
                reset += 1;
            }
        }
        if reset > 0 {
            debug!("Reconciler prune: reset {} stale pools (< seq {})", reset, min_sequence);
        }
        reset
    }

    /// Highest sequence observed across all pools
    pub fn latest_sequence(&self) -> Option<u64> {
        self.pools.iter().filter_map(|entry| entry.latest_sequence()).max()
    }

    /// Number of registered pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

impl Default for PoolStateReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PoolStateReconciler {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeeRate, Mint};

    fn meta(address: &str, curve_type: CurveType) -> PoolMetadata {
        PoolMetadata {
            address: PoolAddress::new(address),
            curve_type,
            base_mint: Mint::new("SOL"),
            quote_mint: Mint::new("USDC"),
            base_decimals: 9,
            quote_decimals: 6,
            fee: FeeRate::new(25, 10_000).unwrap(),
        }
    }

    fn reserve(address: &str, side: ReserveSide, value: u128, sequence: u64) -> PoolUpdate {
        PoolUpdate::Partial(PartialUpdate {
            address: PoolAddress::new(address),
            side,
            value,
            sequence,
        })
    }

    fn tick(address: &str, sqrt_price_q64: u128, liquidity: u128, sequence: u64) -> PoolUpdate {
        PoolUpdate::Full(FullUpdate {
            address: PoolAddress::new(address),
            sqrt_price_q64,
            liquidity,
            sequence,
        })
    }

    #[test]
    fn test_matching_sequences_publish_once() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));

        assert!(rec.apply(reserve("P", ReserveSide::Base, 1_000, 5)).is_none());
        assert_eq!(rec.state_of(&PoolAddress::new("P")), Some(ReconcileState::PartiallyUpdated));

        let snap = rec.apply(reserve("P", ReserveSide::Quote, 150, 5)).unwrap();
        assert_eq!(snap.sequence, 5);
        assert_eq!(
            snap.curve,
            CurveState::ConstantProduct {
                reserve_base: 1_000,
                reserve_quote: 150
            }
        );
        assert_eq!(rec.state_of(&PoolAddress::new("P")), Some(ReconcileState::Consistent));
    }

    #[test]
    fn test_mismatched_sequences_wait_for_pair() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));

        assert!(rec.apply(reserve("P", ReserveSide::Base, 1_000, 5)).is_none());
        assert!(rec.apply(reserve("P", ReserveSide::Quote, 150, 6)).is_none());
        assert_eq!(rec.state_of(&PoolAddress::new("P")), Some(ReconcileState::PartiallyUpdated));

        let snap = rec.apply(reserve("P", ReserveSide::Base, 990, 6)).unwrap();
        assert_eq!(snap.sequence, 6);
        assert_eq!(
            snap.curve,
            CurveState::ConstantProduct {
                reserve_base: 990,
                reserve_quote: 150
            }
        );
    }

    #[test]
    fn test_unchanged_pair_not_republished() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));

        rec.apply(reserve("P", ReserveSide::Base, 1_000, 5));
        assert!(rec.apply(reserve("P", ReserveSide::Quote, 150, 5)).is_some());

        // Same values re-observed at slot 7: bookkeeping advances, no publish
        assert!(rec.apply(reserve("P", ReserveSide::Base, 1_000, 7)).is_none());
        assert!(rec.apply(reserve("P", ReserveSide::Quote, 150, 7)).is_none());
        assert_eq!(rec.state_of(&PoolAddress::new("P")), Some(ReconcileState::Consistent));
        assert_eq!(rec.latest_sequence(), Some(7));

        // A real change publishes again
        rec.apply(reserve("P", ReserveSide::Base, 1_010, 8));
        assert!(rec.apply(reserve("P", ReserveSide::Quote, 149, 8)).is_some());
    }

    #[test]
    fn test_stale_side_ignored() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));

        rec.apply(reserve("P", ReserveSide::Base, 1_000, 9));
        // Older base arrives late, then quote for slot 9
        assert!(rec.apply(reserve("P", ReserveSide::Base, 500, 8)).is_none());
        let snap = rec.apply(reserve("P", ReserveSide::Quote, 150, 9)).unwrap();
        assert_eq!(
            snap.curve,
            CurveState::ConstantProduct {
                reserve_base: 1_000,
                reserve_quote: 150
            }
        );
    }

    #[test]
    fn test_clmm_publishes_every_update() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("C", CurveType::ConcentratedLiquidity));
        assert_eq!(rec.state_of(&PoolAddress::new("C")), Some(ReconcileState::Empty));

        assert!(rec.apply(tick("C", 1u128 << 64, 1_000_000, 10)).is_some());
        assert!(rec.apply(tick("C", 1u128 << 64, 1_000_000, 11)).is_some());
        assert!(rec.apply(tick("C", 1u128 << 64, 1_000_000, 9)).is_none());
        assert_eq!(rec.state_of(&PoolAddress::new("C")), Some(ReconcileState::Consistent));
    }

    #[test]
    fn test_wrong_shape_and_unknown_pool_dropped() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));
        rec.register_pool(meta("C", CurveType::ConcentratedLiquidity));

        assert!(rec.apply(tick("P", 1u128 << 64, 1_000, 1)).is_none());
        assert!(rec.apply(reserve("C", ReserveSide::Base, 1_000, 1)).is_none());
        assert!(rec.apply(reserve("X", ReserveSide::Base, 1_000, 1)).is_none());
        assert_eq!(rec.state_of(&PoolAddress::new("X")), None);
    }

    #[test]
    fn test_prune_stale_resets_buffers() {
        let rec = PoolStateReconciler::new();
        rec.register_pool(meta("P", CurveType::ConstantProduct));
        rec.register_pool(meta("C", CurveType::ConcentratedLiquidity));

        rec.apply(reserve("P", ReserveSide::Base, 1_000, 5));
        rec.apply(tick("C", 1u128 << 64, 1_000, 50));

        assert_eq!(rec.prune_stale(10), 1);
        assert_eq!(rec.state_of(&PoolAddress::new("P")), Some(ReconcileState::Empty));
        assert_eq!(rec.state_of(&PoolAddress::new("C")), Some(ReconcileState::Consistent));
        assert_eq!(rec.pool_count(), 2);
    }
}
