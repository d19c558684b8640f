//! Core data structures shared by the reconciler, detector, optimizer and tracker.
//!
//! Exact values that feed a profitability decision are integers (`u128` raw
//! amounts, `i128` profits, [`FeeRate`] rationals). Advisory values (spot
//! prices, bps, USD) are `f64` and never flow back into the integer math.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool account address (base58 public key as reported by the ledger)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolAddress(String);

impl PoolAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First six characters, used in log lines
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(6).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for PoolAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token mint address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mint(String);

impl Mint {
    pub fn new(mint: impl Into<String>) -> Self {
        Self(mint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pricing curve families we can simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveType {
    ConstantProduct,
    ConcentratedLiquidity,
}

impl fmt::Display for CurveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CurveType::ConstantProduct => write!(f, "CPMM"),
            CurveType::ConcentratedLiquidity => write!(f, "CLMM"),
        }
    }
}

/// Swap fee as an exact rational `numerator / denominator`.
///
/// Invariant: `denominator > 0` and `numerator < denominator`, i.e. the fee is
/// in `[0, 1)`. Constructors return `None` rather than build a value that
/// breaks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeRate {
    numerator: u64,
    denominator: u64,
}

impl FeeRate {
    /// Denominator used when a fee arrives as a decimal fraction
    pub const FRACTION_SCALE: u64 = 1_000_000;

    pub const ZERO: FeeRate = FeeRate {
        numerator: 0,
        denominator: 1,
    };

    pub fn new(numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 || numerator >= denominator {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    /// Convert a catalog fee fraction (e.g. `0.0025`) into a rational with a
    /// 1e6 denominator. Happens once, at the ingestion boundary.
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if !fraction.is_finite() || fraction < 0.0 || fraction >= 1.0 {
            return None;
        }
        let numerator = (fraction * Self::FRACTION_SCALE as f64).round() as u64;
        Self::new(numerator, Self::FRACTION_SCALE)
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Amount left after the fee: `amount * (den - num) / den`, truncating
    pub fn apply(&self, amount: u128) -> u128 {
        let keep = (self.denominator - self.numerator) as u128;
        let den = self.denominator as u128;
        // amount * keep can overflow u128 for huge amounts; split the division
        (amount / den) * keep + (amount % den) * keep / den
    }

    /// Advisory display value
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Static description of a monitored pool (from the pool catalog)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub address: PoolAddress,
    pub curve_type: CurveType,
    pub base_mint: Mint,
    pub quote_mint: Mint,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub fee: FeeRate,
}

/// Curve-specific live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum CurveState {
    ConstantProduct {
        reserve_base: u128,
        reserve_quote: u128,
    },
    ConcentratedLiquidity {
        /// sqrt(price) as Q64.64 fixed point
        sqrt_price_q64: u128,
        liquidity: u128,
    },
}

impl CurveState {
    pub fn curve_type(&self) -> CurveType {
        match self {
            CurveState::ConstantProduct { .. } => CurveType::ConstantProduct,
            CurveState::ConcentratedLiquidity { .. } => CurveType::ConcentratedLiquidity,
        }
    }
}

/// A consistent observation of one pool, published by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub meta: PoolMetadata,
    pub curve: CurveState,
    /// Ledger slot the state was observed at
    pub sequence: u64,
}

impl PoolSnapshot {
    pub fn address(&self) -> &PoolAddress {
        &self.meta.address
    }

    /// True when both pools trade the same (base, quote) pair
    pub fn same_pair(&self, other: &PoolSnapshot) -> bool {
        self.meta.base_mint == other.meta.base_mint && self.meta.quote_mint == other.meta.quote_mint
    }
}

/// Which reserve account of a constant-product pool an update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveSide {
    Base,
    Quote,
}

impl fmt::Display for ReserveSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReserveSide::Base => write!(f, "base"),
            ReserveSide::Quote => write!(f, "quote"),
        }
    }
}

/// One reserve of a constant-product pool, reported by its own vault account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUpdate {
    pub address: PoolAddress,
    pub side: ReserveSide,
    pub value: u128,
    pub sequence: u64,
}

/// Whole concentrated-liquidity state, reported by the pool account itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullUpdate {
    pub address: PoolAddress,
    pub sqrt_price_q64: u128,
    pub liquidity: u128,
    pub sequence: u64,
}

/// Validated ingestion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolUpdate {
    Partial(PartialUpdate),
    Full(FullUpdate),
}

impl PoolUpdate {
    pub fn address(&self) -> &PoolAddress {
        match self {
            PoolUpdate::Partial(u) => &u.address,
            PoolUpdate::Full(u) => &u.address,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            PoolUpdate::Partial(u) => u.sequence,
            PoolUpdate::Full(u) => u.sequence,
        }
    }
}

/// Result of one bounded ternary search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Input (raw quote units) with the highest round-trip profit found
    pub optimal_input: u128,
    /// Profit at `optimal_input` (raw quote units, may be negative)
    pub profit: i128,
    pub iterations: u32,
    pub final_lower_bound: u128,
    pub final_upper_bound: u128,
    pub refinement_applied: bool,
}

/// Cross-pool opportunity detected by the spread detector
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadOpportunity {
    pub buy_pool: PoolAddress,
    pub sell_pool: PoolAddress,
    pub probe_usd: f64,
    pub gross_profit_usd: f64,
    pub net_profit_usd: f64,
    /// max(buy.sequence, sell.sequence)
    pub sequence: u64,
    /// Optimizer output when sizing ran for this detection
    pub sizing: Option<OptimizationResult>,
}

/// Route that passed persistence, recurrence and profit gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCandidate {
    pub buy_pool: PoolAddress,
    pub sell_pool: PoolAddress,
    pub best_net_usd: f64,
    pub persistence_ms: u64,
    pub occurrences: u32,
}

impl ExecutionCandidate {
    /// `buy->sell` route key
    pub fn pair_key(&self) -> String {
        format!("{}->{}", self.buy_pool, self.sell_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rate_bounds() {
        assert!(FeeRate::new(3, 1000).is_some());
        assert!(FeeRate::new(0, 1).is_some());
        assert!(FeeRate::new(1000, 1000).is_none());
        assert!(FeeRate::new(1, 0).is_none());
    }

    #[test]
    fn test_fee_rate_from_fraction() {
        let fee = FeeRate::from_fraction(0.0025).unwrap();
        assert_eq!(fee.numerator(), 2_500);
        assert_eq!(fee.denominator(), 1_000_000);

        assert!(FeeRate::from_fraction(1.0).is_none());
        assert!(FeeRate::from_fraction(-0.1).is_none());
        assert!(FeeRate::from_fraction(f64::NAN).is_none());
    }

    #[test]
    fn test_fee_apply_truncates() {
        let fee = FeeRate::new(3, 1000).unwrap();
        assert_eq!(fee.apply(1000), 997);
        // 999 * 997 / 1000 = 996.003
        assert_eq!(fee.apply(999), 996);
        assert_eq!(FeeRate::ZERO.apply(12345), 12345);
    }

    #[test]
    fn test_fee_apply_no_overflow_near_max() {
        let fee = FeeRate::new(3, 1000).unwrap();
        let out = fee.apply(u128::MAX);
        assert!(out < u128::MAX);
        assert!(out > u128::MAX / 1000 * 996);
    }

    #[test]
    fn test_short_address() {
        let addr = PoolAddress::new("58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2");
        assert_eq!(addr.short(), "58oQCh");
        assert_eq!(PoolAddress::new("abc").short(), "abc");
    }

    #[test]
    fn test_candidate_pair_key() {
        let c = ExecutionCandidate {
            buy_pool: PoolAddress::new("P"),
            sell_pool: PoolAddress::new("Q"),
            best_net_usd: 6.0,
            persistence_ms: 60,
            occurrences: 2,
        };
        assert_eq!(c.pair_key(), "P->Q");
    }
}
