//! Trade Size Optimizer
//!
//! Finds the input amount that maximizes round-trip profit between two pools.
//! Bounded ternary search narrows the domain, then an exhaustive scan of a
//! small window around the final interval corrects for integer-truncation
//! plateaus the ternary search can step over.
//!
//! Assumes the objective is unimodal on the domain. That holds for
//! constant-product round trips; for concentrated-liquidity and mixed-curve
//! round trips it is covered by the property tests in `pool::calculator`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pool::SwapSimulator;
use crate::types::{OptimizationResult, PoolSnapshot};

pub const DEFAULT_MAX_ITERATIONS: u32 = 80;
pub const DEFAULT_MIN_INTERVAL: u64 = 10;
pub const DEFAULT_REFINEMENT_WINDOW: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Hard cap on ternary iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Stop narrowing once `upper - lower` is at most this
    #[serde(default = "default_min_interval")]
    pub min_interval: u64,
    /// Units scanned on each side of the final interval
    #[serde(default = "default_refinement_window")]
    pub refinement_window: u64,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_min_interval() -> u64 {
    DEFAULT_MIN_INTERVAL
}
fn default_refinement_window() -> u64 {
    DEFAULT_REFINEMENT_WINDOW
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_interval: DEFAULT_MIN_INTERVAL,
            refinement_window: DEFAULT_REFINEMENT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TradeSizeOptimizer {
    config: OptimizerConfig,
}

impl TradeSizeOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Size a `buy -> sell` round trip over `[lower, upper]` (raw quote units)
    pub fn optimize(&self, buy: &PoolSnapshot, sell: &PoolSnapshot, lower: u128, upper: u128) -> OptimizationResult {
        let result = self.optimize_with(|x| SwapSimulator::round_trip_profit(x, buy, sell), lower, upper);
        debug!(
            "Optimized {}->{}: input={} profit={} iters={} refined={}",
            buy.address().short(),
            sell.address().short(),
            result.optimal_input,
            result.profit,
            result.iterations,
            result.refinement_applied
        );
        result
    }

    /// Maximize an arbitrary integer objective over `[lower, upper]`. Never fails.
    pub fn optimize_with<F>(&self, objective: F, lower: u128, upper: u128) -> OptimizationResult
    where
        F: Fn(u128) -> i128,
    {
        if lower >= upper {
            return OptimizationResult {
                optimal_input: lower,
                profit: objective(lower),
                iterations: 0,
                final_lower_bound: lower,
                final_upper_bound: upper,
                refinement_applied: false,
            };
        }

        let min_interval = self.config.min_interval as u128;
        let (mut lo, mut hi) = (lower, upper);
        let mut iterations = 0u32;

        while iterations < self.config.max_iterations && hi - lo > min_interval {
            let third = (hi - lo) / 3;
            let mid1 = lo + third;
            let mid2 = hi - third;
            if objective(mid1) < objective(mid2) {
                lo = mid1;
            } else {
                hi = mid2;
            }
            iterations += 1;
        }

        let mut best_input = lo;
        let mut best_profit = objective(lo);
        let mut refinement_applied = false;

        for (start, end) in self.refinement_windows(lo, hi) {
            let mut x = start;
            loop {
                let profit = objective(x);
                if profit > best_profit {
                    best_profit = profit;
                    best_input = x;
                    refinement_applied = true;
                }
                if x >= end {
                    break;
                }
                x += 1;
            }
        }

        OptimizationResult {
            optimal_input: best_input,
            profit: best_profit,
            iterations,
            final_lower_bound: lo,
            final_upper_bound: hi,
            refinement_applied,
        }
    }

    /// Inclusive scan ranges around the final interval, clamped at 0.
    /// If the iteration cap stopped the search early, only the two edges of
    /// the still-wide interval are scanned.
    fn refinement_windows(&self, lo: u128, hi: u128) -> Vec<(u128, u128)> {
        let window = self.config.refinement_window as u128;
        let min_interval = self.config.min_interval as u128;

        if hi - lo <= min_interval.saturating_add(window.saturating_mul(2)) {
            vec![(lo.saturating_sub(window), hi.saturating_add(window))]
        } else {
            vec![
                (lo.saturating_sub(window), lo.saturating_add(window)),
                (hi.saturating_sub(window), hi.saturating_add(window)),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CurveState, CurveType, FeeRate, Mint, PoolAddress, PoolMetadata};
    use proptest::prelude::*;

    fn cpmm(address: &str, base: u128, quote: u128) -> PoolSnapshot {
        PoolSnapshot {
            meta: PoolMetadata {
                address: PoolAddress::new(address),
                curve_type: CurveType::ConstantProduct,
                base_mint: Mint::new("SOL"),
                quote_mint: Mint::new("USDC"),
                base_decimals: 9,
                quote_decimals: 6,
                fee: FeeRate::new(3, 1000).unwrap(),
            },
            curve: CurveState::ConstantProduct {
                reserve_base: base,
                reserve_quote: quote,
            },
            sequence: 1,
        }
    }

    #[test]
    fn test_concave_objective_converges_to_peak() {
        let optimizer = TradeSizeOptimizer::default();
        let peak: i128 = 12_345;
        let result = optimizer.optimize_with(|x| -((x as i128 - peak) * (x as i128 - peak)), 0, 100_000);

        assert!(result.iterations <= DEFAULT_MAX_ITERATIONS);
        assert!((result.optimal_input as i128 - peak).abs() <= DEFAULT_REFINEMENT_WINDOW as i128);
        assert!(result.final_upper_bound - result.final_lower_bound <= DEFAULT_MIN_INTERVAL as u128);
    }

    proptest! {
        #[test]
        fn prop_concave_peak_found_within_window(
            lower in 0u128..1_000_000_000,
            width in 0u128..1_000_000_000_000,
            peak_fraction in 0.0f64..=1.0,
        ) {
            let upper = lower + width;
            let peak = lower + ((width as f64 * peak_fraction) as u128).min(width);
            let result = TradeSizeOptimizer::default().optimize_with(
                |x| {
                    let d = x as i128 - peak as i128;
                    -(d * d)
                },
                lower,
                upper,
            );

            prop_assert!(result.iterations <= DEFAULT_MAX_ITERATIONS);
            let miss = (result.optimal_input as i128 - peak as i128).abs();
            prop_assert!(miss <= DEFAULT_REFINEMENT_WINDOW as i128, "peak {} found {}", peak, result.optimal_input);
        }
    }

    #[test]
    fn test_refinement_finds_exact_peak() {
        let optimizer = TradeSizeOptimizer::default();
        let peak: i128 = 777_777;
        let result = optimizer.optimize_with(|x| -((x as i128 - peak).abs()), 1, 5_000_000);
        assert_eq!(result.optimal_input, peak as u128);
        assert_eq!(result.profit, 0);
    }

    #[test]
    fn test_peak_at_domain_edge() {
        let optimizer = TradeSizeOptimizer::default();
        let result = optimizer.optimize_with(|x| -(x as i128), 100, 10_000);
        assert!(result.optimal_input <= 120);
    }

    #[test]
    fn test_degenerate_domain_evaluates_single_point() {
        let optimizer = TradeSizeOptimizer::default();
        let result = optimizer.optimize_with(|x| x as i128 * 2, 50, 50);
        assert_eq!(result.optimal_input, 50);
        assert_eq!(result.profit, 100);
        assert_eq!(result.iterations, 0);
        assert!(!result.refinement_applied);

        let inverted = optimizer.optimize_with(|x| x as i128, 90, 10);
        assert_eq!(inverted.optimal_input, 90);
        assert_eq!(inverted.iterations, 0);
    }

    #[test]
    fn test_iteration_cap_bounds_work() {
        let optimizer = TradeSizeOptimizer::default();
        let upper = 1u128 << 100;
        let result = optimizer.optimize_with(|x| x as i128, 0, upper);

        assert_eq!(result.iterations, DEFAULT_MAX_ITERATIONS);
        assert!(result.final_upper_bound - result.final_lower_bound > DEFAULT_MIN_INTERVAL as u128);
        assert!(result.optimal_input >= result.final_upper_bound);
        assert!(result.refinement_applied);
    }

    #[test]
    fn test_cpmm_round_trip_sizing() {
        let buy = cpmm("A", 1_000_000_000_000, 100_000_000_000);
        let sell = cpmm("B", 1_000_000_000_000, 102_000_000_000);
        let upper = 100_000_000_000u128 / 3;

        let result = TradeSizeOptimizer::default().optimize(&buy, &sell, 1, upper);

        assert!(result.profit > 0);
        assert!(result.optimal_input <= upper);
        assert!(result.iterations <= DEFAULT_MAX_ITERATIONS);

        // Neighbourhood check: nothing a step away does meaningfully better
        for delta in [1_000_000u128, 10_000_000] {
            let left = SwapSimulator::round_trip_profit(result.optimal_input - delta, &buy, &sell);
            let right = SwapSimulator::round_trip_profit(result.optimal_input + delta, &buy, &sell);
            assert!(left <= result.profit);
            assert!(right <= result.profit);
        }
    }

    #[test]
    fn test_unprofitable_pair_reports_non_positive() {
        let a = cpmm("A", 1_000_000_000_000, 100_000_000_000);
        let b = cpmm("B", 1_000_000_000_000, 100_000_000_000);
        let result = TradeSizeOptimizer::default().optimize(&a, &b, 1, 1_000_000_000);
        assert!(result.profit <= 0);
    }

    #[test]
    fn test_config_from_toml_defaults() {
        let config: OptimizerConfig = toml::from_str("max_iterations = 40").unwrap();
        assert_eq!(config.max_iterations, 40);
        assert_eq!(config.min_interval, DEFAULT_MIN_INTERVAL);
        assert_eq!(config.refinement_window, DEFAULT_REFINEMENT_WINDOW);
    }
}
