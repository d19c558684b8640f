//! Spread Detector
//!
//! Compares every freshly published pool snapshot against the cached peers
//! that trade the same (base, quote) pair. For each peer it:
//!
//! 1. prices both pools at spot and drops pairs inside the noise floor
//! 2. orients the round trip (buy on the cheaper pool, sell on the dearer)
//! 3. sizes an adaptive probe from both pools' liquidity
//! 4. runs the probe through the exact integer round trip
//! 5. subtracts the execution cost and emits an opportunity if net > 0
//!
//! Steps 1-3 are advisory floating point. The profitability decision in
//! step 4 is made in integers by `SwapSimulator`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::cost::ExecutionCostModel;
use super::optimizer::TradeSizeOptimizer;
use crate::oracle::PriceOracle;
use crate::pool::SwapSimulator;
use crate::spread_logger::{DetectionRecord, Direction, SpreadRecord};
use crate::types::{CurveState, PoolAddress, PoolSnapshot, SpreadOpportunity};

/// Sizing never searches past this fraction of the shallower pool's quote depth
const SIZING_DEPTH_DIVISOR: u128 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Spreads below this many bps are not evaluated or logged
    #[serde(default = "default_noise_floor_bps")]
    pub noise_floor_bps: f64,
    /// Probe size as a fraction of the shallower pool's USD liquidity
    #[serde(default = "default_probe_depth_fraction")]
    pub probe_depth_fraction: f64,
    /// Run the trade size optimizer on profitable probes
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_noise_floor_bps() -> f64 {
    0.5
}
fn default_probe_depth_fraction() -> f64 {
    0.0005
}
fn default_optimize() -> bool {
    true
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            noise_floor_bps: default_noise_floor_bps(),
            probe_depth_fraction: default_probe_depth_fraction(),
            optimize: default_optimize(),
        }
    }
}

/// Everything the detector produced for one (updated pool, peer) pair
#[derive(Debug, Clone)]
pub struct SpreadEvaluation {
    pub spread: SpreadRecord,
    /// Present when a probe round trip was simulated
    pub detection: Option<DetectionRecord>,
    /// Present when the probe cleared execution cost
    pub opportunity: Option<SpreadOpportunity>,
}

pub struct SpreadDetector {
    /// Last published snapshot per pool
    cache: HashMap<PoolAddress, PoolSnapshot>,
    config: DetectorConfig,
    cost_model: ExecutionCostModel,
    optimizer: TradeSizeOptimizer,
    oracle: Arc<dyn PriceOracle>,
}

impl SpreadDetector {
    pub fn new(
        config: DetectorConfig,
        cost_model: ExecutionCostModel,
        optimizer: TradeSizeOptimizer,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            cache: HashMap::new(),
            config,
            cost_model,
            optimizer,
            oracle,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Hot-swap thresholds (SIGHUP reload). The snapshot cache is kept.
    pub fn update_config(&mut self, config: DetectorConfig, cost_model: ExecutionCostModel) {
        info!(
            "Detector thresholds: noise floor {} bps, probe {}x depth, optimize={}, fees {}+{}",
            config.noise_floor_bps,
            config.probe_depth_fraction,
            config.optimize,
            cost_model.base_tx_fee,
            cost_model.priority_fee
        );
        self.config = config;
        self.cost_model = cost_model;
    }

    /// Cache `snapshot` and evaluate it against every same-pair peer
    pub fn on_snapshot(&mut self, snapshot: PoolSnapshot) -> Vec<SpreadEvaluation> {
        let timestamp = Utc::now().timestamp_millis();

        let evaluations: Vec<SpreadEvaluation> = self
            .cache
            .values()
            .filter(|peer| peer.address() != snapshot.address() && peer.same_pair(&snapshot))
            .filter_map(|peer| self.evaluate_pair(&snapshot, peer, timestamp))
            .collect();

        self.cache.insert(snapshot.address().clone(), snapshot);
        evaluations
    }

    /// Evaluate updated pool `a` against cached peer `b`
    fn evaluate_pair(&self, a: &PoolSnapshot, b: &PoolSnapshot, timestamp: i64) -> Option<SpreadEvaluation> {
        let spot_a = SwapSimulator::spot_price(a)?;
        let spot_b = SwapSimulator::spot_price(b)?;
        if spot_a == spot_b {
            return None;
        }

        let spread_bps = (spot_a - spot_b) / spot_b * 10_000.0;
        if !spread_bps.is_finite() || spread_bps.abs() < self.config.noise_floor_bps {
            return None;
        }

        let spread = SpreadRecord {
            timestamp,
            pool_a: a.address().clone(),
            pool_b: b.address().clone(),
            spot_a,
            spot_b,
            spread_bps,
        };

        let (buy, sell, direction) = if spot_a < spot_b {
            (a, b, Direction::AToB)
        } else {
            (b, a, Direction::BToA)
        };

        let Some((probe_usd, probe_raw)) = self.probe_size(buy, sell) else {
            debug!(
                "No probe size for {}->{} (missing liquidity)",
                buy.address().short(),
                sell.address().short()
            );
            return Some(SpreadEvaluation {
                spread,
                detection: None,
                opportunity: None,
            });
        };

        let profit_raw = SwapSimulator::round_trip_profit(probe_raw, buy, sell);
        let profitable = profit_raw > 0;

        let sizing = if profitable && self.config.optimize {
            let upper = SwapSimulator::quote_depth(buy).min(SwapSimulator::quote_depth(sell)) / SIZING_DEPTH_DIVISOR;
            Some(self.optimizer.optimize(buy, sell, 1, upper))
        } else {
            None
        };

        let detection = DetectionRecord {
            timestamp,
            direction,
            spread_bps,
            micro_input: probe_raw,
            micro_profit: profit_raw,
            profitable,
            pool_a_slot: a.sequence,
            pool_b_slot: b.sequence,
            optimal_input: sizing.map(|s| s.optimal_input),
            optimal_profit: sizing.map(|s| s.profit),
        };

        let opportunity = if profitable {
            self.price_opportunity(buy, sell, probe_usd, profit_raw, sizing)
        } else {
            None
        };

        Some(SpreadEvaluation {
            spread,
            detection: Some(detection),
            opportunity,
        })
    }

    /// Convert a raw profit to USD, subtract execution cost, keep it if net > 0
    fn price_opportunity(
        &self,
        buy: &PoolSnapshot,
        sell: &PoolSnapshot,
        probe_usd: f64,
        profit_raw: i128,
        sizing: Option<crate::types::OptimizationResult>,
    ) -> Option<SpreadOpportunity> {
        let gross_profit_usd = profit_raw as f64 / 10f64.powi(buy.meta.quote_decimals as i32);
        let cost_usd = self.cost_model.cost_usd(self.oracle.as_ref());
        let net_profit_usd = gross_profit_usd - cost_usd;

        if net_profit_usd <= 0.0 {
            debug!(
                "{}->{} gross ${:.6} eaten by cost ${:.6}",
                buy.address().short(),
                sell.address().short(),
                gross_profit_usd,
                cost_usd
            );
            return None;
        }

        info!(
            "EXECUTABLE ARB: buy {} sell {} | probe ${:.2} | gross ${:.6} | net ${:.6}",
            buy.address().short(),
            sell.address().short(),
            probe_usd,
            gross_profit_usd,
            net_profit_usd
        );

        Some(SpreadOpportunity {
            buy_pool: buy.address().clone(),
            sell_pool: sell.address().clone(),
            probe_usd,
            gross_profit_usd,
            net_profit_usd,
            sequence: buy.sequence.max(sell.sequence),
            sizing,
        })
    }

    /// Adaptive probe: `min_liq * fraction * sqrt(liq_buy * liq_sell) / min_liq`.
    /// Returns (USD, raw quote units of the buy pool).
    fn probe_size(&self, buy: &PoolSnapshot, sell: &PoolSnapshot) -> Option<(f64, u128)> {
        let liq_buy = Self::liquidity_usd(buy);
        let liq_sell = Self::liquidity_usd(sell);
        let min_liq = liq_buy.min(liq_sell);
        if !(min_liq > 0.0) || !min_liq.is_finite() {
            return None;
        }

        let alpha = (liq_buy * liq_sell).sqrt() / min_liq;
        let probe_usd = min_liq * self.config.probe_depth_fraction * alpha;

        let raw = (probe_usd * 10f64.powi(buy.meta.quote_decimals as i32)).floor();
        if !raw.is_finite() || raw < 1.0 {
            return None;
        }

        Some((probe_usd, raw as u128))
    }

    /// Liquidity proxy in USD. Constant product: quote reserve in whole
    /// units. Concentrated liquidity: spot price adjusted by the decimal
    /// ratio, which is only a rough stand-in for depth.
    pub fn liquidity_usd(pool: &PoolSnapshot) -> f64 {
        match pool.curve {
            CurveState::ConstantProduct { reserve_base, reserve_quote } => {
                if reserve_base == 0 || reserve_quote == 0 {
                    return 0.0;
                }
                reserve_quote as f64 / 10f64.powi(pool.meta.quote_decimals as i32)
            }
            CurveState::ConcentratedLiquidity { .. } => {
                let Some(spot) = SwapSimulator::spot_price(pool) else {
                    return 0.0;
                };
                let decimal_adjust = 10f64.powi(pool.meta.base_decimals as i32 - pool.meta.quote_decimals as i32);
                spot * decimal_adjust
            }
        }
    }

    pub fn cached(&self, address: &PoolAddress) -> Option<&PoolSnapshot> {
        self.cache.get(address)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop cached snapshots observed before `min_sequence`
    pub fn prune_stale(&mut self, min_sequence: u64) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, snapshot| snapshot.sequence >= min_sequence);
        let removed = before - self.cache.len();
        if removed > 0 {
            debug!("Detector cache cleanup: removed {} snapshots older than slot {}", removed, min_sequence);
        }
        removed
    }
}
