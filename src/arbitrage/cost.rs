//! Execution Cost Model
//!
//! Estimates what landing a two-leg round trip costs, in USD. Both fee
//! components are denominated in the reference asset (SOL) and converted with
//! the oracle's last known price.

use serde::{Deserialize, Serialize};

use crate::oracle::PriceOracle;

/// Default signature fee per transaction (reference-asset units)
pub const DEFAULT_BASE_TX_FEE: f64 = 0.000005;

/// Default priority fee (reference-asset units)
pub const DEFAULT_PRIORITY_FEE: f64 = 0.00002;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCostModel {
    #[serde(default = "default_base_tx_fee")]
    pub base_tx_fee: f64,
    #[serde(default = "default_priority_fee")]
    pub priority_fee: f64,
}

fn default_base_tx_fee() -> f64 {
    DEFAULT_BASE_TX_FEE
}
fn default_priority_fee() -> f64 {
    DEFAULT_PRIORITY_FEE
}

impl Default for ExecutionCostModel {
    fn default() -> Self {
        Self {
            base_tx_fee: DEFAULT_BASE_TX_FEE,
            priority_fee: DEFAULT_PRIORITY_FEE,
        }
    }
}

impl ExecutionCostModel {
    pub fn new(base_tx_fee: f64, priority_fee: f64) -> Self {
        Self {
            base_tx_fee,
            priority_fee,
        }
    }

    /// Total fee in reference-asset units
    pub fn fee_in_reference(&self) -> f64 {
        self.base_tx_fee + self.priority_fee
    }

    /// Cost in USD at `reference_price`
    pub fn cost_usd_at(&self, reference_price: f64) -> f64 {
        self.fee_in_reference() * reference_price
    }

    /// Cost in USD at the oracle's current price. Never blocks.
    pub fn cost_usd(&self, oracle: &dyn PriceOracle) -> f64 {
        self.cost_usd_at(oracle.current_price())
    }
}
