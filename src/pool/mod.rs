//! Pool state and swap math
//!
//! Reconciles asynchronous pool updates into consistent snapshots and
//! simulates swaps against them. Supports constant-product and
//! concentrated-liquidity (single tick) pools.

pub mod calculator;
pub mod state;

pub use calculator::{Leg, SwapDirection, SwapSimulator};
pub use state::{PoolStateReconciler, ReconcileState};
