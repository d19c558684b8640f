//! Cross-Pool AMM Spread Detector
//!
//! Reconciles per-account pool updates into consistent snapshots, detects
//! price spreads between pools trading the same pair, simulates the round
//! trip with exact integer swap math, sizes the trade, and promotes spreads
//! that persist into execution candidates.

pub mod arbitrage;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod oracle;
pub mod pool;
pub mod spread_logger;
pub mod types;

// Re-export commonly used types
pub use arbitrage::{OpportunityTracker, SpreadDetector, TradeSizeOptimizer};
pub use config::SpreadConfig;
pub use engine::{Engine, Pipeline};
pub use oracle::{CachedPriceOracle, PriceOracle};
pub use pool::{PoolStateReconciler, SwapSimulator};
pub use types::{ExecutionCandidate, PoolSnapshot, PoolUpdate, SpreadOpportunity};
