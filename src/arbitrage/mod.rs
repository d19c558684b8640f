//! Arbitrage Module
//!
//! Spread detection, trade sizing, execution-cost estimation and the
//! persistence gates that turn opportunities into execution candidates.

pub mod cost;
pub mod detector;
pub mod optimizer;
pub mod tracker;

pub use cost::ExecutionCostModel;
pub use detector::{DetectorConfig, SpreadDetector, SpreadEvaluation};
pub use optimizer::{OptimizerConfig, TradeSizeOptimizer};
pub use tracker::{GateOutcome, OpportunityTracker, TrackerConfig};
