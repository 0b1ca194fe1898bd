//! Risk: margin evaluation, position accounting, liquidation
//!
//! # Modules
//! - `engine`: per-account collateral/PnL/positions and margin math
//! - `liquidation`: margin-health evaluation and forced close-out

pub mod engine;
pub mod liquidation;

pub use engine::{
    reject, AccountState, Decision, FillContext, MarginSummary, MarketRiskConfig, OrderIntent,
    PositionState, RiskEngine, RiskResult,
};
pub use liquidation::{
    evaluate, LiquidationExecutor, LiquidationOrder, LiquidationResult, LiquidationStatus,
};
