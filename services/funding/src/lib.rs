//! Funding: premium/funding-rate computation, accrual, and settlement
//!
//! # Modules
//! - `engine`: per-market mark/premium/funding state and the accumulator
//! - `applicator`: settlement sweep debiting accrued funding from positions

pub mod applicator;
pub mod engine;

pub use applicator::{apply_funding, FundingPayment};
pub use engine::{FundingEngine, FundingSnapshot, MarketFundingConfig};
