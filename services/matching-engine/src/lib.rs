//! Matching engine: per-market order books with price/time priority
//!
//! # Modules
//! - `events`: request/result types, fill events, reject codes
//! - `book`: arena-backed order records, price levels, market shards
//! - `engine`: submit/cancel/replace entry points and the match loop

pub mod book;
pub mod engine;
pub mod events;

pub use engine::{LevelDepth, MatcherConfig, MatchingEngine};
pub use events::{
    reject, CancelRequest, CancelResult, FillEvent, OrderRequest, OrderResult, ReplaceRequest,
    ReplaceResult,
};
