//! TraitStats Library
//!
//! Marketplace sales ingestion and per-trait price statistics for a Chia NFT
//! collection

pub mod backfill;
pub mod config;
pub mod currency;
pub mod error;
pub mod lock;
pub mod logging;
pub mod marketplace;
pub mod metadata;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod types;

pub use error::{PipelineError, SkipReason};
