//! Trade Profitability ML
//!
//! Learns whether an arbitrage trade will be profitable from the trade's own
//! fields, its recent history and the server's context streams.
//!
//! ## Architecture
//!
//! ```text
//! Loader (trades, balances, gas, contracts) → Feature Builder → Split Engine
//!                                                                   ↓
//!                Inference Service ← Artifact Writer ← Training (CV, holdout, importance)
//! ```

pub mod artifact;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod ml;
pub mod service;
pub mod split;
pub mod status;
pub mod training;
