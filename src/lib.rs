//! # tradeloop
//! Signal-to-decision pipeline with a closed learning loop.
//!
//! Stages run leaf to root: [`scoring`] turns raw signals into fused
//! scores, [`risk`] assesses a basket, [`proposal`] synthesizes a sized
//! trade idea, [`decision`] applies the rule set, and [`learning`] grades
//! realized outcomes and writes the adjusted [`state::ModelState`] back.

pub use crate::utils::error::{Error, Result};

pub mod config;
pub mod decision;
pub mod learning;
pub mod llm;
pub mod market_data;
pub mod metrics;
pub mod persistence;
pub mod proposal;
pub mod risk;
pub mod scoring;
pub mod service;
pub mod signal;
pub mod state;
pub mod utils;

pub use crate::config::Config;
pub use crate::service::{Pipeline, Response};
