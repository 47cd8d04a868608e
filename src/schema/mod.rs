//! Unified metrics.daily_row.v1 schema
//!
//! This module defines the input schema for the canonical per-day metrics
//! table handed over by the ingestion collaborator: one record per calendar
//! day, each carrying a name-keyed map of nullable numeric metrics.

mod adapter;
mod daily_row;

pub use adapter::*;
pub use daily_row::*;
