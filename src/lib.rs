//! # Datamart Sync Library
//!
//! Incrementally synchronizes remote CSV extracts into a relational store
//! and maintains the chain of derived analytic tables (segmentation, cohort
//! revenue, lifetime value, retention, churn) on top of them.

pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod executor;
pub mod hash_cache;
pub mod loader;
pub mod marts;
pub mod pipeline;
pub mod remote;
pub mod sync;
pub mod telemetry;
