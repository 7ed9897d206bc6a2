//! # Orchard Common Library
//!
//! Shared code for all Orchard workers including:
//! - Database schema, models and queries (single SQLite store)
//! - Durable task queue with atomic claim semantics
//! - Key-value settings table accessors
//! - Prediction engine (baselines, adjustment factors, weights, KPI)
//! - Platform capability layer (adapters, credentials, metrics collection)
//! - Retry/backoff utilities

pub mod config;
pub mod db;
pub mod error;
pub mod platform;
pub mod predict;
pub mod retry;

pub use error::{Error, Result};
