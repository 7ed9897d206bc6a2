//! Prediction engine
//!
//! Forecasts expected impressions for a publication from an account baseline
//! and nine weighted adjustment factors, then learns from measured outcomes:
//! - [`baseline`] — account baselines with a 4-stage cohort fallback chain
//! - [`factors`] — the closed factor set and its applicability matrix
//! - [`engine`] — `predict()`: adjustments, clipping, cold start, snapshots
//! - [`accuracy`] — prediction error with explicit edge-case policy
//! - [`weights`] — EMA weight recalibration with rate clip and floor
//! - [`adjustment_cache`] — cached per-factor historical performance
//! - [`kpi`] — monthly per-platform KPI snapshots

pub mod accuracy;
pub mod adjustment_cache;
pub mod baseline;
pub mod engine;
pub mod factors;
pub mod kpi;
pub mod weights;
