//! orchard-batch - Batch Scheduler Worker
//!
//! Minute-resolution check loop firing five maintenance jobs: baseline
//! refresh, adjustment-cache refresh, weight recalibration, KPI snapshots and
//! embedding refresh. Firing decisions are deduplicated through a unique
//! (job, hour) key in the store, so restarts and concurrent scheduler
//! instances can never double-fire a job.

pub mod jobs;
pub mod scheduler;
