//! orchard-pipeline - Production/Publish Pipeline Worker
//!
//! Polls the durable task queue, produces content through content-type
//! specific generators, quality-gates the result, publishes approved content
//! to platform accounts and schedules the first measurement round.

pub mod generate;
pub mod pipeline;
pub mod publish;
pub mod quality;
pub mod state;
