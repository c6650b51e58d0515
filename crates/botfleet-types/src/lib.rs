//! Shared domain types for Botfleet.
//!
//! This crate contains the core domain types used across the Botfleet
//! orchestrator: workflow and step definitions, execution records, queue
//! items, retry policies, schedules, and run lifecycle events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod event;
pub mod queue;
pub mod retry;
pub mod schedule;
pub mod workflow;
