//! Orchestration core for Botfleet.
//!
//! Interprets workflow step trees against an opaque action capability,
//! fans one workflow out across many isolated profiles under a concurrency
//! cap, and triggers runs on a cron cadence. The browser driver itself,
//! profile provisioning, and persistence are external collaborators reached
//! through the traits in `action`, `parallel`, and `repository` -- this
//! crate never depends on a database or automation crate.

pub mod action;
pub mod event;
pub mod parallel;
pub mod queue;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod workflow;
