//! Repository trait definitions.
//!
//! Defines the storage interface for workflow definitions and schedules.
//! Only CRUD + list semantics are required; the storage engine is an
//! external concern. [`memory`] provides `RwLock<HashMap>`-backed
//! implementations used as the default wiring and by tests.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use botfleet_types::error::RepositoryError;
use botfleet_types::schedule::Schedule;
use botfleet_types::workflow::Workflow;
use uuid::Uuid;

pub mod memory;

/// Repository trait for workflow definitions.
///
/// Workflows are immutable once registered for a run; `save` replaces the
/// record wholesale (re-registration).
pub trait WorkflowRepository: Send + Sync {
    /// Upsert a workflow (insert or replace by id).
    fn save(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow by its UUID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List all registered workflows.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete a workflow by id. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

/// Repository trait for schedule records.
///
/// Schedules (including their counters) must survive process restart; the
/// in-memory implementation exists for tests and embedded use.
pub trait ScheduleRepository: Send + Sync {
    /// Upsert a schedule (insert or replace by id).
    fn save(
        &self,
        schedule: &Schedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a schedule by its UUID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Schedule>, RepositoryError>> + Send;

    /// List all schedules.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Schedule>, RepositoryError>> + Send;

    /// Delete a schedule by id. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
