//! In-memory repository implementations.
//!
//! `RwLock<HashMap>`-backed stores satisfying the repository traits. Used
//! by tests and as the default wiring when no persistent backend is
//! configured.

use std::collections::HashMap;

use botfleet_types::error::RepositoryError;
use botfleet_types::schedule::Schedule;
use botfleet_types::workflow::Workflow;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ScheduleRepository, WorkflowRepository};

// ---------------------------------------------------------------------------
// InMemoryWorkflowRepository
// ---------------------------------------------------------------------------

/// Workflow store backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<Workflow> = workflows.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut workflows = self.workflows.write().await;
        Ok(workflows.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// InMemoryScheduleRepository
// ---------------------------------------------------------------------------

/// Schedule store backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<Uuid, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleRepository for InMemoryScheduleRepository {
    async fn save(&self, schedule: &Schedule) -> Result<(), RepositoryError> {
        let mut schedules = self.schedules.write().await;
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Schedule>, RepositoryError> {
        let schedules = self.schedules.read().await;
        Ok(schedules.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Schedule>, RepositoryError> {
        let schedules = self.schedules.read().await;
        let mut all: Vec<Schedule> = schedules.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut schedules = self.schedules.write().await;
        Ok(schedules.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
