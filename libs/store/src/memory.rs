//! In-memory store implementations, so Use-Case-Layer and Execution-Engine
//! tests don't need a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use conductor_domain::{
    ExecutionId, ExecutionStatus, ExecutionStepResult, WorkflowExecution, WorkflowId,
    WorkflowRevision, WorkflowRevisionId, WorkflowRevisionWithSource, WorkflowSummary,
};

use crate::execution_store::{ExecutionStore, ExecutionStoreError};
use crate::pagination::{Page, Pagination};
use crate::revision_store::{RevisionStore, RevisionStoreError};

#[derive(Default)]
pub struct InMemoryRevisionStore {
    revisions: Mutex<HashMap<WorkflowRevisionId, WorkflowRevisionWithSource>>,
}

impl InMemoryRevisionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn revision_id(revision: &WorkflowRevision) -> WorkflowRevisionId {
        revision.workflow_id.revision(revision.version)
    }
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn save_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
    ) -> Result<(), RevisionStoreError> {
        let id = Self::revision_id(&revision);
        let mut revisions = self.revisions.lock().unwrap();
        if revisions.contains_key(&id) {
            return Err(RevisionStoreError::AlreadyExists(id));
        }
        revisions.insert(id, WorkflowRevisionWithSource { revision, source });
        Ok(())
    }

    async fn update_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), RevisionStoreError> {
        let id = Self::revision_id(&revision);
        let mut revisions = self.revisions.lock().unwrap();
        let existing = revisions
            .get(&id)
            .ok_or_else(|| RevisionStoreError::NotFound(id.clone()))?;
        if existing.revision.updated_at != expected_updated_at {
            return Err(RevisionStoreError::OptimisticLock {
                expected: expected_updated_at,
                actual: existing.revision.updated_at,
            });
        }
        revisions.insert(id, WorkflowRevisionWithSource { revision, source });
        Ok(())
    }

    async fn find_by_id_with_source(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevisionWithSource>, RevisionStoreError> {
        Ok(self.revisions.lock().unwrap().get(id).cloned())
    }

    async fn find_by_id(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevision>, RevisionStoreError> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .get(id)
            .map(|r| r.revision.clone()))
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowRevision>, RevisionStoreError> {
        let revisions = self.revisions.lock().unwrap();
        let mut matching: Vec<WorkflowRevision> = revisions
            .values()
            .filter(|r| &r.revision.workflow_id == workflow_id)
            .map(|r| r.revision.clone())
            .collect();
        matching.sort_by_key(|r| r.version);
        let total = matching.len() as i64;
        let offset = pagination.offset.max(0) as usize;
        let limit = pagination.clamped_limit() as usize;
        let page_items = matching.into_iter().skip(offset).take(limit).collect();
        Ok(Page::new(page_items, total, pagination))
    }

    async fn find_active_revisions(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowRevision>, RevisionStoreError> {
        let mut found: Vec<WorkflowRevision> = self
            .revisions
            .lock()
            .unwrap()
            .values()
            .filter(|r| &r.revision.workflow_id == workflow_id && r.revision.active)
            .map(|r| r.revision.clone())
            .collect();
        found.sort_by_key(|r| r.version);
        Ok(found)
    }

    async fn find_max_version(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<u32>, RevisionStoreError> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .values()
            .filter(|r| &r.revision.workflow_id == workflow_id)
            .map(|r| r.revision.version)
            .max())
    }

    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, RevisionStoreError> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .values()
            .any(|r| &r.revision.workflow_id == workflow_id))
    }

    async fn delete_by_id(&self, id: &WorkflowRevisionId) -> Result<(), RevisionStoreError> {
        self.revisions.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RevisionStoreError> {
        let mut revisions = self.revisions.lock().unwrap();
        let active_deleted = revisions
            .values()
            .any(|r| &r.revision.workflow_id == workflow_id && r.revision.active);
        if active_deleted {
            tracing::warn!(%workflow_id, "deleting all revisions of a workflow with an active revision");
        }
        let before = revisions.len();
        revisions.retain(|id, _| id.workflow_id() != workflow_id);
        Ok((before - revisions.len()) as u64)
    }

    async fn list_workflows(
        &self,
        namespace: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowSummary>, RevisionStoreError> {
        let revisions = self.revisions.lock().unwrap();
        let mut by_workflow: HashMap<WorkflowId, Vec<&WorkflowRevision>> = HashMap::new();
        for r in revisions.values() {
            if namespace.is_some_and(|ns| ns != r.revision.workflow_id.namespace()) {
                continue;
            }
            by_workflow
                .entry(r.revision.workflow_id.clone())
                .or_default()
                .push(&r.revision);
        }
        let mut summaries: Vec<WorkflowSummary> = by_workflow
            .into_iter()
            .map(|(workflow_id, revs)| {
                let mut active_versions: Vec<u32> =
                    revs.iter().filter(|r| r.active).map(|r| r.version).collect();
                active_versions.sort_unstable();
                WorkflowSummary {
                    workflow_id,
                    active_versions,
                    latest_version: revs.iter().map(|r| r.version).max().unwrap_or(0),
                    revision_count: revs.len() as u32,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.workflow_id.to_string().cmp(&b.workflow_id.to_string()));
        let total = summaries.len() as i64;
        let offset = pagination.offset.max(0) as usize;
        let limit = pagination.clamped_limit() as usize;
        let page_items = summaries.into_iter().skip(offset).take(limit).collect();
        Ok(Page::new(page_items, total, pagination))
    }

    async fn activate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError> {
        let mut revisions = self.revisions.lock().unwrap();
        let entry = revisions
            .get_mut(id)
            .ok_or_else(|| RevisionStoreError::NotFound(id.clone()))?;
        if entry.revision.updated_at != expected_updated_at {
            return Err(RevisionStoreError::OptimisticLock {
                expected: expected_updated_at,
                actual: entry.revision.updated_at,
            });
        }
        entry.revision.active = true;
        entry.revision.updated_at = Utc::now();
        entry.source = source;
        Ok(entry.revision.clone())
    }

    async fn deactivate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError> {
        let mut revisions = self.revisions.lock().unwrap();
        let entry = revisions
            .get_mut(id)
            .ok_or_else(|| RevisionStoreError::NotFound(id.clone()))?;
        if entry.revision.updated_at != expected_updated_at {
            return Err(RevisionStoreError::OptimisticLock {
                expected: expected_updated_at,
                actual: entry.revision.updated_at,
            });
        }
        entry.revision.active = false;
        entry.revision.updated_at = Utc::now();
        entry.source = source;
        Ok(entry.revision.clone())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
    step_results: Mutex<HashMap<ExecutionId, Vec<ExecutionStepResult>>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        if executions.contains_key(&execution.id) {
            return Err(ExecutionStoreError::AlreadyExists(execution.id));
        }
        executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn save_step_result(
        &self,
        result: ExecutionStepResult,
    ) -> Result<(), ExecutionStoreError> {
        let mut results = self.step_results.lock().unwrap();
        let existing = results.entry(result.execution_id.clone()).or_default();
        if existing.iter().any(|r| r.step_index == result.step_index) {
            return Err(ExecutionStoreError::AlreadyExists(result.execution_id));
        }
        existing.push(result);
        Ok(())
    }

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        output: Option<Value>,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| ExecutionStoreError::NotFound(id.clone()))?;
        execution.status = status;
        execution.output = output;
        execution.error_message = error_message;
        execution.finished_at = finished_at;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, ExecutionStoreError> {
        Ok(self.executions.lock().unwrap().get(id).cloned())
    }

    async fn find_step_results_by_execution_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Vec<ExecutionStepResult>, ExecutionStoreError> {
        Ok(self
            .step_results
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowExecution>, ExecutionStoreError> {
        let executions = self.executions.lock().unwrap();
        let mut matching: Vec<WorkflowExecution> = executions
            .values()
            .filter(|e| &e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.started_at);
        let total = matching.len() as i64;
        let offset = pagination.offset.max(0) as usize;
        let limit = pagination.clamped_limit() as usize;
        let page_items = matching.into_iter().skip(offset).take(limit).collect();
        Ok(Page::new(page_items, total, pagination))
    }

    async fn count_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, ExecutionStoreError> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| &e.workflow_id == workflow_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::Step;
    use serde_json::json;

    fn sample_revision(workflow_id: WorkflowId, version: u32, active: bool) -> WorkflowRevision {
        WorkflowRevision {
            workflow_id,
            version,
            name: "Test".to_string(),
            description: None,
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            steps: Step::leaf("LogTask", json!({"message": "hi"})),
        }
    }

    #[tokio::test]
    async fn save_then_find_roundtrips() {
        let store = InMemoryRevisionStore::new();
        let wf = WorkflowId::new("ns", "wf").unwrap();
        let rev = sample_revision(wf.clone(), 1, false);
        store
            .save_with_source(rev.clone(), "source".to_string())
            .await
            .unwrap();
        let found = store
            .find_by_id(&wf.revision(1))
            .await
            .unwrap()
            .expect("revision should exist");
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn save_duplicate_version_rejected() {
        let store = InMemoryRevisionStore::new();
        let wf = WorkflowId::new("ns", "wf").unwrap();
        let rev = sample_revision(wf.clone(), 1, false);
        store
            .save_with_source(rev.clone(), "source".to_string())
            .await
            .unwrap();
        let err = store
            .save_with_source(rev, "source".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RevisionStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn activating_two_versions_leaves_both_active() {
        let store = InMemoryRevisionStore::new();
        let wf = WorkflowId::new("ns", "wf").unwrap();
        let rev1 = sample_revision(wf.clone(), 1, false);
        let rev1_updated_at = rev1.updated_at;
        let rev2 = sample_revision(wf.clone(), 2, false);
        let rev2_updated_at = rev2.updated_at;
        store.save_with_source(rev1, "s1".to_string()).await.unwrap();
        store.save_with_source(rev2, "s2".to_string()).await.unwrap();

        store
            .activate_with_source(&wf.revision(1), "s1".to_string(), rev1_updated_at)
            .await
            .unwrap();
        store
            .activate_with_source(&wf.revision(2), "s2".to_string(), rev2_updated_at)
            .await
            .unwrap();

        let active = store.find_active_revisions(&wf).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].version, 1);
        assert_eq!(active[1].version, 2);
    }

    #[tokio::test]
    async fn optimistic_lock_rejects_stale_update() {
        let store = InMemoryRevisionStore::new();
        let wf = WorkflowId::new("ns", "wf").unwrap();
        let rev = sample_revision(wf.clone(), 1, false);
        store.save_with_source(rev.clone(), "s".to_string()).await.unwrap();
        let stale = rev.updated_at - chrono::Duration::seconds(5);
        let err = store
            .update_with_source(rev, "s2".to_string(), stale)
            .await
            .unwrap_err();
        assert!(matches!(err, RevisionStoreError::OptimisticLock { .. }));
    }

    #[tokio::test]
    async fn execution_store_tracks_step_results_in_order() {
        let store = InMemoryExecutionStore::new();
        let wf = WorkflowId::new("ns", "wf").unwrap();
        let exec = WorkflowExecution::new_running(wf, 1, None);
        let id = exec.id.clone();
        store.create_execution(exec).await.unwrap();

        for i in 0..3 {
            store
                .save_step_result(ExecutionStepResult {
                    execution_id: id.clone(),
                    step_index: i,
                    step_id: format!("step-{i}"),
                    status: conductor_domain::StepResultStatus::Completed,
                    input_data: None,
                    output_data: None,
                    error_message: None,
                    error_details: None,
                    started_at: Utc::now(),
                    completed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let results = store.find_step_results_by_execution_id(&id).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].step_index, 2);
    }
}
