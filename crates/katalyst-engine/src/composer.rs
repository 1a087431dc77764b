//! Programmatic multi-step workflow composition
//!
//! A composed workflow is an ordered list of named async steps plus named
//! checkpoints marking positions to resume from. Checkpoints carry only a
//! step index and are not durable by themselves - callers that want
//! restart-safe resumption persist the last passed checkpoint through the
//! operation log and workflow state stores.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type StepBody = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// One named step of a composed workflow
#[derive(Clone)]
pub struct WorkflowStep {
    pub name: String,
    body: StepBody,
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .finish()
    }
}

/// A named resume position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub name: String,
    /// Index of the first step after the checkpoint
    pub step_index: usize,
}

/// Outcome of one executed step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub succeeded: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// `resume_from` named a checkpoint that does not exist; nothing ran
    CheckpointNotFound,
}

/// Aggregate result of executing (or resuming) a composed workflow
#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    pub workflow_name: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Index the run started at (0 for `execute`)
    pub started_at_step: usize,
    pub steps: Vec<StepResult>,
}

/// Builder for composed workflows
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowComposer::new("provision-tenant")
///     .step("create-schema", || async { Ok(()) })
///     .checkpoint("schema-ready")
///     .step("seed-defaults", || async { Ok(()) })
///     .build();
///
/// let result = workflow.execute().await;
/// let resumed = workflow.resume_from("schema-ready").await;
/// ```
pub struct WorkflowComposer {
    name: String,
    steps: Vec<WorkflowStep>,
    checkpoints: Vec<Checkpoint>,
}

impl WorkflowComposer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Append a named step
    pub fn step<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(WorkflowStep {
            name: name.into(),
            body: Arc::new(move || Box::pin(body())),
        });
        self
    }

    /// Mark the current position as a named resume point
    ///
    /// The checkpoint refers to the next step added after it; resuming from
    /// it skips everything before.
    pub fn checkpoint(mut self, name: impl Into<String>) -> Self {
        self.checkpoints.push(Checkpoint {
            name: name.into(),
            step_index: self.steps.len(),
        });
        self
    }

    pub fn build(self) -> ComposedWorkflow {
        ComposedWorkflow {
            name: self.name,
            id: Uuid::new_v4().to_string(),
            steps: self.steps,
            checkpoints: self.checkpoints,
        }
    }
}

/// A built workflow ready to execute or resume
pub struct ComposedWorkflow {
    pub name: String,
    pub id: String,
    steps: Vec<WorkflowStep>,
    checkpoints: Vec<Checkpoint>,
}

impl ComposedWorkflow {
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Run all steps from the beginning
    #[instrument(skip(self), fields(workflow = %self.name))]
    pub async fn execute(&self) -> WorkflowRunResult {
        self.run_from(0).await
    }

    /// Resume at a named checkpoint
    #[instrument(skip(self), fields(workflow = %self.name))]
    pub async fn resume_from(&self, checkpoint_name: &str) -> WorkflowRunResult {
        let Some(checkpoint) = self
            .checkpoints
            .iter()
            .find(|c| c.name == checkpoint_name)
        else {
            warn!(checkpoint = checkpoint_name, "checkpoint not found");
            return WorkflowRunResult {
                workflow_name: self.name.clone(),
                workflow_id: self.id.clone(),
                status: RunStatus::CheckpointNotFound,
                started_at_step: 0,
                steps: Vec::new(),
            };
        };

        info!(
            checkpoint = checkpoint_name,
            step_index = checkpoint.step_index,
            "resuming from checkpoint"
        );
        self.run_from(checkpoint.step_index).await
    }

    async fn run_from(&self, start_index: usize) -> WorkflowRunResult {
        let mut results = Vec::new();

        for step in &self.steps[start_index.min(self.steps.len())..] {
            let started = Instant::now();
            let outcome = (step.body)().await;
            let duration = started.elapsed();

            match outcome {
                Ok(()) => {
                    debug!(step = %step.name, ?duration, "step completed");
                    results.push(StepResult {
                        name: step.name.clone(),
                        succeeded: true,
                        duration,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(step = %step.name, "step failed: {err}");
                    results.push(StepResult {
                        name: step.name.clone(),
                        succeeded: false,
                        duration,
                        error: Some(err.to_string()),
                    });
                    return WorkflowRunResult {
                        workflow_name: self.name.clone(),
                        workflow_id: self.id.clone(),
                        status: RunStatus::Failed,
                        started_at_step: start_index,
                        steps: results,
                    };
                }
            }
        }

        WorkflowRunResult {
            workflow_name: self.name.clone(),
            workflow_id: self.id.clone(),
            status: RunStatus::Succeeded,
            started_at_step: start_index,
            steps: results,
        }
    }
}
