//! Execution dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use warpcron_core::{
    ExecutionClient, ExecutionError, ExecutionRequest, RunningContext, ScheduleIdentity,
    ScheduleSpec, WorkflowClient, WorkloadId,
};
use warpcron_scheduler::FireHandler;

use crate::error::{DispatchError, DispatchResult};

/// Actor recorded on every execution started by a schedule.
pub const CRON_ACTOR: &str = "cron";

/// Outcome of one fire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Ids of executions the runtime created, in stream order.
    pub execution_ids: Vec<String>,
    pub errors: Vec<ExecutionError>,
}

pub struct Dispatcher {
    executions: Arc<dyn ExecutionClient>,
    /// When set, the workflow is looked up before each fire and the fire is
    /// skipped if it has been deleted.
    workflows: Option<Arc<dyn WorkflowClient>>,
}

impl Dispatcher {
    pub fn new(executions: Arc<dyn ExecutionClient>) -> Self {
        Self {
            executions,
            workflows: None,
        }
    }

    pub fn with_workflow_resolution(mut self, workflows: Arc<dyn WorkflowClient>) -> Self {
        self.workflows = Some(workflows);
        self
    }

    /// Build the request for a fire.
    pub fn request_for(
        workload: &WorkloadId,
        identity: &ScheduleIdentity,
        schedule: &ScheduleSpec,
    ) -> ExecutionRequest {
        ExecutionRequest {
            environment_id: workload.environment_id().to_string(),
            organization_id: workload.organization_id().to_string(),
            workflow: workload.name().to_string(),
            config: schedule.config.clone(),
            target: schedule.target.clone(),
            context: RunningContext {
                actor: CRON_ACTOR.to_string(),
                schedule: identity.to_string(),
                cron: schedule.cron.clone(),
            },
        }
    }

    /// Submit one execution and drain its result stream.
    pub async fn dispatch(
        &self,
        workload: &WorkloadId,
        identity: &ScheduleIdentity,
        schedule: &ScheduleSpec,
    ) -> DispatchResult<DispatchReport> {
        if let Some(workflows) = &self.workflows {
            let found = workflows
                .get(workload.environment_id(), workload.name())
                .await
                .map_err(|source| DispatchError::Resolve {
                    workflow: workload.name().to_string(),
                    source,
                })?;
            if found.is_none() {
                return Err(DispatchError::WorkflowGone(workload.name().to_string()));
            }
        }

        let request = Self::request_for(workload, identity, schedule);
        let mut results = self.executions.execute(request).await?;

        let mut report = DispatchReport::default();
        while let Some(result) = results.next().await {
            match result {
                Ok(execution) => {
                    if report.execution_ids.is_empty() {
                        info!(
                            %workload,
                            schedule = %identity,
                            execution = %execution.id,
                            "scheduled execution started"
                        );
                    } else {
                        debug!(%workload, execution = %execution.id, "additional execution started");
                    }
                    report.execution_ids.push(execution.id);
                }
                Err(e) => {
                    error!(%workload, schedule = %identity, error = %e, "scheduled execution failed");
                    report.errors.push(e);
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl FireHandler for Dispatcher {
    async fn fire(&self, workload: &WorkloadId, identity: &ScheduleIdentity, schedule: &ScheduleSpec) {
        match self.dispatch(workload, identity, schedule).await {
            Ok(report) if report.execution_ids.is_empty() && report.errors.is_empty() => {
                warn!(%workload, schedule = %identity, "execution runtime returned no executions");
            }
            Ok(_) => {}
            Err(DispatchError::WorkflowGone(name)) => {
                warn!(workflow = %name, schedule = %identity, "skipping fire for deleted workflow");
            }
            Err(e) => {
                error!(%workload, schedule = %identity, error = %e, "failed to dispatch scheduled execution");
            }
        }
    }
}
