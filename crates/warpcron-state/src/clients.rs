//! Engine client contracts implemented over the local store.

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::info;

use warpcron_core::{
    ClientResult, EventKind, ExecutionClient, ExecutionError, ExecutionRequest, ExecutionResult,
    ExecutionStream, Template, TemplateClient, WatchError, WatchEvent, WatchStream, Workflow,
    WorkflowClient,
};

use crate::store::StateStore;
use crate::types::{Change, ExecutionRecord, ExecutionStatus, FeedEvent, epoch_millis};

impl StateStore {
    /// Initial data (as `Create` events) followed by live changes picked out
    /// of the feed by `select`.
    ///
    /// The feed is subscribed before the initial listing so no change is
    /// lost in between; a change in that window may be delivered twice.
    fn watch_stream<R, L, S>(
        &self,
        environment_id: &str,
        include_initial: bool,
        list: L,
        select: S,
    ) -> ClientResult<WatchStream<R>>
    where
        R: Send + 'static,
        L: FnOnce(&StateStore, &str) -> crate::StateResult<Vec<R>>,
        S: Fn(Change) -> Option<WatchEvent<R>> + Send + 'static,
    {
        let feed = BroadcastStream::new(self.subscribe());

        let initial: Vec<Result<WatchEvent<R>, WatchError>> = if include_initial {
            let now = epoch_millis();
            list(self, environment_id)?
                .into_iter()
                .map(|resource| Ok(WatchEvent::new(EventKind::Create, now, resource)))
                .collect()
        } else {
            Vec::new()
        };

        let environment_id = environment_id.to_string();
        let changes = feed.filter_map(move |item| {
            future::ready(match item {
                Ok(FeedEvent {
                    environment_id: env,
                    change,
                }) if env == environment_id => select(change).map(Ok),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    Some(Err(WatchError::Lagged(missed)))
                }
            })
        });

        Ok(stream::iter(initial).chain(changes).boxed())
    }
}

#[async_trait]
impl WorkflowClient for StateStore {
    async fn watch(
        &self,
        environment_id: &str,
        include_initial: bool,
    ) -> ClientResult<WatchStream<Workflow>> {
        self.watch_stream(
            environment_id,
            include_initial,
            |store, env| store.list_workflows(env),
            |change| match change {
                Change::Workflow(event) => Some(event),
                Change::Template(_) => None,
            },
        )
    }

    async fn list(&self, environment_id: &str) -> ClientResult<Vec<Workflow>> {
        Ok(self.list_workflows(environment_id)?)
    }

    async fn get(&self, environment_id: &str, name: &str) -> ClientResult<Option<Workflow>> {
        Ok(self.get_workflow(environment_id, name)?)
    }
}

#[async_trait]
impl TemplateClient for StateStore {
    async fn watch(
        &self,
        environment_id: &str,
        include_initial: bool,
    ) -> ClientResult<WatchStream<Template>> {
        self.watch_stream(
            environment_id,
            include_initial,
            |store, env| store.list_templates(env),
            |change| match change {
                Change::Template(event) => Some(event),
                Change::Workflow(_) => None,
            },
        )
    }

    async fn get(
        &self,
        environment_id: &str,
        internal_name: &str,
    ) -> ClientResult<Option<Template>> {
        Ok(self.get_template(environment_id, internal_name)?)
    }
}

#[async_trait]
impl ExecutionClient for StateStore {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionStream, ExecutionError> {
        let exists = self
            .get_workflow(&request.environment_id, &request.workflow)
            .map_err(|e| ExecutionError::Runtime(e.to_string()))?
            .is_some();
        if !exists {
            let missing: Result<ExecutionResult, ExecutionError> =
                Err(ExecutionError::WorkflowNotFound(request.workflow));
            return Ok(stream::iter([missing]).boxed());
        }

        let record = ExecutionRecord {
            id: self.next_execution_id(),
            environment_id: request.environment_id,
            organization_id: request.organization_id,
            workflow: request.workflow,
            config: request.config,
            target: request.target,
            context: request.context,
            status: ExecutionStatus::Queued,
            created_at: epoch_millis(),
        };
        self.put_execution(&record)
            .map_err(|e| ExecutionError::Runtime(e.to_string()))?;
        info!(
            execution = %record.id,
            workflow = %record.workflow,
            actor = %record.context.actor,
            "execution queued"
        );

        let result = ExecutionResult {
            id: record.id,
            workflow: record.workflow,
        };
        Ok(stream::iter([Ok(result)]).boxed())
    }
}
