//! Hook pipeline around subgraph calls.
//!
//! Hooks observe and rewrite outgoing subgraph requests, can swap the
//! executor itself, and can register a continuation that runs over the
//! call's response. They are registered once on the runtime and wrap
//! every executor the dispatcher constructs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use graft_composition::TransportEntry;
use parking_lot::Mutex;

use crate::error::FetchError;
use crate::graphql::Response;
use crate::transport::ExecutionRequest;
use crate::transport::Executor;
use crate::BoxError;

/// What a hook sees for one subgraph call.
pub struct SubgraphExecutePayload<'a> {
    /// The subgraph this call targets.
    pub subgraph_name: &'a str,
    /// The transport entry the executor was built from.
    pub transport: Option<&'a TransportEntry>,
    /// The outgoing request; hooks may rewrite it in place.
    pub request: &'a mut ExecutionRequest,
    executor: &'a mut Arc<dyn Executor>,
}

impl SubgraphExecutePayload<'_> {
    /// The executor that will run this call unless replaced.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        self.executor
    }

    /// Replaces the executor, for this call and every call after it.
    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        *self.executor = executor;
    }
}

/// Observes every subgraph call made by the dispatcher.
#[async_trait]
pub trait SubgraphExecuteHook: Send + Sync {
    /// Runs before the subgraph call goes out.
    ///
    /// Returning a [`DoneHook`] registers a continuation invoked with the
    /// call's response, in hook registration order. Returning an error
    /// aborts the call; continuations registered by earlier hooks are not
    /// invoked.
    async fn on_subgraph_execute(
        &self,
        payload: &mut SubgraphExecutePayload<'_>,
    ) -> Result<Option<Box<dyn DoneHook>>, BoxError>;
}

/// Continuation over a finished subgraph call.
#[async_trait]
pub trait DoneHook: Send + Sync {
    async fn on_done(&self, response: &mut Response) -> Result<(), BoxError>;
}

/// An [`Executor`] running the hook pipeline around an inner executor.
///
/// An executor swapped in through [`SubgraphExecutePayload::set_executor`]
/// persists, so later calls to the same subgraph skip the replaced one.
pub(crate) struct HookedExecutor {
    subgraph: String,
    transport: Option<TransportEntry>,
    inner: Mutex<Arc<dyn Executor>>,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
}

impl HookedExecutor {
    /// Wraps `inner` unless there is nothing to run.
    pub(crate) fn wrap(
        subgraph: String,
        transport: Option<TransportEntry>,
        inner: Arc<dyn Executor>,
        hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    ) -> Arc<dyn Executor> {
        if hooks.is_empty() {
            return inner;
        }
        Arc::new(HookedExecutor {
            subgraph,
            transport,
            inner: Mutex::new(inner),
            hooks,
        })
    }

    fn hook_error(&self, error: BoxError) -> FetchError {
        FetchError::HookError {
            subgraph: self.subgraph.clone(),
            reason: error.to_string(),
        }
    }
}

impl Executor for HookedExecutor {
    fn execute(&self, mut request: ExecutionRequest) -> BoxFuture<'_, Result<Response, FetchError>> {
        Box::pin(async move {
            let mut executor = self.inner.lock().clone();
            let original = executor.clone();
            let mut continuations = Vec::new();
            for hook in self.hooks.iter() {
                let mut payload = SubgraphExecutePayload {
                    subgraph_name: &self.subgraph,
                    transport: self.transport.as_ref(),
                    request: &mut request,
                    executor: &mut executor,
                };
                match hook.on_subgraph_execute(&mut payload).await {
                    Ok(Some(done)) => continuations.push(done),
                    Ok(None) => {}
                    Err(error) => return Err(self.hook_error(error)),
                }
            }
            if !Arc::ptr_eq(&executor, &original) {
                *self.inner.lock() = executor.clone();
            }
            let mut response = executor.execute(request).await?;
            for done in continuations {
                done.on_done(&mut response)
                    .await
                    .map_err(|error| self.hook_error(error))?;
            }
            Ok(response)
        })
    }
}
