//! Serving state and hot reload.
//!
//! A [`GatewayRuntime`] owns the currently loaded supergraph together with
//! everything derived from it: the plan cache and the dispatcher with its
//! executor cache. All of that lives in one immutable state value behind an
//! `Arc`, so a reload builds a complete fresh state and swaps the pointer.
//! In-flight executions keep the state they started with, and both caches
//! are invalidated by the same swap.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use futures::Future;
use graft_composition::transport::subgraph_transport_map;
use graft_composition::BoxError;
use graft_composition::Supergraph;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cache::PlanCache;
use crate::error::RuntimeError;
use crate::execute::Dispatcher;
use crate::execute::ExecutionParams;
use crate::graphql;
use crate::hooks::SubgraphExecuteHook;
use crate::plan::plan_operation;
use crate::transport::TransportRegistry;

/// Everything derived from one loaded supergraph. Immutable once built;
/// executions pin it with an `Arc` for as long as they run.
struct SupergraphState {
    schema: Valid<Schema>,
    sdl: String,
    plans: PlanCache,
    dispatcher: Dispatcher,
}

/// Construction-time wiring for a [`GatewayRuntime`].
#[derive(Default)]
pub struct RuntimeOptions {
    /// Transport factories keyed by the `kind` they serve. The default
    /// registry ships the built-in `http` transport.
    pub transports: TransportRegistry,
    /// Hooks wrapped, in registration order, around every subgraph
    /// executor.
    pub hooks: Vec<Arc<dyn SubgraphExecuteHook>>,
}

/// Executes client operations against the currently loaded supergraph and
/// hot-swaps that supergraph without dropping traffic.
pub struct GatewayRuntime {
    state: RwLock<Arc<SupergraphState>>,
    registry: Arc<TransportRegistry>,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    force_reload: AtomicBool,
}

impl GatewayRuntime {
    /// Builds a runtime serving `supergraph`.
    pub fn new(supergraph: &Supergraph, options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let registry = Arc::new(options.transports);
        let hooks: Arc<[Arc<dyn SubgraphExecuteHook>]> = options.hooks.into();
        let state = build_state(
            supergraph.schema.clone(),
            supergraph.to_sdl(),
            &registry,
            &hooks,
        )?;
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            registry,
            hooks,
            force_reload: AtomicBool::new(false),
        })
    }

    /// The SDL of the currently loaded supergraph.
    pub fn supergraph_sdl(&self) -> String {
        self.state.read().sdl.clone()
    }

    /// Plan cache hits against the currently loaded supergraph. The
    /// counter starts over when a reload swaps the cache out.
    pub fn plan_cache_hits(&self) -> u64 {
        self.state.read().plans.hits()
    }

    /// Plan cache misses against the currently loaded supergraph.
    pub fn plan_cache_misses(&self) -> u64 {
        self.state.read().plans.misses()
    }

    /// Executes one client operation.
    pub async fn execute(&self, request: graphql::Request) -> graphql::Response {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Executes one client operation, abandoning outstanding subgraph
    /// calls when `cancellation` fires.
    ///
    /// The supergraph state is pinned on entry, so a reload landing while
    /// this request is in flight does not affect it.
    pub async fn execute_with_cancellation(
        &self,
        request: graphql::Request,
        cancellation: CancellationToken,
    ) -> graphql::Response {
        let state = self.state.read().clone();
        let query = match request.query.as_deref() {
            Some(query) if !query.trim().is_empty() => query,
            _ => {
                return graphql::Response::builder()
                    .error(
                        graphql::Error::builder()
                            .message("Must provide query string.")
                            .extension_code("MISSING_QUERY_STRING")
                            .build(),
                    )
                    .build()
            }
        };
        let document = match ExecutableDocument::parse_and_validate(
            &state.schema,
            query,
            "operation.graphql",
        ) {
            Ok(document) => document,
            Err(invalid) => {
                return graphql::Response::builder()
                    .errors(validation_errors(&invalid.errors))
                    .build()
            }
        };
        let operation_name = request.operation_name.as_deref();
        let plan = match state.plans.get_or_plan(query, operation_name, || {
            plan_operation(&state.schema, &document, operation_name)
        }) {
            Ok(plan) => plan,
            Err(error) => return error.to_response(),
        };
        state
            .dispatcher
            .dispatch(
                &plan,
                ExecutionParams {
                    variables: request.variables,
                    cancellation,
                },
            )
            .await
    }

    /// Replaces the served supergraph with `sdl`.
    ///
    /// The new state becomes visible only once fully built; on any failure
    /// the old supergraph keeps serving.
    pub fn reload(&self, sdl: &str) -> Result<(), RuntimeError> {
        let supergraph =
            Supergraph::parse(sdl).map_err(|error| RuntimeError::InvalidSupergraph {
                message: error.to_string(),
            })?;
        let state = build_state(
            supergraph.schema,
            sdl.to_string(),
            &self.registry,
            &self.hooks,
        )?;
        *self.state.write() = Arc::new(state);
        tracing::info!("reloaded supergraph");
        Ok(())
    }

    /// Forces the next poll tick to reload even if the fetched SDL is
    /// unchanged.
    pub fn invalidate(&self) {
        self.force_reload.store(true, Ordering::SeqCst);
    }

    /// Spawns a task that re-fetches the supergraph SDL from `source`
    /// every `interval` and reloads when the text changes.
    ///
    /// Fetch and parse failures are logged and retried on the next tick;
    /// the current supergraph keeps serving throughout. The returned
    /// handle aborts the task when dropped.
    pub fn poll<S, F>(self: Arc<Self>, interval: Duration, source: S) -> PollHandle
    where
        S: Fn() -> F + Send + 'static,
        F: Future<Output = Result<String, BoxError>> + Send + 'static,
    {
        let runtime = self;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick of a tokio interval resolves immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sdl = match source().await {
                    Ok(sdl) => sdl,
                    Err(error) => {
                        tracing::warn!(%error, "supergraph poll failed");
                        continue;
                    }
                };
                let changed = runtime.state.read().sdl != sdl;
                let forced = runtime.force_reload.swap(false, Ordering::SeqCst);
                if !changed && !forced {
                    continue;
                }
                if let Err(error) = runtime.reload(&sdl) {
                    tracing::warn!(%error, "polled supergraph failed to load");
                }
            }
        });
        PollHandle { handle }
    }
}

fn build_state(
    schema: Valid<Schema>,
    sdl: String,
    registry: &Arc<TransportRegistry>,
    hooks: &Arc<[Arc<dyn SubgraphExecuteHook>]>,
) -> Result<SupergraphState, RuntimeError> {
    let transports = subgraph_transport_map(&schema)?;
    Ok(SupergraphState {
        dispatcher: Dispatcher::new(transports, registry.clone(), hooks.clone()),
        plans: PlanCache::new(),
        schema,
        sdl,
    })
}

fn validation_errors(errors: &DiagnosticList) -> Vec<graphql::Error> {
    errors
        .iter()
        .map(|diagnostic| {
            let diagnostic = diagnostic.unstable_to_json_compat();
            graphql::Error::builder()
                .message(diagnostic.message)
                .locations(
                    diagnostic
                        .locations
                        .iter()
                        .map(|location| graphql::Location {
                            line: location.line as u32,
                            column: location.column as u32,
                        })
                        .collect::<Vec<_>>(),
                )
                .extension_code("GRAPHQL_VALIDATION_FAILED")
                .build()
        })
        .collect()
}

/// Aborts the polling task when dropped.
pub struct PollHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl PollHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
