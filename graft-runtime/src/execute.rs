//! Plan execution.
//!
//! The dispatcher owns a lazily filled executor cache, one entry per
//! subgraph, and walks an [`OperationPlan`]: root steps fan out (queries)
//! or run in order (mutations), merge steps fetch entity patches against
//! the values their parent step produced, and the assembled object is
//! trimmed to the client's selection shape at the end.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use graft_composition::ResolverKind;
use graft_composition::TransportEntry;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::graphql;
use crate::hooks::HookedExecutor;
use crate::hooks::SubgraphExecuteHook;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::plan::FetchStep;
use crate::plan::MergeStep;
use crate::plan::OperationKind;
use crate::plan::OperationPlan;
use crate::plan::ProjectionNode;
use crate::transport::ExecutionRequest;
use crate::transport::Executor;
use crate::transport::TransportRegistry;

/// Executes operation plans against the subgraphs of one supergraph.
pub(crate) struct Dispatcher {
    transports: IndexMap<String, TransportEntry>,
    registry: Arc<TransportRegistry>,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    executors: DashMap<String, Arc<dyn Executor>>,
}

/// Per-dispatch inputs that are not part of the memoized plan: the client
/// variables and the caller's cancellation signal.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExecutionParams {
    pub(crate) variables: Object,
    pub(crate) cancellation: CancellationToken,
}

/// What one root step produced: the value for its response key plus any
/// errors gathered along the way.
struct StepOutcome {
    value: Value,
    errors: Vec<graphql::Error>,
}

/// Entity patches fetched by one merge step, keyed by the entity's path
/// relative to the parent value.
#[derive(Default)]
struct StepPatches {
    patches: Vec<(Path, Value)>,
    errors: Vec<graphql::Error>,
}

impl Dispatcher {
    pub(crate) fn new(
        transports: IndexMap<String, TransportEntry>,
        registry: Arc<TransportRegistry>,
        hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    ) -> Self {
        Self {
            transports,
            registry,
            hooks,
            executors: DashMap::new(),
        }
    }

    /// Returns the cached executor for `subgraph`, constructing and
    /// hook-wrapping it on first use.
    async fn executor(&self, subgraph: &str) -> Result<Arc<dyn Executor>, FetchError> {
        if let Some(executor) = self.executors.get(subgraph) {
            return Ok(executor.clone());
        }
        let entry =
            self.transports
                .get(subgraph)
                .ok_or_else(|| FetchError::MissingTransport {
                    subgraph: subgraph.to_string(),
                })?;
        let factory =
            self.registry
                .get(&entry.kind)
                .ok_or_else(|| FetchError::UnknownTransport {
                    kind: entry.kind.clone(),
                    subgraph: subgraph.to_string(),
                })?;
        let executor = factory.make_executor(entry).await?;
        let executor = HookedExecutor::wrap(
            subgraph.to_string(),
            Some(entry.clone()),
            executor,
            self.hooks.clone(),
        );
        tracing::info!(subgraph, transport = %entry.kind, "constructed subgraph executor");
        // two tasks racing on first use may both construct; both executors
        // work and the cache keeps whichever finished last
        self.executors.insert(subgraph.to_string(), executor.clone());
        Ok(executor)
    }

    pub(crate) async fn dispatch(
        &self,
        plan: &OperationPlan,
        params: ExecutionParams,
    ) -> graphql::Response {
        let ExecutionParams {
            variables,
            cancellation,
        } = params;
        let variables = &variables;
        let mut data = Object::default();
        let mut errors = Vec::new();
        match plan.operation_kind {
            OperationKind::Mutation => {
                for step in &plan.root_steps {
                    let outcome = self.execute_root_step(step, variables, &cancellation).await;
                    errors.extend(outcome.errors);
                    insert_root(&mut data, &step.response_key, outcome.value);
                }
            }
            _ => {
                let outcomes = join_all(
                    plan.root_steps
                        .iter()
                        .map(|step| self.execute_root_step(step, variables, &cancellation)),
                )
                .await;
                for (step, outcome) in plan.root_steps.iter().zip(outcomes) {
                    errors.extend(outcome.errors);
                    insert_root(&mut data, &step.response_key, outcome.value);
                }
            }
        }
        let data = Value::Object(project_object(
            &plan.projection,
            &Value::Object(data),
            variables,
        ));
        graphql::Response::builder().data(data).errors(errors).build()
    }

    async fn execute_root_step(
        &self,
        step: &FetchStep,
        variables: &Object,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        let root_path = Path(vec![PathElement::Key(step.response_key.clone())]);
        if cancellation.is_cancelled() {
            return StepOutcome {
                value: Value::Null,
                errors: vec![FetchError::ExecutionCancelled.to_graphql_error(Some(root_path))],
            };
        }
        let executor = match self.executor(&step.subgraph).await {
            Ok(executor) => executor,
            Err(error) => {
                return StepOutcome {
                    value: Value::Null,
                    errors: vec![error.to_graphql_error(Some(root_path))],
                }
            }
        };
        let mut subgraph_variables = step.bindings.clone();
        for name in &step.variable_names {
            if let Some(value) = variables.get(name.as_str()) {
                subgraph_variables.insert(name.as_str(), value.clone());
            }
        }
        let request = ExecutionRequest::builder()
            .document(step.document.clone())
            .and_operation_name(step.operation_name.clone())
            .variables(subgraph_variables)
            .cancellation(cancellation.clone())
            .build();
        match executor.execute(request).await {
            Ok(mut response) => {
                // the document aliased everything back to the client's
                // response keys, so subgraph error paths pass through
                let mut errors = std::mem::take(&mut response.errors);
                let mut value = match response.data.take() {
                    Some(Value::Object(mut object)) => object
                        .remove(step.response_key.as_str())
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                if !step.dependents.is_empty() && !value.is_null() {
                    self.execute_dependents(
                        &step.dependents,
                        &mut value,
                        variables,
                        cancellation,
                        &root_path,
                        &mut errors,
                    )
                    .await;
                }
                StepOutcome { value, errors }
            }
            Err(error) => StepOutcome {
                value: Value::Null,
                errors: vec![error.to_graphql_error(Some(root_path))],
            },
        }
    }

    /// Fetches all merge-step patches against the parent value as it
    /// stands, then applies them in step order.
    async fn execute_dependents(
        &self,
        steps: &[MergeStep],
        parent: &mut Value,
        variables: &Object,
        cancellation: &CancellationToken,
        base_path: &Path,
        errors: &mut Vec<graphql::Error>,
    ) {
        let outcomes = join_all(steps.iter().map(|step| {
            self.fetch_step_patches(step, &*parent, variables, cancellation, base_path)
        }))
        .await;
        for outcome in outcomes {
            errors.extend(outcome.errors);
            for (entity_path, patch) in outcome.patches {
                if let Some(target) = parent.get_path_mut(&entity_path) {
                    target.deep_merge(patch);
                }
            }
        }
    }

    async fn fetch_step_patches(
        &self,
        step: &MergeStep,
        parent: &Value,
        variables: &Object,
        cancellation: &CancellationToken,
        base_path: &Path,
    ) -> StepPatches {
        let mut out = StepPatches::default();
        // entities lacking their key value are skipped, not failed
        let mut positions: Vec<(Path, Value)> = Vec::new();
        parent.select_values_and_paths(&step.path, &mut |path, value| {
            match value.get(step.select.as_str()) {
                Some(key) if !key.is_null() => positions.push((path.clone(), key.clone())),
                _ => {}
            }
        });
        if positions.is_empty() {
            return out;
        }
        let executor = match self.executor(&step.subgraph).await {
            Ok(executor) => executor,
            Err(error) => {
                out.errors
                    .push(error.to_graphql_error(Some(base_path.join(&step.path))));
                return out;
            }
        };
        let mut forwarded = Object::default();
        for name in &step.variable_names {
            if let Some(value) = variables.get(name.as_str()) {
                forwarded.insert(name.as_str(), value.clone());
            }
        }
        match step.kind {
            ResolverKind::Fetch => {
                self.fetch_each_entity(
                    step,
                    &positions,
                    executor,
                    forwarded,
                    variables,
                    cancellation,
                    base_path,
                    &mut out,
                )
                .await;
            }
            ResolverKind::Batch => {
                self.fetch_entity_batch(
                    step,
                    &positions,
                    executor,
                    forwarded,
                    variables,
                    cancellation,
                    base_path,
                    &mut out,
                )
                .await;
            }
        }
        out
    }

    /// `FETCH`: one resolver call per entity, in parallel.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_each_entity(
        &self,
        step: &MergeStep,
        positions: &[(Path, Value)],
        executor: Arc<dyn Executor>,
        forwarded: Object,
        variables: &Object,
        cancellation: &CancellationToken,
        base_path: &Path,
        out: &mut StepPatches,
    ) {
        let calls = positions.iter().map(|(_, key)| {
            let mut subgraph_variables = forwarded.clone();
            subgraph_variables.insert(step.variable_name.as_str(), key.clone());
            let request = ExecutionRequest::builder()
                .document(step.document.clone())
                .and_operation_name(step.operation_name.clone())
                .variables(subgraph_variables)
                .cancellation(cancellation.clone())
                .build();
            let executor = executor.clone();
            async move { executor.execute(request).await }
        });
        let results = join_all(calls).await;
        for ((entity_path, _), result) in positions.iter().zip(results) {
            let landing = landing_prefix(step, base_path, entity_path);
            match result {
                Ok(mut response) => {
                    remap_merge_errors(&mut response.errors, &landing);
                    out.errors.extend(response.errors);
                    let fragment = resolver_root_value(response.data.take());
                    let patch = self
                        .assemble_patch(step, fragment, variables, cancellation, &landing, out)
                        .await;
                    out.patches.push((entity_path.clone(), patch));
                }
                Err(error) => {
                    out.errors.push(error.to_graphql_error(Some(landing)));
                }
            }
        }
    }

    /// `BATCH`: one resolver call carrying every entity key, whose list
    /// result maps back onto the entities by position.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_entity_batch(
        &self,
        step: &MergeStep,
        positions: &[(Path, Value)],
        executor: Arc<dyn Executor>,
        forwarded: Object,
        variables: &Object,
        cancellation: &CancellationToken,
        base_path: &Path,
        out: &mut StepPatches,
    ) {
        let keys: Vec<Value> = positions.iter().map(|(_, key)| key.clone()).collect();
        let mut subgraph_variables = forwarded;
        subgraph_variables.insert(step.variable_name.as_str(), Value::Array(keys));
        let request = ExecutionRequest::builder()
            .document(step.document.clone())
            .and_operation_name(step.operation_name.clone())
            .variables(subgraph_variables)
            .cancellation(cancellation.clone())
            .build();
        let step_path = base_path.join(&step.path);
        match executor.execute(request).await {
            Ok(mut response) => {
                remap_batch_errors(&mut response.errors, step, positions, base_path);
                out.errors.extend(response.errors);
                match resolver_root_value(response.data.take()) {
                    Value::Array(items) => {
                        if items.len() != positions.len() {
                            out.errors.push(
                                FetchError::SubrequestBatchingError {
                                    service: step.subgraph.clone(),
                                    reason: format!(
                                        "expected {} entities, got {}",
                                        positions.len(),
                                        items.len()
                                    ),
                                }
                                .to_graphql_error(Some(step_path)),
                            );
                            return;
                        }
                        for ((entity_path, _), item) in positions.iter().zip(items) {
                            let landing = landing_prefix(step, base_path, entity_path);
                            let patch = self
                                .assemble_patch(step, item, variables, cancellation, &landing, out)
                                .await;
                            out.patches.push((entity_path.clone(), patch));
                        }
                    }
                    other => {
                        out.errors.push(
                            FetchError::SubrequestBatchingError {
                                service: step.subgraph.clone(),
                                reason: format!(
                                    "expected a list of {} entities, got {}",
                                    positions.len(),
                                    json_kind(&other)
                                ),
                            }
                            .to_graphql_error(Some(step_path)),
                        );
                    }
                }
            }
            Err(error) => {
                out.errors.push(error.to_graphql_error(Some(step_path)));
            }
        }
    }

    /// Shapes a fetched fragment like the entity it patches and runs the
    /// step's own dependents against it.
    async fn assemble_patch(
        &self,
        step: &MergeStep,
        fragment: Value,
        variables: &Object,
        cancellation: &CancellationToken,
        landing: &Path,
        out: &mut StepPatches,
    ) -> Value {
        let mut patch = match &step.field {
            Some(key) => {
                let mut object = Object::default();
                object.insert(key.as_str(), fragment);
                Value::Object(object)
            }
            None => fragment,
        };
        if !step.dependents.is_empty() && !patch.is_null() {
            let entity_base = match &step.field {
                // dependent paths start at the entity, one key above
                Some(_) => {
                    let mut base = landing.clone();
                    base.pop();
                    base
                }
                None => landing.clone(),
            };
            Box::pin(self.execute_dependents(
                &step.dependents,
                &mut patch,
                variables,
                cancellation,
                &entity_base,
                &mut out.errors,
            ))
            .await;
        }
        patch
    }
}

/// The absolute client path a merge step's value lands at.
fn landing_prefix(step: &MergeStep, base_path: &Path, entity_path: &Path) -> Path {
    let mut landing = base_path.join(entity_path);
    if let Some(key) = &step.field {
        landing.push(PathElement::Key(key.clone()));
    }
    landing
}

/// Unwraps a subgraph response's single root value.
///
/// Resolver documents select exactly one root field, so the data object
/// holds exactly one entry.
fn resolver_root_value(data: Option<Value>) -> Value {
    match data {
        Some(Value::Object(object)) => object
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Rebases subgraph error paths from the resolver's root field onto the
/// entity's position in the client response.
fn remap_merge_errors(errors: &mut [graphql::Error], landing: &Path) {
    for error in errors {
        let rebased = match &error.path {
            Some(path) if !path.is_empty() => {
                landing.iter().chain(path.iter().skip(1)).cloned().collect()
            }
            _ => landing.clone(),
        };
        error.path = Some(rebased);
    }
}

/// Rebases batch error paths: the index under the resolver's root field
/// names the entity whose fetch the error belongs to.
fn remap_batch_errors(
    errors: &mut [graphql::Error],
    step: &MergeStep,
    positions: &[(Path, Value)],
    base_path: &Path,
) {
    for error in errors {
        let position = match error.path.as_ref().map(|path| &path.0[..]) {
            Some([_, PathElement::Index(index), ..]) => positions.get(*index),
            _ => None,
        };
        let rebased = match position {
            Some((entity_path, _)) => {
                let landing = landing_prefix(step, base_path, entity_path);
                let rest = error
                    .path
                    .iter()
                    .flat_map(|path| path.iter().skip(2))
                    .cloned();
                landing.iter().cloned().chain(rest).collect()
            }
            None => base_path.join(&step.path),
        };
        error.path = Some(rebased);
    }
}

fn insert_root(data: &mut Object, key: &str, value: Value) {
    match data.get_mut(key) {
        Some(existing) => existing.deep_merge(value),
        None => {
            data.insert(key.to_string(), value);
        }
    }
}

/// Trims a fetched object to the client's selection, in selection order.
fn project_object(nodes: &[ProjectionNode], source: &Value, variables: &Object) -> Object {
    let mut out = Object::default();
    for node in nodes {
        if node
            .conditions
            .iter()
            .any(|condition| condition.should_skip(variables))
        {
            continue;
        }
        let key = node.response_key.as_str();
        let value = match &node.constant {
            Some(constant) => Some(Value::from(constant.as_str())),
            None => match source.get(key) {
                // a fragment that did not apply leaves no key at all
                None if node.from_fragment => None,
                None => Some(Value::Null),
                Some(value) => Some(project_child(node, value, variables)),
            },
        };
        if let Some(value) = value {
            match out.get_mut(key) {
                Some(existing) => existing.deep_merge(value),
                None => {
                    out.insert(key.to_string(), value);
                }
            }
        }
    }
    out
}

fn project_child(node: &ProjectionNode, value: &Value, variables: &Object) -> Value {
    match &node.children {
        None => value.clone(),
        Some(children) => project_selected(children, value, variables),
    }
}

fn project_selected(children: &[ProjectionNode], value: &Value, variables: &Object) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project_selected(children, item, variables))
                .collect(),
        ),
        Value::Object(_) => Value::Object(project_object(children, value, variables)),
        other => other.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
