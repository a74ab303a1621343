//! End-to-end execution: subgraphs are composed with `graft-composition`,
//! served by a [`GatewayRuntime`], and reached over an in-process
//! transport that records every call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use graft_composition::compose_subgraphs;
use graft_composition::CompositionOptions;
use graft_composition::Subgraph;
use graft_composition::Supergraph;
use graft_runtime::graphql;
use graft_runtime::BoxError;
use graft_runtime::DoneHook;
use graft_runtime::ExecutionRequest;
use graft_runtime::Executor;
use graft_runtime::FetchError;
use graft_runtime::GatewayRuntime;
use graft_runtime::RuntimeOptions;
use graft_runtime::SubgraphExecuteHook;
use graft_runtime::SubgraphExecutePayload;
use graft_runtime::TransportEntry;
use graft_runtime::TransportFactory;
use graft_runtime::TransportRegistry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json_bytes::json as bjson;
use tokio_util::sync::CancellationToken;

type Responder = Arc<dyn Fn(&ExecutionRequest) -> graphql::Response + Send + Sync>;

/// Every call any in-process executor received, in arrival order.
#[derive(Clone, Default)]
struct CallLog {
    calls: Arc<Mutex<Vec<(String, ExecutionRequest)>>>,
}

impl CallLog {
    fn record(&self, subgraph: &str, request: &ExecutionRequest) {
        self.calls
            .lock()
            .push((subgraph.to_string(), request.clone()));
    }

    fn for_subgraph(&self, subgraph: &str) -> Vec<ExecutionRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == subgraph)
            .map(|(_, request)| request.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

struct InProcessFactory {
    responders: IndexMap<String, Responder>,
    log: CallLog,
}

#[async_trait]
impl TransportFactory for InProcessFactory {
    fn kind(&self) -> &str {
        "inprocess"
    }

    async fn make_executor(
        &self,
        entry: &TransportEntry,
    ) -> Result<Arc<dyn Executor>, FetchError> {
        let responder = self.responders.get(&entry.subgraph).cloned().ok_or_else(|| {
            FetchError::ExecutorConstruction {
                subgraph: entry.subgraph.clone(),
                reason: "no responder configured".to_string(),
            }
        })?;
        Ok(Arc::new(InProcessExecutor {
            subgraph: entry.subgraph.clone(),
            responder,
            log: self.log.clone(),
        }))
    }
}

struct InProcessExecutor {
    subgraph: String,
    responder: Responder,
    log: CallLog,
}

impl Executor for InProcessExecutor {
    fn execute(
        &self,
        request: ExecutionRequest,
    ) -> BoxFuture<'_, Result<graphql::Response, FetchError>> {
        self.log.record(&self.subgraph, &request);
        let response = (self.responder)(&request);
        Box::pin(async move { Ok(response) })
    }
}

fn respond(data: serde_json_bytes::Value) -> Responder {
    Arc::new(move |_| graphql::Response::builder().data(data.clone()).build())
}

fn compose(subgraphs: Vec<(&str, &str)>) -> Supergraph {
    let subgraphs = subgraphs
        .into_iter()
        .map(|(name, sdl)| {
            Subgraph::parse(name, sdl)
                .unwrap()
                .with_transport(TransportEntry::new(name, "inprocess", format!("mem://{name}")))
        })
        .collect();
    compose_subgraphs(subgraphs, &CompositionOptions::default()).unwrap()
}

fn gateway(
    subgraphs: Vec<(&str, &str)>,
    responders: Vec<(&str, Responder)>,
    hooks: Vec<Arc<dyn SubgraphExecuteHook>>,
) -> (GatewayRuntime, CallLog) {
    let supergraph = compose(subgraphs);
    let log = CallLog::default();
    let mut transports = TransportRegistry::empty();
    transports.register(Arc::new(InProcessFactory {
        responders: responders
            .into_iter()
            .map(|(name, responder)| (name.to_string(), responder))
            .collect(),
        log: log.clone(),
    }));
    let runtime =
        GatewayRuntime::new(&supergraph, RuntimeOptions { transports, hooks }).unwrap();
    (runtime, log)
}

fn request(query: &str) -> graphql::Request {
    graphql::Request::builder().query(query).build()
}

#[tokio::test]
async fn merges_entities_across_subgraphs() {
    let (runtime, log) = gateway(
        vec![
            (
                "users",
                "type Query { user(id: ID!): User } type User { id: ID name: String }",
            ),
            (
                "reviews",
                r#"
                type Query { userById(id: ID): User }
                type User { id: ID reviews: [Review] }
                type Review { body: String }
                "#,
            ),
        ],
        vec![
            ("users", respond(bjson!({"user": {"id": "1", "name": "Ada"}}))),
            (
                "reviews",
                respond(bjson!({"userById": {"reviews": [{"body": "Sound"}]}})),
            ),
        ],
        Vec::new(),
    );

    let response = runtime
        .execute(request(r#"{ user(id: "1") { name reviews { body } } }"#))
        .await;

    assert_eq!(response.errors, Vec::new());
    // the injected join key is projected back out of the response
    assert_eq!(
        response.data,
        Some(bjson!({"user": {"name": "Ada", "reviews": [{"body": "Sound"}]}}))
    );
    let reviews_calls = log.for_subgraph("reviews");
    assert_eq!(reviews_calls.len(), 1);
    assert_eq!(
        reviews_calls[0].operation_name.as_deref(),
        Some("UserById")
    );
    assert_eq!(reviews_calls[0].variables.get("User_id"), Some(&bjson!("1")));
}

#[tokio::test]
async fn batch_resolvers_make_one_call_for_all_entities() {
    let (runtime, log) = gateway(
        vec![
            (
                "catalog",
                "type Query { products: [Product] } type Product { id: ID title: String }",
            ),
            (
                "pricing",
                r#"
                type Query { productsByIds(ids: [ID]): [Product] }
                type Product { id: ID price: Float }
                "#,
            ),
        ],
        vec![
            (
                "catalog",
                respond(bjson!({
                    "products": [
                        {"id": "p1", "title": "Anvil"},
                        {"id": "p2", "title": "Rocket"},
                    ]
                })),
            ),
            (
                "pricing",
                respond(bjson!({"productsByIds": [{"price": 9.5}, {"price": 19.5}]})),
            ),
        ],
        Vec::new(),
    );

    let response = runtime
        .execute(request("{ products { title price } }"))
        .await;

    assert_eq!(response.errors, Vec::new());
    assert_eq!(
        response.data,
        Some(bjson!({
            "products": [
                {"title": "Anvil", "price": 9.5},
                {"title": "Rocket", "price": 19.5},
            ]
        }))
    );
    let pricing_calls = log.for_subgraph("pricing");
    assert_eq!(pricing_calls.len(), 1);
    assert_eq!(
        pricing_calls[0].variables.get("Product_id"),
        Some(&bjson!(["p1", "p2"]))
    );
}

#[tokio::test]
async fn client_variables_forward_to_subgraphs() {
    let (runtime, log) = gateway(
        vec![(
            "users",
            "type Query { user(id: ID!): User } type User { id: ID name: String }",
        )],
        vec![("users", respond(bjson!({"user": {"name": "Grace"}})))],
        Vec::new(),
    );

    let response = runtime
        .execute(
            graphql::Request::builder()
                .query("query U($id: ID!) { user(id: $id) { name } }")
                .variable("id", "7")
                .build(),
        )
        .await;

    assert_eq!(response.data, Some(bjson!({"user": {"name": "Grace"}})));
    let calls = log.for_subgraph("users");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].variables.get("id"), Some(&bjson!("7")));
    assert!(calls[0].document.contains("$id: ID!"));
}

#[derive(Clone, Default)]
struct Marks(Arc<Mutex<Vec<String>>>);

impl Marks {
    fn push(&self, mark: String) {
        self.0.lock().push(mark);
    }

    fn take(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

struct RecordingHook {
    marks: Marks,
}

#[async_trait]
impl SubgraphExecuteHook for RecordingHook {
    async fn on_subgraph_execute(
        &self,
        payload: &mut SubgraphExecutePayload<'_>,
    ) -> Result<Option<Box<dyn DoneHook>>, BoxError> {
        self.marks.push(format!("before:{}", payload.subgraph_name));
        payload.request.extensions.insert("traced", bjson!(true));
        Ok(Some(Box::new(RecordingDone {
            marks: self.marks.clone(),
            subgraph: payload.subgraph_name.to_string(),
        })))
    }
}

struct RecordingDone {
    marks: Marks,
    subgraph: String,
}

#[async_trait]
impl DoneHook for RecordingDone {
    async fn on_done(&self, _response: &mut graphql::Response) -> Result<(), BoxError> {
        self.marks.push(format!("after:{}", self.subgraph));
        Ok(())
    }
}

#[tokio::test]
async fn hooks_wrap_every_subgraph_call() {
    let marks = Marks::default();
    let (runtime, log) = gateway(
        vec![(
            "users",
            "type Query { me: User } type User { name: String }",
        )],
        vec![("users", respond(bjson!({"me": {"name": "Ada"}})))],
        vec![Arc::new(RecordingHook {
            marks: marks.clone(),
        })],
    );

    runtime.execute(request("{ me { name } }")).await;
    runtime.execute(request("{ me { name } }")).await;

    assert_eq!(
        marks.take(),
        vec![
            "before:users".to_string(),
            "after:users".to_string(),
            "before:users".to_string(),
            "after:users".to_string(),
        ]
    );
    // the hook's request rewrite reached the transport
    for call in log.for_subgraph("users") {
        assert_eq!(call.extensions.get("traced"), Some(&bjson!(true)));
    }
}

#[tokio::test]
async fn pre_cancelled_executions_reach_no_subgraph() {
    let (runtime, log) = gateway(
        vec![(
            "users",
            "type Query { me: User } type User { name: String }",
        )],
        vec![("users", respond(bjson!({"me": {"name": "Ada"}})))],
        Vec::new(),
    );
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let response = runtime
        .execute_with_cancellation(request("{ me { name } }"), cancellation)
        .await;

    assert_eq!(
        response.errors[0].extensions.get("code"),
        Some(&bjson!("EXECUTION_CANCELLED"))
    );
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn operations_are_selected_by_name() {
    let (runtime, log) = gateway(
        vec![(
            "users",
            "type Query { me: User other: User } type User { name: String }",
        )],
        vec![("users", respond(bjson!({"other": {"name": "Bob"}})))],
        Vec::new(),
    );

    let response = runtime
        .execute(
            graphql::Request::builder()
                .query("query A { me { name } } query B { other { name } }")
                .operation_name("B")
                .build(),
        )
        .await;

    assert_eq!(response.data, Some(bjson!({"other": {"name": "Bob"}})));
    let calls = log.for_subgraph("users");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].document.contains("other"));
}
