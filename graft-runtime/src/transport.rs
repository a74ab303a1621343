//! The executor seam between the dispatcher and subgraph transports.

use std::sync::Arc;

use futures::future::BoxFuture;
use graft_composition::TransportEntry;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::graphql::Response;
use crate::http::HttpTransportFactory;
use crate::json_ext::Object;

/// A single GraphQL request bound for one subgraph.
#[derive(Clone, Debug, Default)]
pub struct ExecutionRequest {
    /// The operation document to run.
    pub document: String,
    /// The operation to run when the document holds several.
    pub operation_name: Option<String>,
    /// Variable values for the operation.
    pub variables: Object,
    /// Request extensions, empty unless a hook fills them.
    pub extensions: Object,
    /// Cancels the call when triggered.
    pub cancellation: CancellationToken,
}

#[buildstructor::buildstructor]
impl ExecutionRequest {
    /// Returns a new [`ExecutionRequest`].
    #[builder(visibility = "pub")]
    fn new(
        document: String,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            document,
            operation_name,
            variables,
            extensions,
            cancellation: cancellation.unwrap_or_default(),
        }
    }
}

/// Executes requests against one subgraph.
///
/// Implementations wrap a transport (HTTP by default) or, in tests, a
/// canned response source.
pub trait Executor: Send + Sync {
    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<Response, FetchError>>;
}

/// Builds executors for one transport kind.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    /// The `@transport(kind:)` value this factory serves, e.g. `http`.
    fn kind(&self) -> &str;

    /// Constructs an executor for a subgraph's transport entry.
    async fn make_executor(&self, entry: &TransportEntry)
        -> Result<Arc<dyn Executor>, FetchError>;
}

/// Transport factories keyed by kind.
///
/// [`TransportRegistry::default`] installs the HTTP transport; callers
/// register additional factories to teach the gateway new `kind` values.
#[derive(Clone)]
pub struct TransportRegistry {
    factories: IndexMap<String, Arc<dyn TransportFactory>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(HttpTransportFactory::default()));
        registry
    }
}

impl TransportRegistry {
    /// A registry with no transports at all.
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Registers a factory under its kind, replacing any previous one.
    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    pub(crate) fn get(&self, kind: &str) -> Option<&Arc<dyn TransportFactory>> {
        self.factories.get(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullExecutor;

    impl Executor for NullExecutor {
        fn execute(
            &self,
            _request: ExecutionRequest,
        ) -> BoxFuture<'_, Result<Response, FetchError>> {
            Box::pin(async { Ok(Response::builder().data(Value::Null).build()) })
        }
    }

    struct FakeFactory;

    #[async_trait::async_trait]
    impl TransportFactory for FakeFactory {
        fn kind(&self) -> &str {
            "fake"
        }

        async fn make_executor(
            &self,
            _entry: &TransportEntry,
        ) -> Result<Arc<dyn Executor>, FetchError> {
            Ok(Arc::new(NullExecutor))
        }
    }

    #[test]
    fn default_registry_serves_http() {
        let registry = TransportRegistry::default();
        assert!(registry.get("http").is_some());
        assert!(registry.get("grpc").is_none());
    }

    #[test]
    fn registered_factories_are_looked_up_by_kind() {
        let mut registry = TransportRegistry::empty();
        assert!(registry.get("http").is_none());
        registry.register(Arc::new(FakeFactory));
        assert!(registry.get("fake").is_some());
    }

    #[test]
    fn execution_request_defaults_to_a_live_token() {
        let request = ExecutionRequest::builder()
            .document("{ me }".to_string())
            .build();
        assert!(!request.cancellation.is_cancelled());
        assert!(request.variables.is_empty());
    }
}
