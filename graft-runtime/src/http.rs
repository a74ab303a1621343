//! GraphQL-over-HTTP transport, the default `@transport(kind: "http")`.

use std::sync::Arc;

use futures::future::BoxFuture;
use graft_composition::TransportEntry;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use reqwest::Url;

use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::transport::ExecutionRequest;
use crate::transport::Executor;
use crate::transport::TransportFactory;

/// Builds [`HttpExecutor`]s, one per subgraph, sharing a connection pool.
#[derive(Clone, Default)]
pub struct HttpTransportFactory {
    client: reqwest::Client,
}

impl HttpTransportFactory {
    /// Uses `client` for every executor built by this factory.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl TransportFactory for HttpTransportFactory {
    fn kind(&self) -> &str {
        "http"
    }

    async fn make_executor(
        &self,
        entry: &TransportEntry,
    ) -> Result<Arc<dyn Executor>, FetchError> {
        let construction = |reason: String| FetchError::ExecutorConstruction {
            subgraph: entry.subgraph.clone(),
            reason,
        };
        let url = Url::parse(&entry.location)
            .map_err(|error| construction(format!("invalid URL '{}': {error}", entry.location)))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &entry.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| construction(format!("invalid header name '{name}': {error}")))?;
            let header_value = HeaderValue::from_str(value).map_err(|error| {
                construction(format!("invalid value for header '{name}': {error}"))
            })?;
            headers.insert(header_name, header_value);
        }
        Ok(Arc::new(HttpExecutor {
            service: entry.subgraph.clone(),
            url,
            headers,
            client: self.client.clone(),
        }))
    }
}

/// POSTs `{"query", "operationName", "variables"}` bodies to one subgraph
/// endpoint and reads GraphQL responses back.
pub struct HttpExecutor {
    service: String,
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl Executor for HttpExecutor {
    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<Response, FetchError>> {
        Box::pin(async move {
            let service = self.service.as_str();
            let cancellation = request.cancellation.clone();
            let body = Request::builder()
                .query(request.document)
                .and_operation_name(request.operation_name)
                .variables(request.variables)
                .extensions(request.extensions)
                .build();
            tracing::debug!(subgraph = service, url = %self.url, "sending subgraph request");
            let send = async {
                let response = self
                    .client
                    .post(self.url.clone())
                    .headers(self.headers.clone())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|error| FetchError::SubrequestHttpError {
                        status_code: error.status().map(|status| status.as_u16()),
                        service: service.to_string(),
                        reason: error.to_string(),
                    })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::SubrequestHttpError {
                        status_code: Some(status.as_u16()),
                        service: service.to_string(),
                        reason: format!("subrequest returned {status}"),
                    });
                }
                let bytes =
                    response
                        .bytes()
                        .await
                        .map_err(|error| FetchError::SubrequestHttpError {
                            status_code: Some(status.as_u16()),
                            service: service.to_string(),
                            reason: error.to_string(),
                        })?;
                Response::from_bytes(service, bytes)
            };
            tokio::select! {
                _ = cancellation.cancelled() => Err(FetchError::ExecutionCancelled),
                result = send => result,
            }
        })
    }
}
