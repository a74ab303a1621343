//! Error types for planning and dispatch.
//!
//! Planner and fetch errors are serializable so their fields can ride
//! along in the `extensions` object of the wire error they convert to.

use displaydoc::Display;
use graft_composition::AnnotationError;
use serde::Serialize;
use serde_json_bytes::json;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::graphql::Error as GraphQLError;
use crate::graphql::ErrorExtension;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;

/// An operation could not be turned into a plan against the current
/// supergraph.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum PlanError {
    /// unknown operation named '{0}'
    UnknownOperation(String),

    /// must provide operation name if query contains multiple operations
    MissingOperationName,

    /// introspection is not supported
    IntrospectionNotSupported,

    /// cannot resolve field '{field_name}' on type '{type_name}': no subgraph serves it
    UnresolvableField {
        type_name: String,
        field_name: String,
    },

    /// resolver operation for subgraph '{subgraph}' is invalid: {reason}
    InvalidResolverOperation { subgraph: String, reason: String },

    /// resolver for subgraph '{subgraph}' declares no variable binding '{argument}'
    MissingVariableBinding { subgraph: String, argument: String },

    /// malformed supergraph annotation: {reason}
    InvalidAnnotation { reason: String },

    /// unsupported selection: {reason}
    UnsupportedSelection { reason: String },
}

impl PlanError {
    pub(crate) fn to_graphql_error(&self) -> GraphQLError {
        let extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };
        GraphQLError::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .extensions(extensions)
            .build()
    }

    pub(crate) fn to_response(&self) -> Response {
        Response::builder()
            .errors(vec![self.to_graphql_error()])
            .build()
    }
}

impl ErrorExtension for PlanError {
    fn extension_code(&self) -> String {
        match self {
            PlanError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            PlanError::MissingOperationName => "MISSING_OPERATION_NAME",
            PlanError::IntrospectionNotSupported => "INTROSPECTION_NOT_SUPPORTED",
            PlanError::UnresolvableField { .. } => "UNRESOLVABLE_FIELD",
            PlanError::InvalidResolverOperation { .. } => "INVALID_RESOLVER_OPERATION",
            PlanError::MissingVariableBinding { .. } => "MISSING_VARIABLE_BINDING",
            PlanError::InvalidAnnotation { .. } => "INVALID_ANNOTATION",
            PlanError::UnsupportedSelection { .. } => "UNSUPPORTED_SELECTION",
        }
        .to_string()
    }
}

impl From<AnnotationError> for PlanError {
    fn from(error: AnnotationError) -> Self {
        PlanError::InvalidAnnotation {
            reason: error.to_string(),
        }
    }
}

/// A subgraph call failed.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum FetchError {
    /// no transport of kind '{kind}' is registered for subgraph '{subgraph}'
    UnknownTransport { kind: String, subgraph: String },

    /// could not construct an executor for subgraph '{subgraph}': {reason}
    ExecutorConstruction { subgraph: String, reason: String },

    /// subgraph '{subgraph}' declares no transport
    MissingTransport { subgraph: String },

    /// HTTP fetch failed from '{service}': {reason}
    SubrequestHttpError {
        status_code: Option<u16>,
        service: String,
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse { service: String, reason: String },

    /// service '{service}' returned a malformed batch: {reason}
    SubrequestBatchingError { service: String, reason: String },

    /// request execution was cancelled
    ExecutionCancelled,

    /// hook rejected the request to subgraph '{subgraph}': {reason}
    HookError { subgraph: String, reason: String },
}

impl FetchError {
    /// Converts the fetch error to a wire error at `path`.
    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> GraphQLError {
        let mut extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };
        match self {
            FetchError::SubrequestHttpError {
                status_code,
                service,
                ..
            } => {
                extensions.insert("service", Value::String(service.as_str().into()));
                extensions.remove("status_code");
                if let Some(status_code) = status_code {
                    extensions.insert("http", json!({ "status": status_code }));
                }
            }
            FetchError::SubrequestMalformedResponse { service, .. }
            | FetchError::SubrequestBatchingError { service, .. } => {
                extensions.insert("service", Value::String(service.as_str().into()));
            }
            FetchError::HookError { subgraph, .. }
            | FetchError::ExecutorConstruction { subgraph, .. }
            | FetchError::UnknownTransport { subgraph, .. }
            | FetchError::MissingTransport { subgraph } => {
                extensions.insert("service", Value::String(subgraph.as_str().into()));
            }
            FetchError::ExecutionCancelled => {}
        }
        GraphQLError::builder()
            .message(self.to_string())
            .and_path(path)
            .extension_code(self.extension_code())
            .extensions(extensions)
            .build()
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::UnknownTransport { .. } => "UNKNOWN_TRANSPORT",
            FetchError::ExecutorConstruction { .. } => "EXECUTOR_CONSTRUCTION",
            FetchError::MissingTransport { .. } => "MISSING_TRANSPORT",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestBatchingError { .. } => "SUBREQUEST_BATCHING_ERROR",
            FetchError::ExecutionCancelled => "EXECUTION_CANCELLED",
            FetchError::HookError { .. } => "HOOK_ERROR",
        }
        .to_string()
    }
}

/// Failures surfaced by [`crate::GatewayRuntime`] itself rather than by a
/// single operation.
#[derive(Error, Display, Debug)]
pub enum RuntimeError {
    /// invalid supergraph: {message}
    InvalidSupergraph { message: String },

    /// malformed supergraph annotation: {0}
    Annotation(#[from] AnnotationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_converts_to_graphql_error() {
        let error = FetchError::SubrequestHttpError {
            status_code: Some(502),
            service: "reviews".to_string(),
            reason: "bad gateway".to_string(),
        }
        .to_graphql_error(Some(Path::from("reviews/0")));

        let expected = GraphQLError::builder()
            .message("HTTP fetch failed from 'reviews': bad gateway")
            .path(Path::from("reviews/0"))
            .extension_code("SUBREQUEST_HTTP_ERROR")
            .extension("service", Value::String("reviews".into()))
            .extension("reason", Value::String("bad gateway".into()))
            .extension("http", json!({ "status": 502 }))
            .build();
        assert_eq!(error, expected);
    }

    #[test]
    fn malformed_response_error_carries_service() {
        let error = FetchError::SubrequestMalformedResponse {
            service: "accounts".to_string(),
            reason: "expected a JSON object".to_string(),
        }
        .to_graphql_error(None);
        assert_eq!(
            error.extensions.get("service"),
            Some(&Value::String("accounts".into()))
        );
        assert_eq!(error.extension_code().as_deref(), Some("SUBREQUEST_MALFORMED_RESPONSE"));
    }

    #[test]
    fn plan_error_response_has_no_data() {
        let response = PlanError::IntrospectionNotSupported.to_response();
        assert!(response.data.is_none());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].message,
            "introspection is not supported"
        );
    }

    #[test]
    fn unresolvable_field_names_both_sides() {
        let error = PlanError::UnresolvableField {
            type_name: "User".to_string(),
            field_name: "rating".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "cannot resolve field 'rating' on type 'User': no subgraph serves it"
        );
        let wire = error.to_graphql_error();
        assert_eq!(
            wire.extensions.get("type_name"),
            Some(&Value::String("User".into()))
        );
    }
}
