//! Composition errors.

use crate::loader::BoxError;

/// Error types for schema composition.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// Composition was invoked with an empty subgraph list.
    #[error("no subgraphs provided")]
    NoSubgraphs,

    /// Two subgraphs were registered under the same name.
    #[error("duplicate subgraph name `{name}`")]
    DuplicateSubgraphName { name: String },

    /// A subgraph loader failed to produce a schema.
    #[error("failed to load subgraph `{subgraph}`")]
    SubgraphLoad {
        subgraph: String,
        #[source]
        source: BoxError,
    },

    /// A subgraph schema could not be used as composition input.
    #[error("invalid schema for subgraph `{subgraph}`: {message}")]
    InvalidSubgraphSchema { subgraph: String, message: String },

    /// The `extra_type_defs` documents did not parse.
    #[error("invalid extra type definitions: {message}")]
    InvalidExtraTypeDefs { message: String },

    /// The composed supergraph did not survive its serialization round trip.
    #[error("composed supergraph failed to parse: {message}")]
    InvalidSupergraph { message: String },

    /// An annotation directive already present on an input was malformed.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

/// Error types for reading annotation directives back off a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
    /// A directive application is missing a required argument.
    #[error("`@{directive}` is missing required argument `{argument}`")]
    MissingArgument {
        directive: &'static str,
        argument: &'static str,
    },

    /// An argument was present but had the wrong shape.
    #[error("`@{directive}` argument `{argument}` must be {expected}")]
    InvalidArgument {
        directive: &'static str,
        argument: &'static str,
        expected: &'static str,
    },

    /// A `kind:` value other than FETCH or BATCH.
    #[error("unknown resolver kind `{value}`")]
    UnknownResolverKind { value: String },
}
