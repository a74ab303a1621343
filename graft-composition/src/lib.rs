//! Schema composition for the graft gateway.
//!
//! This crate turns N independently owned subgraph schemas into one
//! supergraph schema whose directive annotations (`@source`, `@resolver`,
//! `@variable`, `@transport`) record where every element came from and how
//! entities can be fetched or merged across subgraphs. The supergraph
//! round-trips through plain SDL, and [`extract_subgraph`] recovers any
//! subgraph's local schema from it at any time.
//!
//! The runtime crate consumes supergraphs produced here; nothing in this
//! crate performs I/O beyond the [`loader`] seam.

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod annotations;
mod compose;
mod conventions;
pub mod error;
mod extract;
pub mod loader;
mod merge;
pub(crate) mod rewrite;
pub mod transforms;
pub mod transport;

pub use crate::annotations::ResolverAnnotation;
pub use crate::annotations::ResolverKind;
pub use crate::annotations::SourceAnnotation;
pub use crate::annotations::VariableAnnotation;
pub use crate::compose::compose_subgraphs;
pub use crate::compose::CompositionOptions;
pub use crate::compose::Subgraph;
pub use crate::compose::Supergraph;
pub use crate::error::AnnotationError;
pub use crate::error::CompositionError;
pub use crate::extract::extract_subgraph;
pub use crate::loader::load_subgraphs;
pub use crate::loader::BoxError;
pub use crate::loader::StaticSchemaLoader;
pub use crate::loader::SubgraphLoader;
pub use crate::transforms::SubgraphTransform;
pub use crate::transport::TransportEntry;
