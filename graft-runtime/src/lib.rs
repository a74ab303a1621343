//! Query execution for the graft gateway.
//!
//! This crate serves client operations against a supergraph composed by
//! `graft-composition`. Each operation is validated, split by the planner
//! into per-subgraph fetches guided by the supergraph's `@source`,
//! `@resolver` and `@variable` annotations, dispatched over pluggable
//! transports, and stitched back into a single GraphQL response. Plans are
//! memoized per supergraph, executors are constructed lazily per subgraph,
//! and [`GatewayRuntime`] hot-swaps supergraphs without disturbing
//! in-flight requests.

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

mod cache;
pub mod error;
mod execute;
pub mod graphql;
pub mod hooks;
pub mod http;
pub mod json_ext;
pub mod plan;
mod runtime;
pub mod transport;

pub use crate::cache::PlanCache;
pub use crate::error::FetchError;
pub use crate::error::PlanError;
pub use crate::error::RuntimeError;
pub use crate::hooks::DoneHook;
pub use crate::hooks::SubgraphExecuteHook;
pub use crate::hooks::SubgraphExecutePayload;
pub use crate::http::HttpTransportFactory;
pub use crate::json_ext::Object;
pub use crate::json_ext::Path;
pub use crate::json_ext::PathElement;
pub use crate::plan::plan_operation;
pub use crate::plan::OperationKind;
pub use crate::plan::OperationPlan;
pub use crate::runtime::GatewayRuntime;
pub use crate::runtime::PollHandle;
pub use crate::runtime::RuntimeOptions;
pub use crate::transport::ExecutionRequest;
pub use crate::transport::Executor;
pub use crate::transport::TransportFactory;
pub use crate::transport::TransportRegistry;
pub use graft_composition::BoxError;
pub use graft_composition::Supergraph;
pub use graft_composition::TransportEntry;
