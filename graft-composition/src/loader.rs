//! Async subgraph schema loading.
//!
//! Composition itself is synchronous; fetching subgraph schemas is not.
//! [`SubgraphLoader`] is the seam between the two: gateways implement it
//! for registries, files, or live introspection, and [`load_subgraphs`]
//! turns a set of loaders into composition inputs, failing fast on the
//! first loader error.

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use futures::future::BoxFuture;

use crate::compose::Subgraph;
use crate::error::CompositionError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A named source of one subgraph schema.
pub trait SubgraphLoader: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> BoxFuture<'_, Result<Valid<Schema>, BoxError>>;
}

/// Loads every subgraph concurrently, preserving loader order in the
/// result so composition stays deterministic.
pub async fn load_subgraphs(
    loaders: &[Box<dyn SubgraphLoader>],
) -> Result<Vec<Subgraph>, CompositionError> {
    let pending = loaders.iter().map(|loader| async move {
        let schema =
            loader
                .load()
                .await
                .map_err(|source| CompositionError::SubgraphLoad {
                    subgraph: loader.name().to_string(),
                    source,
                })?;
        tracing::debug!(subgraph = loader.name(), "loaded subgraph schema");
        Ok(Subgraph::new(loader.name(), schema))
    });
    futures::future::try_join_all(pending).await
}

/// Serves a schema parsed and validated once at construction.
pub struct StaticSchemaLoader {
    name: String,
    schema: Valid<Schema>,
}

impl StaticSchemaLoader {
    pub fn new(name: impl Into<String>, sdl: &str) -> Result<Self, CompositionError> {
        let name = name.into();
        let schema = Schema::parse_and_validate(sdl, format!("{name}.graphql")).map_err(
            |errors| CompositionError::InvalidSubgraphSchema {
                subgraph: name.clone(),
                message: errors.to_string(),
            },
        )?;
        Ok(Self { name, schema })
    }
}

impl SubgraphLoader for StaticSchemaLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> BoxFuture<'_, Result<Valid<Schema>, BoxError>> {
        let schema = self.schema.clone();
        Box::pin(async move { Ok(schema) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingLoader;

    impl SubgraphLoader for FailingLoader {
        fn name(&self) -> &str {
            "broken"
        }

        fn load(&self) -> BoxFuture<'_, Result<Valid<Schema>, BoxError>> {
            Box::pin(async { Err("registry unreachable".into()) })
        }
    }

    #[tokio::test]
    async fn loads_in_loader_order() {
        let loaders: Vec<Box<dyn SubgraphLoader>> = vec![
            Box::new(StaticSchemaLoader::new("users", "type Query { user: ID }").unwrap()),
            Box::new(StaticSchemaLoader::new("posts", "type Query { post: ID }").unwrap()),
        ];
        let subgraphs = load_subgraphs(&loaders).await.unwrap();
        let names: Vec<_> = subgraphs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["users", "posts"]);
    }

    #[tokio::test]
    async fn loader_failures_name_the_subgraph() {
        let loaders: Vec<Box<dyn SubgraphLoader>> = vec![
            Box::new(StaticSchemaLoader::new("users", "type Query { user: ID }").unwrap()),
            Box::new(FailingLoader),
        ];
        let error = load_subgraphs(&loaders).await.err().unwrap();
        assert!(matches!(
            error,
            CompositionError::SubgraphLoad { subgraph, .. } if subgraph == "broken"
        ));
    }

    #[test]
    fn invalid_static_schema_is_rejected_up_front() {
        let error = StaticSchemaLoader::new("users", "type Query { user: Missing }")
            .err()
            .unwrap();
        assert!(matches!(
            error,
            CompositionError::InvalidSubgraphSchema { subgraph, .. } if subgraph == "users"
        ));
    }
}
