//! Transport metadata: how to reach a subgraph over the network.
//!
//! One `@transport` application per subgraph lives on the supergraph's
//! schema definition. The runtime reads these back into [`TransportEntry`]
//! values and hands them to transport factories; this crate only defines the
//! record and its directive round trip.

use apollo_compiler::ast::Argument;
use apollo_compiler::ast::Value;
use apollo_compiler::name;
use apollo_compiler::schema::Directive;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::annotations::string_argument;
use crate::annotations::TRANSPORT_DIRECTIVE_NAME;
use crate::error::AnnotationError;

/// Network coordinates for one subgraph.
///
/// `options` is carried opaquely as a GraphQL object value under the
/// `options:` argument; its keys must be valid GraphQL names, its values any
/// const value. Transport factories interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEntry {
    pub subgraph: String,
    pub kind: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl TransportEntry {
    pub fn new(
        subgraph: impl Into<String>,
        kind: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            subgraph: subgraph.into(),
            kind: kind.into(),
            location: location.into(),
            headers: Vec::new(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    pub fn to_directive(&self) -> Result<Directive, AnnotationError> {
        let mut arguments = vec![
            string_argument("subgraph", &self.subgraph),
            string_argument("kind", &self.kind),
            string_argument("location", &self.location),
        ];
        if !self.headers.is_empty() {
            let pairs = self
                .headers
                .iter()
                .map(|(name, value)| {
                    Node::new(Value::List(vec![
                        Node::new(Value::String(name.clone())),
                        Node::new(Value::String(value.clone())),
                    ]))
                })
                .collect();
            arguments.push(Node::new(Argument {
                name: name!("headers"),
                value: Node::new(Value::List(pairs)),
            }));
        }
        if !self.options.is_empty() {
            let fields = self
                .options
                .iter()
                .map(|(key, value)| {
                    let key = Name::new(key).map_err(|_| AnnotationError::InvalidArgument {
                        directive: TRANSPORT_DIRECTIVE_NAME,
                        argument: "options",
                        expected: "an object with GraphQL-name keys",
                    })?;
                    Ok((key, Node::new(json_to_const_value(value)?)))
                })
                .collect::<Result<Vec<_>, AnnotationError>>()?;
            arguments.push(Node::new(Argument {
                name: name!("options"),
                value: Node::new(Value::Object(fields)),
            }));
        }
        Ok(Directive {
            name: name!("transport"),
            arguments,
        })
    }

    pub fn from_directive(directive: &Directive) -> Result<Self, AnnotationError> {
        let mut entry = Self::new(
            require_string(directive, "subgraph")?,
            require_string(directive, "kind")?,
            require_string(directive, "location")?,
        );
        if let Some(headers) = directive.specified_argument_by_name("headers") {
            entry.headers = parse_headers(headers)?;
        }
        if let Some(options) = directive.specified_argument_by_name("options") {
            let Value::Object(fields) = options.as_ref() else {
                return Err(AnnotationError::InvalidArgument {
                    directive: TRANSPORT_DIRECTIVE_NAME,
                    argument: "options",
                    expected: "an object value",
                });
            };
            for (key, value) in fields {
                entry
                    .options
                    .insert(key.to_string(), const_value_to_json(value)?);
            }
        }
        Ok(entry)
    }
}

/// Reads every `@transport` application off the schema definition, keyed by
/// subgraph name. A repeated subgraph keeps the last entry.
pub fn subgraph_transport_map(
    schema: &Schema,
) -> Result<IndexMap<String, TransportEntry>, AnnotationError> {
    let mut map = IndexMap::new();
    for directive in schema
        .schema_definition
        .directives
        .get_all(TRANSPORT_DIRECTIVE_NAME)
    {
        let entry = TransportEntry::from_directive(directive)?;
        map.insert(entry.subgraph.clone(), entry);
    }
    Ok(map)
}

fn parse_headers(value: &Value) -> Result<Vec<(String, String)>, AnnotationError> {
    let invalid = || AnnotationError::InvalidArgument {
        directive: TRANSPORT_DIRECTIVE_NAME,
        argument: "headers",
        expected: "a list of [name, value] string pairs",
    };
    let Value::List(pairs) = value else {
        return Err(invalid());
    };
    let mut headers = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Value::List(items) = pair.as_ref() else {
            return Err(invalid());
        };
        match items.as_slice() {
            [name, value] => match (name.as_str(), value.as_str()) {
                (Some(name), Some(value)) => headers.push((name.to_string(), value.to_string())),
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        }
    }
    Ok(headers)
}

fn require_string(directive: &Directive, argument: &'static str) -> Result<String, AnnotationError> {
    directive
        .specified_argument_by_name(argument)
        .ok_or(AnnotationError::MissingArgument {
            directive: TRANSPORT_DIRECTIVE_NAME,
            argument,
        })?
        .as_str()
        .map(str::to_string)
        .ok_or(AnnotationError::InvalidArgument {
            directive: TRANSPORT_DIRECTIVE_NAME,
            argument,
            expected: "a string",
        })
}

/// GraphQL const value to JSON. Variables cannot appear in transport
/// metadata.
pub fn const_value_to_json(value: &Value) -> Result<serde_json::Value, AnnotationError> {
    let invalid = |expected: &'static str| AnnotationError::InvalidArgument {
        directive: TRANSPORT_DIRECTIVE_NAME,
        argument: "options",
        expected,
    };
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Enum(name) => serde_json::Value::String(name.to_string()),
        Value::Int(i) => match i.try_to_i32() {
            Ok(i) => serde_json::Value::Number(i.into()),
            Err(_) => {
                let f = i.try_to_f64().map_err(|_| invalid("a representable number"))?;
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| invalid("a representable number"))?
            }
        },
        Value::Float(f) => {
            let f = f.try_to_f64().map_err(|_| invalid("a representable number"))?;
            serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| invalid("a representable number"))?
        }
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| const_value_to_json(item))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(key, value)| Ok((key.to_string(), const_value_to_json(value)?)))
                .collect::<Result<_, AnnotationError>>()?,
        ),
        Value::Variable(_) => return Err(invalid("a const value")),
    })
}

/// JSON to GraphQL const value, for writing transport options back out.
pub fn json_to_const_value(value: &serde_json::Value) -> Result<Value, AnnotationError> {
    let invalid = |expected: &'static str| AnnotationError::InvalidArgument {
        directive: TRANSPORT_DIRECTIVE_NAME,
        argument: "options",
        expected,
    };
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Value::Int(i.into())
            } else {
                let f = n.as_f64().ok_or_else(|| invalid("a representable number"))?;
                Value::Float(f.into())
            }
        }
        serde_json::Value::Array(items) => Value::List(
            items
                .iter()
                .map(|item| Ok(Node::new(json_to_const_value(item)?)))
                .collect::<Result<_, AnnotationError>>()?,
        ),
        serde_json::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| {
                    let key = Name::new(key).map_err(|_| invalid("GraphQL-name keys"))?;
                    Ok((key, Node::new(json_to_const_value(value)?)))
                })
                .collect::<Result<_, AnnotationError>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn entry_round_trips_through_directive() {
        let entry = TransportEntry::new("accounts", "http", "http://accounts.internal/graphql")
            .with_header("x-tenant", "{context.tenant}")
            .with_option("retries", json!(3))
            .with_option("timeouts", json!({ "connect": 0.5 }));
        let directive = entry.to_directive().unwrap();
        assert_eq!(TransportEntry::from_directive(&directive), Ok(entry));
    }

    #[test]
    fn transport_map_reads_schema_definition() {
        let sdl = r#"
        schema
          @transport(subgraph: "accounts", kind: "http", location: "http://accounts/graphql", headers: [["authorization", "{context.headers.authorization}"]])
          @transport(subgraph: "reviews", kind: "http", location: "http://reviews/graphql") {
          query: Query
        }
        directive @transport(subgraph: String!, kind: String!, location: String!, headers: [[String!]!], options: TransportOptions) repeatable on SCHEMA
        scalar TransportOptions
        type Query { ok: Boolean }
        "#;
        let schema = Schema::parse(sdl, "transport.graphql").unwrap();
        let map = subgraph_transport_map(&schema).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map["accounts"].headers,
            vec![(
                "authorization".to_string(),
                "{context.headers.authorization}".to_string()
            )]
        );
        assert_eq!(map["reviews"].location, "http://reviews/graphql");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let sdl = r#"
        schema @transport(subgraph: "a", kind: "http", location: "http://a", headers: ["nope"]) { query: Query }
        directive @transport(subgraph: String!, kind: String!, location: String!, headers: [[String!]!], options: TransportOptions) repeatable on SCHEMA
        scalar TransportOptions
        type Query { ok: Boolean }
        "#;
        let schema = Schema::parse(sdl, "transport.graphql").unwrap();
        assert!(subgraph_transport_map(&schema).is_err());
    }
}
