//! Typed records for the annotation directives a supergraph carries.
//!
//! Everything the runtime knows about a composed schema travels as plain
//! directive applications: `@source` records provenance and original names,
//! `@resolver` records how a subgraph fetches entities of a type, and
//! `@variable` records which fields can supply a resolver's arguments. The
//! records in this module convert between those applications and validated
//! Rust values, so malformed annotations fail at the schema boundary instead
//! of somewhere inside plan execution.

use apollo_compiler::ast;
use apollo_compiler::ast::Argument;
use apollo_compiler::ast::Value;
use apollo_compiler::name;
use apollo_compiler::schema;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::Directive;
use apollo_compiler::Node;
use serde::Deserialize;
use serde::Serialize;

use crate::error::AnnotationError;

pub const SOURCE_DIRECTIVE_NAME: &str = "source";
pub const RESOLVER_DIRECTIVE_NAME: &str = "resolver";
pub const VARIABLE_DIRECTIVE_NAME: &str = "variable";
pub const TRANSPORT_DIRECTIVE_NAME: &str = "transport";

/// Definitions for the annotation directives, appended to a composed
/// supergraph so the emitted SDL is self-describing and re-validates.
pub(crate) const ANNOTATION_DEFINITIONS_SDL: &str = r#"
directive @source(subgraph: String!, name: String!, type: String) repeatable on OBJECT | INTERFACE | UNION | ENUM | SCALAR | INPUT_OBJECT | FIELD_DEFINITION | INPUT_FIELD_DEFINITION | ENUM_VALUE

directive @resolver(subgraph: String!, operation: String!, kind: ResolverKind) repeatable on OBJECT | INTERFACE | FIELD_DEFINITION

directive @variable(subgraph: String!, name: String!, select: String!) repeatable on OBJECT | INTERFACE | FIELD_DEFINITION

directive @transport(subgraph: String!, kind: String!, location: String!, headers: [[String!]!], options: TransportOptions) repeatable on SCHEMA

enum ResolverKind {
  FETCH
  BATCH
}

scalar TransportOptions
"#;

/// Which subgraph an element came from and what it was called there.
///
/// `ty` is only recorded for fields and input fields: it is the field's
/// printed type *before* any transform renamed the types it references,
/// which is what lets extraction restore the original wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnnotation {
    pub subgraph: String,
    pub name: String,
    pub ty: Option<String>,
}

impl SourceAnnotation {
    pub fn new(subgraph: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subgraph: subgraph.into(),
            name: name.into(),
            ty: None,
        }
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = Some(ty.into());
        self
    }

    pub fn to_directive(&self) -> Directive {
        let mut arguments = vec![
            string_argument("subgraph", &self.subgraph),
            string_argument("name", &self.name),
        ];
        if let Some(ty) = &self.ty {
            arguments.push(string_argument("type", ty));
        }
        Directive {
            name: name!("source"),
            arguments,
        }
    }

    pub fn from_directive(directive: &Directive) -> Result<Self, AnnotationError> {
        Ok(Self {
            subgraph: require_string(directive, SOURCE_DIRECTIVE_NAME, "subgraph")?,
            name: require_string(directive, SOURCE_DIRECTIVE_NAME, "name")?,
            ty: optional_string(directive, "type"),
        })
    }
}

/// How many entities one resolver invocation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolverKind {
    #[default]
    Fetch,
    Batch,
}

impl ResolverKind {
    fn parse(value: &str) -> Result<Self, AnnotationError> {
        match value {
            "FETCH" => Ok(ResolverKind::Fetch),
            "BATCH" => Ok(ResolverKind::Batch),
            other => Err(AnnotationError::UnknownResolverKind {
                value: other.to_string(),
            }),
        }
    }
}

/// An executable operation a subgraph can run to resolve entities of the
/// annotated type (or the value of the annotated field).
///
/// Root-field resolvers carry no `kind`; convention-inferred resolvers
/// always do. A missing kind reads as FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverAnnotation {
    pub subgraph: String,
    pub operation: String,
    pub kind: Option<ResolverKind>,
}

impl ResolverAnnotation {
    pub fn new(subgraph: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            subgraph: subgraph.into(),
            operation: operation.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: ResolverKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn effective_kind(&self) -> ResolverKind {
        self.kind.unwrap_or_default()
    }

    pub fn to_directive(&self) -> Directive {
        let mut arguments = vec![
            string_argument("subgraph", &self.subgraph),
            string_argument("operation", &self.operation),
        ];
        if let Some(kind) = self.kind {
            arguments.push(Node::new(Argument {
                name: name!("kind"),
                value: Node::new(Value::Enum(match kind {
                    ResolverKind::Fetch => name!("FETCH"),
                    ResolverKind::Batch => name!("BATCH"),
                })),
            }));
        }
        Directive {
            name: name!("resolver"),
            arguments,
        }
    }

    pub fn from_directive(directive: &Directive) -> Result<Self, AnnotationError> {
        let kind = match directive.specified_argument_by_name("kind") {
            None => None,
            Some(value) => {
                let raw = value
                    .as_enum()
                    .map(|name| name.as_str())
                    .or_else(|| value.as_str())
                    .ok_or(AnnotationError::InvalidArgument {
                        directive: RESOLVER_DIRECTIVE_NAME,
                        argument: "kind",
                        expected: "FETCH or BATCH",
                    })?;
                Some(ResolverKind::parse(raw)?)
            }
        };
        Ok(Self {
            subgraph: require_string(directive, RESOLVER_DIRECTIVE_NAME, "subgraph")?,
            operation: require_string(directive, RESOLVER_DIRECTIVE_NAME, "operation")?,
            kind,
        })
    }
}

/// Declares that `subgraph` can supply the resolver variable `name` by
/// selecting the field `select` out of an entity it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableAnnotation {
    pub subgraph: String,
    pub name: String,
    pub select: String,
}

impl VariableAnnotation {
    pub fn new(
        subgraph: impl Into<String>,
        name: impl Into<String>,
        select: impl Into<String>,
    ) -> Self {
        Self {
            subgraph: subgraph.into(),
            name: name.into(),
            select: select.into(),
        }
    }

    pub fn to_directive(&self) -> Directive {
        Directive {
            name: name!("variable"),
            arguments: vec![
                string_argument("subgraph", &self.subgraph),
                string_argument("name", &self.name),
                string_argument("select", &self.select),
            ],
        }
    }

    pub fn from_directive(directive: &Directive) -> Result<Self, AnnotationError> {
        Ok(Self {
            subgraph: require_string(directive, VARIABLE_DIRECTIVE_NAME, "subgraph")?,
            name: require_string(directive, VARIABLE_DIRECTIVE_NAME, "name")?,
            select: require_string(directive, VARIABLE_DIRECTIVE_NAME, "select")?,
        })
    }
}

pub fn sources_on_type(
    directives: &schema::DirectiveList,
) -> Result<Vec<SourceAnnotation>, AnnotationError> {
    directives
        .get_all(SOURCE_DIRECTIVE_NAME)
        .map(|directive| SourceAnnotation::from_directive(directive))
        .collect()
}

pub fn sources_on_field(
    directives: &ast::DirectiveList,
) -> Result<Vec<SourceAnnotation>, AnnotationError> {
    directives
        .get_all(SOURCE_DIRECTIVE_NAME)
        .map(|directive| SourceAnnotation::from_directive(directive))
        .collect()
}

pub fn resolvers_on_type(
    directives: &schema::DirectiveList,
) -> Result<Vec<ResolverAnnotation>, AnnotationError> {
    directives
        .get_all(RESOLVER_DIRECTIVE_NAME)
        .map(|directive| ResolverAnnotation::from_directive(directive))
        .collect()
}

pub fn resolvers_on_field(
    directives: &ast::DirectiveList,
) -> Result<Vec<ResolverAnnotation>, AnnotationError> {
    directives
        .get_all(RESOLVER_DIRECTIVE_NAME)
        .map(|directive| ResolverAnnotation::from_directive(directive))
        .collect()
}

pub fn variables_on_type(
    directives: &schema::DirectiveList,
) -> Result<Vec<VariableAnnotation>, AnnotationError> {
    directives
        .get_all(VARIABLE_DIRECTIVE_NAME)
        .map(|directive| VariableAnnotation::from_directive(directive))
        .collect()
}

pub fn variables_on_field(
    directives: &ast::DirectiveList,
) -> Result<Vec<VariableAnnotation>, AnnotationError> {
    directives
        .get_all(VARIABLE_DIRECTIVE_NAME)
        .map(|directive| VariableAnnotation::from_directive(directive))
        .collect()
}

/// Structural directive equality: same name, same arguments in order.
pub(crate) fn same_directive(a: &Directive, b: &Directive) -> bool {
    a.name == b.name
        && a.arguments.len() == b.arguments.len()
        && std::iter::zip(&a.arguments, &b.arguments)
            .all(|(x, y)| x.name == y.name && x.value == y.value)
}

/// Appends the directive unless a structurally equal application is present,
/// keeping annotation accumulation idempotent across merges and analyzer
/// passes.
pub(crate) fn push_unique_component(list: &mut schema::DirectiveList, directive: Directive) {
    if !list.iter().any(|existing| same_directive(existing, &directive)) {
        list.push(Component::new(directive));
    }
}

pub(crate) fn push_unique_node(list: &mut ast::DirectiveList, directive: Directive) {
    if !list.iter().any(|existing| same_directive(existing, &directive)) {
        list.push(Node::new(directive));
    }
}

/// Replaces every application of `directive`'s name with this one.
/// Provenance annotations use replace rather than append so re-composing
/// an already annotated schema does not stack stale copies.
pub(crate) fn set_directive_component(list: &mut schema::DirectiveList, directive: Directive) {
    list.retain(|existing| existing.name != directive.name);
    list.push(Component::new(directive));
}

pub(crate) fn set_directive_node(list: &mut ast::DirectiveList, directive: Directive) {
    list.retain(|existing| existing.name != directive.name);
    list.push(Node::new(directive));
}

/// Appends a variable annotation unless one with the same (subgraph, name)
/// pair exists, regardless of `select`.
pub(crate) fn push_variable_component(
    list: &mut schema::DirectiveList,
    variable: &VariableAnnotation,
) {
    let already_there = list.get_all(VARIABLE_DIRECTIVE_NAME).any(|existing| {
        VariableAnnotation::from_directive(existing)
            .map(|v| v.subgraph == variable.subgraph && v.name == variable.name)
            .unwrap_or(false)
    });
    if !already_there {
        list.push(Component::new(variable.to_directive()));
    }
}

pub(crate) fn string_argument(name: &str, value: &str) -> Node<Argument> {
    Node::new(Argument {
        name: apollo_compiler::Name::new_unchecked(name),
        value: Node::new(Value::String(value.to_string())),
    })
}

fn require_string(
    directive: &Directive,
    directive_name: &'static str,
    argument: &'static str,
) -> Result<String, AnnotationError> {
    let value = directive
        .specified_argument_by_name(argument)
        .ok_or(AnnotationError::MissingArgument {
            directive: directive_name,
            argument,
        })?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or(AnnotationError::InvalidArgument {
            directive: directive_name,
            argument,
            expected: "a string",
        })
}

fn optional_string(directive: &Directive, argument: &str) -> Option<String> {
    directive
        .specified_argument_by_name(argument)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}
