//! Operation planning.
//!
//! The planner walks a client operation against the annotated supergraph
//! and emits per-subgraph fetch steps. For every selection set it splits
//! fields into ones the current subgraph serves (they stay in the
//! document, aliased back to their original names) and ones that must be
//! fetched elsewhere (they become merge steps keyed by the entity value
//! the `@variable` annotations select).

use apollo_compiler::ast;
use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Fragment;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use graft_composition::annotations;
use graft_composition::ResolverAnnotation;
use graft_composition::ResolverKind;
use graft_composition::VariableAnnotation;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PlanError;
use crate::json_ext::ast_value_to_json;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

/// The kind of operation a plan executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ast::OperationType> for OperationKind {
    fn from(operation_type: ast::OperationType) -> Self {
        match operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// An executable plan for one client operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationPlan {
    pub operation_kind: OperationKind,
    /// One step per client root field, in selection order.
    pub root_steps: Vec<FetchStep>,
    /// The client selection shape the assembled data is trimmed to.
    pub projection: Vec<ProjectionNode>,
}

/// A root-field call against one subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchStep {
    pub subgraph: String,
    /// The rendered operation document sent to the subgraph.
    pub document: String,
    pub operation_name: Option<String>,
    /// Client variables forwarded by name.
    pub variable_names: Vec<String>,
    /// Literal argument values, baked at plan time, keyed by the
    /// resolver's variable names.
    pub bindings: Object,
    /// Where the root field lands in the client response.
    pub response_key: String,
    pub dependents: Vec<MergeStep>,
}

/// A follow-up call fetching fields a parent step could not serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStep {
    pub subgraph: String,
    pub kind: ResolverKind,
    pub document: String,
    pub operation_name: Option<String>,
    /// The resolver variable receiving the selected entity value (a list
    /// of them for `BATCH`).
    pub variable_name: String,
    /// Client variables forwarded by name.
    pub variable_names: Vec<String>,
    /// The response key on the entity whose value keys the resolver.
    pub select: String,
    /// Where the entities live, relative to the parent step's value.
    pub path: Path,
    /// `Some(key)` lands the fetched value at `entity[key]` (field-level
    /// resolver); `None` deep-merges it into the entity (type-level).
    pub field: Option<String>,
    pub dependents: Vec<MergeStep>,
}

/// One field in the client's response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionNode {
    pub response_key: String,
    /// A fixed value for this key (`__typename` on object types).
    pub constant: Option<String>,
    /// Fields reached through a fragment are dropped when absent instead
    /// of nulled, since the fragment may not apply to the runtime type.
    pub from_fragment: bool,
    pub conditions: Vec<IncludeSkip>,
    pub children: Option<Vec<ProjectionNode>>,
}

/// Parsed `@skip` / `@include` pair on one selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Condition {
    Yes,
    No,
    Variable(String),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &ast::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in directives.iter() {
            if include.is_none() && directive.name == "include" {
                include = Condition::parse(directive);
            }
            if skip.is_none() && directive.name == "skip" {
                skip = Condition::parse(directive);
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    fn is_default(&self) -> bool {
        matches!(self.include, Condition::Yes) && matches!(self.skip, Condition::No)
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        self.skip.eval(variables).unwrap_or(false)
            || !self.include.eval(variables).unwrap_or(true)
    }
}

impl Condition {
    fn parse(directive: &Node<ast::Directive>) -> Option<Self> {
        match directive.specified_argument_by_name("if")?.as_ref() {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(variable) => {
                Some(Condition::Variable(variable.as_str().to_owned()))
            }
            _ => None,
        }
    }

    fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(name) => variables.get(name.as_str()).and_then(|v| v.as_bool()),
        }
    }
}

/// Plans `document` against the annotated supergraph.
pub fn plan_operation(
    schema: &Valid<Schema>,
    document: &ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<OperationPlan, PlanError> {
    let operation = document
        .operations
        .get(operation_name)
        .map_err(|_| match operation_name {
            Some(name) => PlanError::UnknownOperation(name.to_string()),
            None => PlanError::MissingOperationName,
        })?;
    Planner {
        schema,
        document,
        operation,
    }
    .plan()
}

struct Planner<'a> {
    schema: &'a Valid<Schema>,
    document: &'a ExecutableDocument,
    operation: &'a Operation,
}

/// Variable declarations accumulated for one subgraph document.
#[derive(Default)]
struct DocVariables {
    /// Variable name to its rendered `$name: Type` declaration.
    declarations: IndexMap<String, String>,
    /// The subset that forwards client-supplied values.
    forwarded: Vec<String>,
}

/// The rendered form of one selection set for one subgraph.
struct Splice {
    /// The braced selection text, or `None` when nothing rendered.
    rendered: Option<String>,
    dependents: Vec<MergeStep>,
    /// Client variables the rendered text references.
    variables: IndexSet<String>,
}

/// Fields at one position routed to the same resolver.
struct Bucket<'a> {
    kind: ResolverKind,
    resolver: ResolverOperation,
    variable_name: String,
    /// Supergraph response key the dispatcher selects off each entity.
    select_key: String,
    /// What that key is called on the serving subgraph, for injection.
    select_local: String,
    fields: Vec<&'a Node<Field>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    subgraph: String,
    operation: String,
    /// Field-level resolvers key per routed field; type-level combine.
    field: Option<String>,
}

struct SpliceAccumulator<'a> {
    parts: Vec<String>,
    dependents: Vec<MergeStep>,
    variables: IndexSet<String>,
    buckets: IndexMap<BucketKey, Bucket<'a>>,
    local_keys: IndexSet<String>,
}

impl<'a> SpliceAccumulator<'a> {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            dependents: Vec::new(),
            variables: IndexSet::new(),
            buckets: IndexMap::new(),
            local_keys: IndexSet::new(),
        }
    }
}

impl<'a> Planner<'a> {
    fn plan(&self) -> Result<OperationPlan, PlanError> {
        let operation_kind = OperationKind::from(self.operation.operation_type);
        if self
            .schema
            .root_operation(self.operation.operation_type)
            .is_none()
        {
            return Err(PlanError::UnsupportedSelection {
                reason: format!("schema defines no {operation_kind} root"),
            });
        }
        let mut root_steps = Vec::new();
        self.plan_root_selections(&self.operation.selection_set, &mut root_steps)?;
        let projection = self.projection_nodes(&self.operation.selection_set, false, &[])?;
        tracing::debug!(
            kind = %operation_kind,
            root_steps = root_steps.len(),
            "planned operation"
        );
        Ok(OperationPlan {
            operation_kind,
            root_steps,
            projection,
        })
    }

    fn plan_root_selections(
        &self,
        selection_set: &'a SelectionSet,
        steps: &mut Vec<FetchStep>,
    ) -> Result<(), PlanError> {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if field.name == "__typename" {
                        continue;
                    }
                    if field.name == "__schema" || field.name == "__type" {
                        return Err(PlanError::IntrospectionNotSupported);
                    }
                    steps.push(self.plan_root_field(&selection_set.ty, field)?);
                }
                Selection::InlineFragment(fragment) => {
                    self.plan_root_selections(&fragment.selection_set, steps)?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.fragment(&spread.fragment_name)?;
                    self.plan_root_selections(&fragment.selection_set, steps)?;
                }
            }
        }
        Ok(())
    }

    fn plan_root_field(
        &self,
        parent_type: &Name,
        field: &'a Node<Field>,
    ) -> Result<FetchStep, PlanError> {
        let definition = self.field_definition(parent_type, &field.name)?;
        let resolvers = annotations::resolvers_on_field(&definition.directives)?;
        let entry = resolvers
            .first()
            .ok_or_else(|| PlanError::UnresolvableField {
                type_name: parent_type.to_string(),
                field_name: field.name.to_string(),
            })?;
        let resolver = ResolverOperation::parse(&entry.subgraph, &entry.operation)?;

        let mut doc_variables = DocVariables::default();
        let mut bindings = Object::default();
        let arguments =
            self.bind_root_arguments(field, &resolver, &mut doc_variables, &mut bindings)?;

        let mut base_path = Path::empty();
        extend_for_lists(&mut base_path, &definition.ty);
        let splice = self.splice_selection_set(&field.selection_set, &entry.subgraph, &base_path)?;
        for name in &splice.variables {
            self.forward_client_variable(&mut doc_variables, name, &entry.subgraph)?;
        }

        let response_key = field.response_key().to_string();
        let mut root_part = String::new();
        if response_key == resolver.root_field_name {
            root_part.push_str(&resolver.root_field_name);
        } else {
            root_part.push_str(&format!("{response_key}: {}", resolver.root_field_name));
        }
        if !arguments.is_empty() {
            root_part.push_str(&format!("({})", arguments.join(", ")));
        }
        let mut directive_variables = IndexSet::new();
        root_part
            .push_str(&self.render_condition_directives(&field.directives, &mut directive_variables));
        for name in &directive_variables {
            self.forward_client_variable(&mut doc_variables, name, &entry.subgraph)?;
        }
        if let Some(rendered) = &splice.rendered {
            root_part.push(' ');
            root_part.push_str(rendered);
        }

        let document = render_document(
            resolver.operation_type,
            resolver.name.as_deref(),
            &doc_variables,
            &root_part,
        );
        Ok(FetchStep {
            subgraph: entry.subgraph.clone(),
            document,
            operation_name: resolver.name.clone(),
            variable_names: doc_variables.forwarded,
            bindings,
            response_key,
            dependents: splice.dependents,
        })
    }

    /// Renders the root field's arguments, binding client literals to the
    /// resolver's variables and forwarding client variable references.
    fn bind_root_arguments(
        &self,
        field: &Node<Field>,
        resolver: &ResolverOperation,
        doc_variables: &mut DocVariables,
        bindings: &mut Object,
    ) -> Result<Vec<String>, PlanError> {
        let mut rendered = Vec::new();
        let client: IndexMap<&str, &Node<ast::Value>> = field
            .arguments
            .iter()
            .map(|argument| (argument.name.as_str(), &argument.value))
            .collect();
        let mut consumed: IndexSet<&str> = IndexSet::new();

        for (name, resolver_value) in &resolver.root_field_arguments {
            match client.get(name.as_str()) {
                Some(client_value) => {
                    consumed.insert(name.as_str());
                    rendered.push(self.bind_argument(
                        name,
                        client_value,
                        resolver_value,
                        resolver,
                        doc_variables,
                        bindings,
                    )?);
                }
                None => {
                    // the resolver pins this argument itself
                    rendered.push(format!("{name}: {resolver_value}"));
                    for variable in variable_references(resolver_value) {
                        self.declare_resolver_variable(doc_variables, resolver, &variable)?;
                    }
                }
            }
        }
        for argument in &field.arguments {
            if consumed.contains(argument.name.as_str()) {
                continue;
            }
            for variable in variable_references(&argument.value) {
                self.forward_client_variable(doc_variables, &variable, &resolver.subgraph)?;
            }
            rendered.push(format!("{}: {}", argument.name, argument.value));
        }
        Ok(rendered)
    }

    fn bind_argument(
        &self,
        name: &str,
        client_value: &Node<ast::Value>,
        resolver_value: &Node<ast::Value>,
        resolver: &ResolverOperation,
        doc_variables: &mut DocVariables,
        bindings: &mut Object,
    ) -> Result<String, PlanError> {
        if let ast::Value::Variable(variable) = client_value.as_ref() {
            self.forward_client_variable(doc_variables, variable.as_str(), &resolver.subgraph)?;
            return Ok(format!("{name}: ${variable}"));
        }
        let resolver_variable = match resolver_value.as_ref() {
            ast::Value::Variable(variable) => Some(variable),
            _ => None,
        };
        match (resolver_variable, ast_value_to_json(client_value)) {
            (Some(variable), Some(json)) => {
                self.declare_resolver_variable(doc_variables, resolver, variable.as_str())?;
                bindings.insert(variable.as_str(), json);
                Ok(format!("{name}: ${variable}"))
            }
            _ => {
                // a literal holding nested variable references, or an
                // argument the resolver does not bind through a variable:
                // inline the client value as written
                for variable in variable_references(client_value) {
                    self.forward_client_variable(doc_variables, &variable, &resolver.subgraph)?;
                }
                Ok(format!("{name}: {client_value}"))
            }
        }
    }

    fn splice_selection_set(
        &self,
        selection_set: &'a SelectionSet,
        subgraph: &str,
        path: &Path,
    ) -> Result<Splice, PlanError> {
        let mut acc = SpliceAccumulator::new();
        self.splice_into(&mut acc, &selection_set.selections, &selection_set.ty, subgraph, path)?;
        self.finish_splice(acc, &selection_set.ty, path)
    }

    fn splice_fields(
        &self,
        fields: &[&'a Node<Field>],
        parent_type: &Name,
        subgraph: &str,
        path: &Path,
    ) -> Result<Splice, PlanError> {
        let mut acc = SpliceAccumulator::new();
        for field in fields {
            self.splice_one_field(&mut acc, field, parent_type, subgraph, path)?;
        }
        self.finish_splice(acc, parent_type, path)
    }

    fn splice_into(
        &self,
        acc: &mut SpliceAccumulator<'a>,
        selections: &'a [Selection],
        parent_type: &Name,
        subgraph: &str,
        path: &Path,
    ) -> Result<(), PlanError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    self.splice_one_field(acc, field, parent_type, subgraph, path)?;
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment.type_condition.as_ref().unwrap_or(parent_type);
                    self.splice_fragment(
                        acc,
                        &fragment.selection_set,
                        condition,
                        &fragment.directives,
                        subgraph,
                        path,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.fragment(&spread.fragment_name)?;
                    self.splice_fragment(
                        acc,
                        &fragment.selection_set,
                        &fragment.selection_set.ty,
                        &spread.directives,
                        subgraph,
                        path,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Inlines a named or inline fragment, narrowing the parent type.
    fn splice_fragment(
        &self,
        acc: &mut SpliceAccumulator<'a>,
        selection_set: &'a SelectionSet,
        condition: &Name,
        directives: &ast::DirectiveList,
        subgraph: &str,
        path: &Path,
    ) -> Result<(), PlanError> {
        let mut inner = SpliceAccumulator::new();
        self.splice_into(&mut inner, &selection_set.selections, condition, subgraph, path)?;
        let inner = self.finish_splice(inner, condition, path)?;
        acc.dependents.extend(inner.dependents);
        acc.variables.extend(inner.variables);
        if let Some(rendered) = inner.rendered {
            let local_condition = self.subgraph_type_name(condition, subgraph);
            let condition_directives =
                self.render_condition_directives(directives, &mut acc.variables);
            acc.parts
                .push(format!("... on {local_condition}{condition_directives} {rendered}"));
        }
        Ok(())
    }

    fn splice_one_field(
        &self,
        acc: &mut SpliceAccumulator<'a>,
        field: &'a Node<Field>,
        parent_type: &Name,
        subgraph: &str,
        path: &Path,
    ) -> Result<(), PlanError> {
        let response_key = field.response_key().to_string();
        if field.name == "__typename" {
            acc.local_keys.insert(response_key);
            let rendered = self.render_plain_field(field, "__typename", None, &mut acc.variables);
            acc.parts.push(rendered);
            return Ok(());
        }
        let definition = self.field_definition(parent_type, &field.name)?;
        let sources = annotations::sources_on_field(&definition.directives)?;
        match sources.iter().find(|source| source.subgraph == subgraph) {
            Some(source) => {
                acc.local_keys.insert(response_key.clone());
                let mut child_path = path.clone();
                child_path.push(PathElement::Key(response_key));
                extend_for_lists(&mut child_path, &definition.ty);
                let child = if field.selection_set.selections.is_empty() {
                    None
                } else {
                    let child =
                        self.splice_selection_set(&field.selection_set, subgraph, &child_path)?;
                    acc.dependents.extend(child.dependents);
                    acc.variables.extend(child.variables);
                    child.rendered
                };
                let rendered = self.render_plain_field(
                    field,
                    &source.name,
                    child.as_deref(),
                    &mut acc.variables,
                );
                acc.parts.push(rendered);
            }
            None => self.route_field(acc, field, &definition.directives, parent_type, subgraph)?,
        }
        Ok(())
    }

    /// Picks a resolver for a field the current subgraph cannot serve.
    ///
    /// Field-level resolvers win; otherwise any type-level resolver whose
    /// subgraph sources the field. Candidates that cannot supply their
    /// entity variable from the current subgraph are passed over.
    fn route_field(
        &self,
        acc: &mut SpliceAccumulator<'a>,
        field: &'a Node<Field>,
        field_directives: &ast::DirectiveList,
        parent_type: &Name,
        subgraph: &str,
    ) -> Result<(), PlanError> {
        let field_resolvers = annotations::resolvers_on_field(field_directives)?;
        if !field_resolvers.is_empty() {
            let field_variables = annotations::variables_on_field(field_directives)?;
            let mut failure = None;
            for entry in &field_resolvers {
                match self.field_level_bucket(field, entry, &field_variables, parent_type, subgraph)
                {
                    Ok((key, bucket)) => {
                        acc.buckets.insert(key, bucket);
                        return Ok(());
                    }
                    Err(error) => failure = Some(error),
                }
            }
            return Err(failure.unwrap_or_else(|| PlanError::UnresolvableField {
                type_name: parent_type.to_string(),
                field_name: field.name.to_string(),
            }));
        }

        let Some(parent) = self.schema.types.get(parent_type) else {
            return Err(PlanError::UnresolvableField {
                type_name: parent_type.to_string(),
                field_name: field.name.to_string(),
            });
        };
        let type_resolvers = annotations::resolvers_on_type(parent.directives())?;
        let type_variables = annotations::variables_on_type(parent.directives())?;
        let sources = annotations::sources_on_field(field_directives)?;
        let mut failure = None;
        for entry in &type_resolvers {
            if !sources.iter().any(|source| source.subgraph == entry.subgraph) {
                continue;
            }
            match self.type_level_bucket(entry, &type_variables, parent_type, subgraph) {
                Ok((key, bucket)) => {
                    match acc.buckets.get_mut(&key) {
                        Some(existing) => existing.fields.push(field),
                        None => {
                            let mut bucket = bucket;
                            bucket.fields.push(field);
                            acc.buckets.insert(key, bucket);
                        }
                    }
                    return Ok(());
                }
                Err(error) => failure = Some(error),
            }
        }
        Err(failure.unwrap_or_else(|| PlanError::UnresolvableField {
            type_name: parent_type.to_string(),
            field_name: field.name.to_string(),
        }))
    }

    fn field_level_bucket(
        &self,
        field: &'a Node<Field>,
        entry: &ResolverAnnotation,
        field_variables: &[VariableAnnotation],
        parent_type: &Name,
        subgraph: &str,
    ) -> Result<(BucketKey, Bucket<'a>), PlanError> {
        let resolver = ResolverOperation::parse(&entry.subgraph, &entry.operation)?;
        let annotation = field_variables
            .iter()
            .find(|variable| {
                variable.subgraph == subgraph && resolver.variables.contains_key(&variable.name)
            })
            .ok_or_else(|| PlanError::MissingVariableBinding {
                subgraph: entry.subgraph.clone(),
                argument: resolver
                    .variables
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_default(),
            })?;
        let (select_key, select_local) =
            self.resolve_select(parent_type, subgraph, &annotation.select)?;
        Ok((
            BucketKey {
                subgraph: entry.subgraph.clone(),
                operation: entry.operation.clone(),
                field: Some(field.response_key().to_string()),
            },
            Bucket {
                kind: entry.effective_kind(),
                resolver,
                variable_name: annotation.name.clone(),
                select_key,
                select_local,
                fields: vec![field],
            },
        ))
    }

    fn type_level_bucket(
        &self,
        entry: &ResolverAnnotation,
        type_variables: &[VariableAnnotation],
        parent_type: &Name,
        subgraph: &str,
    ) -> Result<(BucketKey, Bucket<'a>), PlanError> {
        let resolver = ResolverOperation::parse(&entry.subgraph, &entry.operation)?;
        let annotation = type_variables
            .iter()
            .find(|variable| {
                variable.subgraph == subgraph && resolver.variables.contains_key(&variable.name)
            })
            .ok_or_else(|| PlanError::MissingVariableBinding {
                subgraph: entry.subgraph.clone(),
                argument: resolver
                    .variables
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_default(),
            })?;
        let (select_key, select_local) =
            self.resolve_select(parent_type, subgraph, &annotation.select)?;
        Ok((
            BucketKey {
                subgraph: entry.subgraph.clone(),
                operation: entry.operation.clone(),
                field: None,
            },
            Bucket {
                kind: entry.effective_kind(),
                resolver,
                variable_name: annotation.name.clone(),
                select_key,
                select_local,
                fields: Vec::new(),
            },
        ))
    }

    /// Resolves a `@variable` select name to the supergraph response key
    /// and the current subgraph's local field name.
    ///
    /// Select names are recorded against the subgraph's original schema,
    /// so they match either the field's supergraph name or its `@source`
    /// name for this subgraph.
    fn resolve_select(
        &self,
        parent_type: &Name,
        subgraph: &str,
        select: &str,
    ) -> Result<(String, String), PlanError> {
        let unavailable = || PlanError::UnsupportedSelection {
            reason: format!(
                "key field '{select}' of '{parent_type}' is not served by subgraph '{subgraph}'"
            ),
        };
        let Some(parent) = self.schema.types.get(parent_type) else {
            return Err(unavailable());
        };
        let fields: Box<
            dyn Iterator<Item = (&Name, &apollo_compiler::schema::Component<ast::FieldDefinition>)>
                + '_,
        > = match parent {
                ExtendedType::Object(object) => Box::new(object.fields.iter()),
                ExtendedType::Interface(interface) => Box::new(interface.fields.iter()),
                _ => return Err(unavailable()),
            };
        for (name, definition) in fields {
            let sources = annotations::sources_on_field(&definition.directives)?;
            let Some(source) = sources.iter().find(|source| source.subgraph == subgraph) else {
                continue;
            };
            if source.name == select || name.as_str() == select {
                return Ok((name.to_string(), source.name.clone()));
            }
        }
        Err(unavailable())
    }

    /// Turns accumulated buckets into merge steps and injects each
    /// entity key into the local selection when the client skipped it.
    fn finish_splice(
        &self,
        mut acc: SpliceAccumulator<'a>,
        parent_type: &Name,
        path: &Path,
    ) -> Result<Splice, PlanError> {
        let buckets = std::mem::take(&mut acc.buckets);
        for (key, bucket) in buckets {
            if !acc.local_keys.contains(&bucket.select_key) {
                acc.local_keys.insert(bucket.select_key.clone());
                acc.parts.push(if bucket.select_key == bucket.select_local {
                    bucket.select_key.clone()
                } else {
                    format!("{}: {}", bucket.select_key, bucket.select_local)
                });
            }
            let step = self.build_merge_step(key, bucket, parent_type, path, &mut acc.variables)?;
            acc.dependents.push(step);
        }
        Ok(Splice {
            rendered: if acc.parts.is_empty() {
                None
            } else {
                Some(format!("{{ {} }}", acc.parts.join(" ")))
            },
            dependents: acc.dependents,
            variables: acc.variables,
        })
    }

    fn build_merge_step(
        &self,
        key: BucketKey,
        bucket: Bucket<'a>,
        parent_type: &Name,
        path: &Path,
        outer_variables: &mut IndexSet<String>,
    ) -> Result<MergeStep, PlanError> {
        let mut doc_variables = DocVariables::default();
        self.declare_resolver_variable(&mut doc_variables, &bucket.resolver, &bucket.variable_name)?;
        for (_, value) in &bucket.resolver.root_field_arguments {
            for variable in variable_references(value) {
                self.declare_resolver_variable(&mut doc_variables, &bucket.resolver, &variable)?;
            }
        }

        let splice = match &key.field {
            Some(response_key) => {
                let field = bucket.fields[0];
                let definition = self.field_definition(parent_type, &field.name)?;
                let mut base = Path::empty();
                base.push(PathElement::Key(response_key.clone()));
                extend_for_lists(&mut base, &definition.ty);
                if field.selection_set.selections.is_empty() {
                    Splice {
                        rendered: None,
                        dependents: Vec::new(),
                        variables: IndexSet::new(),
                    }
                } else {
                    self.splice_selection_set(&field.selection_set, &key.subgraph, &base)?
                }
            }
            None => self.splice_fields(&bucket.fields, parent_type, &key.subgraph, &Path::empty())?,
        };
        for name in &splice.variables {
            self.forward_client_variable(&mut doc_variables, name, &key.subgraph)?;
            outer_variables.insert(name.clone());
        }

        let mut root_part = bucket.resolver.root_field_name.clone();
        if !bucket.resolver.root_field_arguments.is_empty() {
            let arguments = bucket
                .resolver
                .root_field_arguments
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .join(", ");
            root_part.push_str(&format!("({arguments})"));
        }
        if let Some(rendered) = &splice.rendered {
            root_part.push(' ');
            root_part.push_str(rendered);
        }
        let document = render_document(
            bucket.resolver.operation_type,
            bucket.resolver.name.as_deref(),
            &doc_variables,
            &root_part,
        );
        Ok(MergeStep {
            subgraph: key.subgraph,
            kind: bucket.kind,
            document,
            operation_name: bucket.resolver.name.clone(),
            variable_name: bucket.variable_name,
            variable_names: doc_variables.forwarded,
            select: bucket.select_key,
            path: path.clone(),
            field: key.field,
            dependents: splice.dependents,
        })
    }

    fn render_plain_field(
        &self,
        field: &Node<Field>,
        local_name: &str,
        child: Option<&str>,
        variables: &mut IndexSet<String>,
    ) -> String {
        let mut out = String::new();
        let response_key = field.response_key();
        if response_key.as_str() == local_name {
            out.push_str(local_name);
        } else {
            out.push_str(&format!("{response_key}: {local_name}"));
        }
        if !field.arguments.is_empty() {
            let arguments = field
                .arguments
                .iter()
                .map(|argument| format!("{}: {}", argument.name, argument.value))
                .join(", ");
            out.push_str(&format!("({arguments})"));
            for argument in &field.arguments {
                for variable in variable_references(&argument.value) {
                    variables.insert(variable);
                }
            }
        }
        out.push_str(&self.render_condition_directives(&field.directives, variables));
        if let Some(child) = child {
            out.push(' ');
            out.push_str(child);
        }
        out
    }

    /// Renders `@skip` / `@include` for pass-through, collecting their
    /// variable references. Other executable directives are dropped since
    /// subgraphs never defined them.
    fn render_condition_directives(
        &self,
        directives: &ast::DirectiveList,
        variables: &mut IndexSet<String>,
    ) -> String {
        let mut out = String::new();
        for directive in directives.iter() {
            if directive.name != "skip" && directive.name != "include" {
                continue;
            }
            let Some(condition) = directive.specified_argument_by_name("if") else {
                continue;
            };
            for variable in variable_references(condition) {
                variables.insert(variable);
            }
            out.push_str(&format!(" @{}(if: {})", directive.name, condition));
        }
        out
    }

    fn declare_resolver_variable(
        &self,
        doc_variables: &mut DocVariables,
        resolver: &ResolverOperation,
        name: &str,
    ) -> Result<(), PlanError> {
        if doc_variables.declarations.contains_key(name) {
            return Ok(());
        }
        let ty = resolver.variables.get(name).ok_or_else(|| {
            PlanError::InvalidResolverOperation {
                subgraph: resolver.subgraph.clone(),
                reason: format!("operation does not declare ${name}"),
            }
        })?;
        doc_variables
            .declarations
            .insert(name.to_string(), format!("${name}: {ty}"));
        Ok(())
    }

    fn forward_client_variable(
        &self,
        doc_variables: &mut DocVariables,
        name: &str,
        subgraph: &str,
    ) -> Result<(), PlanError> {
        if doc_variables.declarations.contains_key(name) {
            return Ok(());
        }
        let definition = self
            .operation
            .variables
            .iter()
            .find(|variable| variable.name.as_str() == name)
            .ok_or_else(|| PlanError::UnsupportedSelection {
                reason: format!("variable '${name}' is not declared by the operation"),
            })?;
        let mut rendered = format!("${name}: {}", self.subgraph_type(&definition.ty, subgraph));
        if let Some(default) = &definition.default_value {
            rendered.push_str(&format!(" = {default}"));
        }
        doc_variables.declarations.insert(name.to_string(), rendered);
        doc_variables.forwarded.push(name.to_string());
        Ok(())
    }

    /// Renders a supergraph type reference with its base name mapped to
    /// what the subgraph calls it.
    fn subgraph_type(&self, ty: &ast::Type, subgraph: &str) -> String {
        match ty {
            ast::Type::Named(name) => self.subgraph_type_name(name, subgraph),
            ast::Type::NonNullNamed(name) => format!("{}!", self.subgraph_type_name(name, subgraph)),
            ast::Type::List(inner) => format!("[{}]", self.subgraph_type(inner, subgraph)),
            ast::Type::NonNullList(inner) => format!("[{}]!", self.subgraph_type(inner, subgraph)),
        }
    }

    fn subgraph_type_name(&self, name: &Name, subgraph: &str) -> String {
        self.schema
            .types
            .get(name)
            .and_then(|ty| annotations::sources_on_type(ty.directives()).ok())
            .and_then(|sources| {
                sources
                    .into_iter()
                    .find(|source| source.subgraph == subgraph)
            })
            .map(|source| source.name)
            .unwrap_or_else(|| name.to_string())
    }

    fn projection_nodes(
        &self,
        selection_set: &'a SelectionSet,
        from_fragment: bool,
        inherited: &[IncludeSkip],
    ) -> Result<Vec<ProjectionNode>, PlanError> {
        let mut nodes = Vec::new();
        self.collect_projection(selection_set, from_fragment, inherited, &mut nodes)?;
        Ok(nodes)
    }

    fn collect_projection(
        &self,
        selection_set: &'a SelectionSet,
        from_fragment: bool,
        inherited: &[IncludeSkip],
        nodes: &mut Vec<ProjectionNode>,
    ) -> Result<(), PlanError> {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    let mut conditions = inherited.to_vec();
                    let own = IncludeSkip::parse(&field.directives);
                    if !own.is_default() {
                        conditions.push(own);
                    }
                    let constant = if field.name == "__typename" {
                        self.concrete_type_name(&selection_set.ty)
                    } else {
                        None
                    };
                    let children = if field.selection_set.selections.is_empty() {
                        None
                    } else {
                        Some(self.projection_nodes(&field.selection_set, false, &[])?)
                    };
                    nodes.push(ProjectionNode {
                        response_key: field.response_key().to_string(),
                        constant,
                        from_fragment,
                        conditions,
                        children,
                    });
                }
                Selection::InlineFragment(fragment) => {
                    let mut conditions = inherited.to_vec();
                    let own = IncludeSkip::parse(&fragment.directives);
                    if !own.is_default() {
                        conditions.push(own);
                    }
                    self.collect_projection(&fragment.selection_set, true, &conditions, nodes)?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.fragment(&spread.fragment_name)?;
                    let mut conditions = inherited.to_vec();
                    let own = IncludeSkip::parse(&spread.directives);
                    if !own.is_default() {
                        conditions.push(own);
                    }
                    self.collect_projection(&fragment.selection_set, true, &conditions, nodes)?;
                }
            }
        }
        Ok(())
    }

    /// `__typename` values are pinned for object types; abstract types
    /// pass the fetched value through.
    fn concrete_type_name(&self, type_name: &Name) -> Option<String> {
        match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(_)) => Some(type_name.to_string()),
            _ => None,
        }
    }

    fn field_definition(
        &self,
        type_name: &Name,
        field_name: &Name,
    ) -> Result<&'a apollo_compiler::schema::Component<ast::FieldDefinition>, PlanError> {
        self.schema
            .type_field(type_name, field_name)
            .map_err(|_| PlanError::UnresolvableField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })
    }

    fn fragment(&self, name: &Name) -> Result<&'a Node<Fragment>, PlanError> {
        self.document
            .fragments
            .get(name)
            .ok_or_else(|| PlanError::UnsupportedSelection {
                reason: format!("fragment '{name}' is not defined"),
            })
    }
}

/// A parsed `@resolver` operation.
struct ResolverOperation {
    subgraph: String,
    operation_type: ast::OperationType,
    name: Option<String>,
    /// Declared variable name to its rendered type (and default).
    variables: IndexMap<String, String>,
    root_field_name: String,
    root_field_arguments: Vec<(String, Node<ast::Value>)>,
}

impl ResolverOperation {
    fn parse(subgraph: &str, operation: &str) -> Result<Self, PlanError> {
        let invalid = |reason: String| PlanError::InvalidResolverOperation {
            subgraph: subgraph.to_string(),
            reason,
        };
        let document = ast::Document::parse(operation, "resolver.graphql")
            .map_err(|error| invalid(error.to_string()))?;
        let operation = document
            .definitions
            .iter()
            .find_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            })
            .ok_or_else(|| invalid("document contains no operation".to_string()))?;
        let mut variables = IndexMap::new();
        for variable in &operation.variables {
            let mut rendered = variable.ty.to_string();
            if let Some(default) = &variable.default_value {
                rendered.push_str(&format!(" = {default}"));
            }
            variables.insert(variable.name.to_string(), rendered);
        }
        let mut fields = operation
            .selection_set
            .iter()
            .filter_map(|selection| match selection {
                ast::Selection::Field(field) => Some(field),
                _ => None,
            });
        let root_field = fields
            .next()
            .ok_or_else(|| invalid("operation must select exactly one root field".to_string()))?;
        if fields.next().is_some() {
            return Err(invalid(
                "operation must select exactly one root field".to_string(),
            ));
        }
        Ok(Self {
            subgraph: subgraph.to_string(),
            operation_type: operation.operation_type,
            name: operation.name.as_ref().map(|name| name.to_string()),
            variables,
            root_field_name: root_field.name.to_string(),
            root_field_arguments: root_field
                .arguments
                .iter()
                .map(|argument| (argument.name.to_string(), argument.value.clone()))
                .collect(),
        })
    }
}

fn render_document(
    operation_type: ast::OperationType,
    name: Option<&str>,
    variables: &DocVariables,
    root_part: &str,
) -> String {
    let mut document = String::from(operation_keyword(operation_type));
    if let Some(name) = name {
        document.push(' ');
        document.push_str(name);
    }
    if !variables.declarations.is_empty() {
        document.push_str(&format!("({})", variables.declarations.values().join(", ")));
    }
    document.push_str(&format!(" {{ {root_part} }}"));
    document
}

fn operation_keyword(operation_type: ast::OperationType) -> &'static str {
    match operation_type {
        ast::OperationType::Query => "query",
        ast::OperationType::Mutation => "mutation",
        ast::OperationType::Subscription => "subscription",
    }
}

fn extend_for_lists(path: &mut Path, ty: &ast::Type) {
    match ty {
        ast::Type::List(inner) | ast::Type::NonNullList(inner) => {
            path.push(PathElement::Flatten);
            extend_for_lists(path, inner);
        }
        ast::Type::Named(_) | ast::Type::NonNullNamed(_) => {}
    }
}

fn variable_references(value: &ast::Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_variable_references(value, &mut names);
    names
}

fn collect_variable_references(value: &ast::Value, names: &mut Vec<String>) {
    match value {
        ast::Value::Variable(name) => names.push(name.to_string()),
        ast::Value::List(items) => {
            for item in items {
                collect_variable_references(item, names);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_variable_references(value, names);
            }
        }
        _ => {}
    }
}
