//! Unions annotated subgraph schemas into one supergraph schema.
//!
//! Merging is name-based and order-preserving: the first subgraph to
//! define a type wins its shape, later subgraphs contribute missing
//! fields, enum values, union members and their annotation directives.
//! Shape conflicts never fail the merge; they are recorded as hints for
//! the caller to surface.

use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::EnumType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::InputObjectType;
use apollo_compiler::schema::InterfaceType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::ScalarType;
use apollo_compiler::schema::UnionType;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use indexmap::map::Entry;

use crate::annotations::push_unique_component;
use crate::annotations::push_unique_node;
use crate::rewrite;

#[derive(Default)]
pub(crate) struct Merger {
    hints: Vec<String>,
}

impl Merger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_hints(self) -> Vec<String> {
        self.hints
    }

    fn hint(&mut self, message: String) {
        tracing::debug!(%message, "merge hint");
        self.hints.push(message);
    }

    /// Folds `source` into `target`, in `source` declaration order.
    pub(crate) fn merge_into(&mut self, target: &mut Schema, source: Schema) {
        let source_definition = source.schema_definition;
        let source_directive_definitions = source.directive_definitions;
        let source_types = source.types;

        for (name, ty) in source_types {
            if rewrite::is_built_in_type(&name) {
                continue;
            }
            match target.types.entry(name) {
                Entry::Vacant(vacant) => {
                    vacant.insert(ty);
                }
                Entry::Occupied(mut occupied) => {
                    let name = occupied.key().clone();
                    self.merge_types(&name, occupied.get_mut(), &ty);
                }
            }
        }

        for (name, definition) in source_directive_definitions {
            target.directive_definitions.entry(name).or_insert(definition);
        }

        let target_definition = target.schema_definition.make_mut();
        for directive in source_definition.directives.iter() {
            push_unique_component(&mut target_definition.directives, (***directive).clone());
        }
        if target_definition.query.is_none() {
            target_definition.query = source_definition.query.clone();
        }
        if target_definition.mutation.is_none() {
            target_definition.mutation = source_definition.mutation.clone();
        }
        if target_definition.subscription.is_none() {
            target_definition.subscription = source_definition.subscription.clone();
        }
    }

    fn merge_types(&mut self, name: &Name, existing: &mut ExtendedType, incoming: &ExtendedType) {
        match (existing, incoming) {
            (ExtendedType::Object(a), ExtendedType::Object(b)) => {
                self.merge_object(name, a.make_mut(), b);
            }
            (ExtendedType::Interface(a), ExtendedType::Interface(b)) => {
                self.merge_interface(name, a.make_mut(), b);
            }
            (ExtendedType::Union(a), ExtendedType::Union(b)) => {
                Self::merge_union(a.make_mut(), b);
            }
            (ExtendedType::Enum(a), ExtendedType::Enum(b)) => {
                Self::merge_enum(a.make_mut(), b);
            }
            (ExtendedType::Scalar(a), ExtendedType::Scalar(b)) => {
                Self::merge_scalar(a.make_mut(), b);
            }
            (ExtendedType::InputObject(a), ExtendedType::InputObject(b)) => {
                self.merge_input_object(name, a.make_mut(), b);
            }
            _ => {
                self.hint(format!(
                    "type `{name}` is defined with different kinds across subgraphs, keeping the first definition"
                ));
            }
        }
    }

    fn merge_object(&mut self, name: &Name, target: &mut ObjectType, source: &ObjectType) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
        for interface in &source.implements_interfaces {
            if !target
                .implements_interfaces
                .iter()
                .any(|existing| existing.name == interface.name)
            {
                target
                    .implements_interfaces
                    .insert(ComponentName::from(interface.name.clone()));
            }
        }
        for (field_name, field) in &source.fields {
            match target.fields.entry(field_name.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(field.clone());
                }
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    if existing.ty != field.ty {
                        self.hint(format!(
                            "field `{name}.{field_name}` has conflicting types `{}` and `{}`, keeping the first",
                            existing.ty, field.ty,
                        ));
                    }
                    let existing = existing.make_mut();
                    for directive in field.directives.iter() {
                        push_unique_node(&mut existing.directives, (**directive).clone());
                    }
                }
            }
        }
    }

    fn merge_interface(&mut self, name: &Name, target: &mut InterfaceType, source: &InterfaceType) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
        for interface in &source.implements_interfaces {
            if !target
                .implements_interfaces
                .iter()
                .any(|existing| existing.name == interface.name)
            {
                target
                    .implements_interfaces
                    .insert(ComponentName::from(interface.name.clone()));
            }
        }
        for (field_name, field) in &source.fields {
            match target.fields.entry(field_name.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(field.clone());
                }
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    if existing.ty != field.ty {
                        self.hint(format!(
                            "field `{name}.{field_name}` has conflicting types `{}` and `{}`, keeping the first",
                            existing.ty, field.ty,
                        ));
                    }
                    let existing = existing.make_mut();
                    for directive in field.directives.iter() {
                        push_unique_node(&mut existing.directives, (**directive).clone());
                    }
                }
            }
        }
    }

    fn merge_union(target: &mut UnionType, source: &UnionType) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
        for member in &source.members {
            if !target.members.iter().any(|existing| existing.name == member.name) {
                target.members.insert(ComponentName::from(member.name.clone()));
            }
        }
    }

    fn merge_enum(target: &mut EnumType, source: &EnumType) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
        for (value_name, value) in &source.values {
            match target.values.entry(value_name.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(value.clone());
                }
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut().make_mut();
                    for directive in value.directives.iter() {
                        push_unique_node(&mut existing.directives, (**directive).clone());
                    }
                }
            }
        }
    }

    fn merge_scalar(target: &mut ScalarType, source: &ScalarType) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
    }

    fn merge_input_object(
        &mut self,
        name: &Name,
        target: &mut InputObjectType,
        source: &InputObjectType,
    ) {
        for directive in source.directives.iter() {
            push_unique_component(&mut target.directives, (***directive).clone());
        }
        for (field_name, field) in &source.fields {
            match target.fields.entry(field_name.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(field.clone());
                }
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    if existing.ty != field.ty {
                        self.hint(format!(
                            "input field `{name}.{field_name}` has conflicting types `{}` and `{}`, keeping the first",
                            existing.ty, field.ty,
                        ));
                    }
                    let existing = existing.make_mut();
                    for directive in field.directives.iter() {
                        push_unique_node(&mut existing.directives, (**directive).clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast;

    use super::*;
    use crate::annotations;

    fn parse(sdl: &str) -> Schema {
        Schema::parse(sdl, "merge-test.graphql").unwrap()
    }

    #[test]
    fn first_definition_wins_and_fields_union() {
        let mut target = parse(
            r#"
            type Query { user: User }
            type User { id: ID name: String }
            "#,
        );
        let source = parse(
            r#"
            type Query { posts: [Post] }
            type User { id: ID email: String }
            type Post { id: ID author: User }
            "#,
        );
        let mut merger = Merger::new();
        merger.merge_into(&mut target, source);

        let query = target.get_object("Query").unwrap();
        assert!(query.fields.contains_key("user"));
        assert!(query.fields.contains_key("posts"));
        let user = target.get_object("User").unwrap();
        assert_eq!(
            user.fields.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            ["id", "name", "email"],
        );
        assert!(target.types.contains_key("Post"));
        assert!(merger.into_hints().is_empty());
    }

    #[test]
    fn conflicting_field_types_keep_first_and_hint() {
        let mut target = parse("type Query { user: User } type User { id: ID }");
        let source = parse("type Query { user: User } type User { id: String }");
        let mut merger = Merger::new();
        merger.merge_into(&mut target, source);

        let user = target.get_object("User").unwrap();
        assert_eq!(user.fields["id"].ty.to_string(), "ID");
        let hints = merger.into_hints();
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("User.id"));
    }

    #[test]
    fn directive_accumulation_is_idempotent() {
        let mut target = parse(
            r#"type Query { u: User } type User @source(subgraph: "a", name: "User") { id: ID }"#,
        );
        let source = parse(
            r#"type Query { u: User } type User @source(subgraph: "a", name: "User") @source(subgraph: "b", name: "Account") { id: ID }"#,
        );
        let mut merger = Merger::new();
        merger.merge_into(&mut target, source);

        let user = target.get_object("User").unwrap();
        let sources = annotations::sources_on_type(&user.directives).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].subgraph, "a");
        assert_eq!(sources[1].subgraph, "b");
    }

    #[test]
    fn enum_values_and_union_members_union() {
        let mut target = parse(
            r#"
            type Query { s: Search }
            union Search = User
            type User { id: ID }
            enum Role { ADMIN }
            "#,
        );
        let source = parse(
            r#"
            type Query { s: Search }
            union Search = Post
            type Post { id: ID }
            enum Role { ADMIN USER }
            "#,
        );
        let mut merger = Merger::new();
        merger.merge_into(&mut target, source);

        let search = target.get_union("Search").unwrap();
        let members: Vec<&str> = search.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(members, ["User", "Post"]);
        let role = match target.types.get("Role").unwrap() {
            ExtendedType::Enum(enum_) => enum_,
            other => panic!("expected enum, got {other:?}"),
        };
        assert!(role.values.contains_key("USER"));
    }

    #[test]
    fn missing_roots_fill_in_from_later_subgraphs() {
        let mut target = parse("type Query { ping: Boolean }");
        let source = parse(
            r#"
            schema { query: Query mutation: Mutation }
            type Query { pong: Boolean }
            type Mutation { write: Boolean }
            "#,
        );
        let mut merger = Merger::new();
        merger.merge_into(&mut target, source);

        assert_eq!(
            target
                .root_operation(ast::OperationType::Mutation)
                .unwrap()
                .as_str(),
            "Mutation"
        );
        assert!(target.types.contains_key("Mutation"));
    }
}
