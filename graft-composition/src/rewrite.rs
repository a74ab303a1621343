//! Schema rewriting helpers shared by the composer and the transforms.

use apollo_compiler::ast;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ComponentOrigin;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use indexmap::IndexSet;

/// Built-in scalars and introspection machinery never participate in
/// annotation, renaming, or merging.
pub(crate) fn is_built_in_type(name: &str) -> bool {
    name.starts_with("__") || matches!(name, "Int" | "Float" | "String" | "Boolean" | "ID")
}

/// The canonical root type name for each operation kind.
pub(crate) fn canonical_root_name(operation: ast::OperationType) -> Name {
    match operation {
        ast::OperationType::Query => apollo_compiler::name!("Query"),
        ast::OperationType::Mutation => apollo_compiler::name!("Mutation"),
        ast::OperationType::Subscription => apollo_compiler::name!("Subscription"),
    }
}

pub(crate) fn root_type_names(schema: &Schema) -> IndexSet<Name> {
    [
        ast::OperationType::Query,
        ast::OperationType::Mutation,
        ast::OperationType::Subscription,
    ]
    .into_iter()
    .filter_map(|operation| schema.root_operation(operation).cloned())
    .collect()
}

pub(crate) fn type_mentions(ty: &ast::Type, name: &str) -> bool {
    ty.inner_named_type().as_str() == name
}

pub(crate) fn rename_in_type(ty: &ast::Type, old: &str, new: &Name) -> ast::Type {
    match ty {
        ast::Type::Named(inner) if inner.as_str() == old => ast::Type::Named(new.clone()),
        ast::Type::NonNullNamed(inner) if inner.as_str() == old => {
            ast::Type::NonNullNamed(new.clone())
        }
        ast::Type::List(inner) => ast::Type::List(Box::new(rename_in_type(inner, old, new))),
        ast::Type::NonNullList(inner) => {
            ast::Type::NonNullList(Box::new(rename_in_type(inner, old, new)))
        }
        other => other.clone(),
    }
}

fn rename_component_names(
    set: &apollo_compiler::collections::IndexSet<ComponentName>,
    old: &str,
    new: &Name,
) -> apollo_compiler::collections::IndexSet<ComponentName> {
    set.iter()
        .map(|component| {
            if component.name.as_str() == old {
                ComponentName {
                    origin: ComponentOrigin::Definition,
                    name: new.clone(),
                }
            } else {
                component.clone()
            }
        })
        .collect()
}

/// Renames a type definition and rewrites every reference to it: field and
/// argument types, input field types, union membership, implemented
/// interfaces, directive definition arguments, and schema roots.
///
/// Returns `false` (and leaves the schema untouched) when `old` is absent or
/// `new` is already taken.
pub(crate) fn rename_type(schema: &mut Schema, old: &Name, new: &Name) -> bool {
    if old == new || schema.types.contains_key(new) || !schema.types.contains_key(old) {
        return old == new;
    }
    let Some(mut ty) = schema.types.shift_remove(old) else {
        return false;
    };
    match &mut ty {
        ExtendedType::Scalar(node) => node.make_mut().name = new.clone(),
        ExtendedType::Object(node) => node.make_mut().name = new.clone(),
        ExtendedType::Interface(node) => node.make_mut().name = new.clone(),
        ExtendedType::Union(node) => node.make_mut().name = new.clone(),
        ExtendedType::Enum(node) => node.make_mut().name = new.clone(),
        ExtendedType::InputObject(node) => node.make_mut().name = new.clone(),
    }
    schema.types.insert(new.clone(), ty);

    for ty in schema.types.values_mut() {
        match ty {
            ExtendedType::Object(object) => {
                if object
                    .implements_interfaces
                    .iter()
                    .any(|i| i.name.as_str() == old.as_str())
                {
                    let object = object.make_mut();
                    object.implements_interfaces =
                        rename_component_names(&object.implements_interfaces, old, new);
                }
                rename_in_fields(object, old, new);
            }
            ExtendedType::Interface(interface) => {
                if interface
                    .implements_interfaces
                    .iter()
                    .any(|i| i.name.as_str() == old.as_str())
                {
                    let interface = interface.make_mut();
                    interface.implements_interfaces =
                        rename_component_names(&interface.implements_interfaces, old, new);
                }
                rename_in_interface_fields(interface, old, new);
            }
            ExtendedType::Union(union_) => {
                if union_.members.iter().any(|m| m.name.as_str() == old.as_str()) {
                    let union_ = union_.make_mut();
                    union_.members = rename_component_names(&union_.members, old, new);
                }
            }
            ExtendedType::InputObject(input_object) => {
                let touched = input_object
                    .fields
                    .values()
                    .any(|field| type_mentions(&field.ty, old));
                if touched {
                    for field in input_object.make_mut().fields.values_mut() {
                        if type_mentions(&field.ty, old) {
                            let field = field.make_mut();
                            field.ty = apollo_compiler::Node::new(rename_in_type(
                                &field.ty, old, new,
                            ));
                        }
                    }
                }
            }
            ExtendedType::Scalar(_) | ExtendedType::Enum(_) => {}
        }
    }

    for definition in schema.directive_definitions.values_mut() {
        let touched = definition
            .arguments
            .iter()
            .any(|argument| type_mentions(&argument.ty, old));
        if touched {
            for argument in &mut definition.make_mut().arguments {
                if type_mentions(&argument.ty, old) {
                    let argument = argument.make_mut();
                    argument.ty =
                        apollo_compiler::Node::new(rename_in_type(&argument.ty, old, new));
                }
            }
        }
    }

    let roots = schema.schema_definition.make_mut();
    for root in [&mut roots.query, &mut roots.mutation, &mut roots.subscription] {
        if let Some(root) = root {
            if root.name.as_str() == old.as_str() {
                root.name = new.clone();
            }
        }
    }
    true
}

/// Renames fields on object and interface types, keyed by
/// `(type name, field name)`. Returning `None` keeps a field as is.
///
/// A rename that would collide with another field's final name is dropped
/// rather than overwriting it, so no field is ever lost.
pub(crate) fn rename_fields(
    schema: &mut Schema,
    mut rename: impl FnMut(&Name, &Name) -> Option<Name>,
) {
    let type_names: Vec<Name> = schema.types.keys().cloned().collect();
    for type_name in type_names {
        let planned = {
            let Some(ty) = schema.types.get(&type_name) else {
                continue;
            };
            let field_names: Vec<Name> = match ty {
                ExtendedType::Object(object) => object.fields.keys().cloned().collect(),
                ExtendedType::Interface(interface) => interface.fields.keys().cloned().collect(),
                _ => continue,
            };
            plan_renames(&field_names, |old| rename(&type_name, old))
        };
        let Some(planned) = planned else {
            continue;
        };
        match schema.types.get_mut(&type_name) {
            Some(ExtendedType::Object(object)) => {
                let object = object.make_mut();
                object.fields = apply_planned_renames(std::mem::take(&mut object.fields), &planned);
            }
            Some(ExtendedType::Interface(interface)) => {
                let interface = interface.make_mut();
                interface.fields =
                    apply_planned_renames(std::mem::take(&mut interface.fields), &planned);
            }
            _ => {}
        }
    }
}

/// Renames input object fields, keyed by `(type name, field name)`.
pub(crate) fn rename_input_fields(
    schema: &mut Schema,
    mut rename: impl FnMut(&Name, &Name) -> Option<Name>,
) {
    let type_names: Vec<Name> = schema
        .types
        .iter()
        .filter(|(_, ty)| matches!(ty, ExtendedType::InputObject(_)))
        .map(|(name, _)| name.clone())
        .collect();
    for type_name in type_names {
        let planned = {
            let Some(ExtendedType::InputObject(input_object)) = schema.types.get(&type_name)
            else {
                continue;
            };
            let field_names: Vec<Name> = input_object.fields.keys().cloned().collect();
            plan_renames(&field_names, |old| rename(&type_name, old))
        };
        let Some(planned) = planned else {
            continue;
        };
        if let Some(ExtendedType::InputObject(input_object)) = schema.types.get_mut(&type_name) {
            let input_object = input_object.make_mut();
            input_object.fields =
                apply_planned_renames(std::mem::take(&mut input_object.fields), &planned);
        }
    }
}

/// Renames enum values in place, keyed by `(enum name, value name)`.
pub(crate) fn rename_enum_values(
    schema: &mut Schema,
    mut rename: impl FnMut(&Name, &Name) -> Option<Name>,
) {
    let enum_names: Vec<Name> = schema
        .types
        .iter()
        .filter(|(_, ty)| matches!(ty, ExtendedType::Enum(_)))
        .map(|(name, _)| name.clone())
        .collect();
    for enum_name in enum_names {
        let planned = {
            let Some(ExtendedType::Enum(enum_)) = schema.types.get(&enum_name) else {
                continue;
            };
            let value_names: Vec<Name> = enum_.values.keys().cloned().collect();
            plan_renames(&value_names, |old| rename(&enum_name, old))
        };
        let Some(planned) = planned else {
            continue;
        };
        if let Some(ExtendedType::Enum(enum_)) = schema.types.get_mut(&enum_name) {
            let enum_ = enum_.make_mut();
            let values = std::mem::take(&mut enum_.values);
            for (old, mut value) in values {
                let new = planned.get(&old).cloned().unwrap_or(old);
                value.make_mut().value = new.clone();
                enum_.values.insert(new, value);
            }
        }
    }
}

/// Resolves renames against the final name set so no two entries end up
/// under the same key. Returns `None` when nothing changes.
fn plan_renames(
    names: &[Name],
    mut rename: impl FnMut(&Name) -> Option<Name>,
) -> Option<indexmap::IndexMap<Name, Name>> {
    let mut taken: IndexSet<Name> = names.iter().cloned().collect();
    let mut planned = indexmap::IndexMap::new();
    for name in names {
        let Some(new) = rename(name) else {
            continue;
        };
        if new == *name {
            continue;
        }
        taken.shift_remove(name);
        if taken.contains(&new) {
            taken.insert(name.clone());
            continue;
        }
        taken.insert(new.clone());
        planned.insert(name.clone(), new);
    }
    (!planned.is_empty()).then_some(planned)
}

fn apply_planned_renames<T>(
    fields: apollo_compiler::collections::IndexMap<Name, apollo_compiler::schema::Component<T>>,
    planned: &indexmap::IndexMap<Name, Name>,
) -> apollo_compiler::collections::IndexMap<Name, apollo_compiler::schema::Component<T>>
where
    T: HasName + Clone,
{
    fields
        .into_iter()
        .map(|(old, mut field)| {
            let new = planned.get(&old).cloned().unwrap_or(old);
            field.make_mut().set_name(new.clone());
            (new, field)
        })
        .collect()
}

/// Definitions whose `name` field tracks their map key.
pub(crate) trait HasName {
    fn set_name(&mut self, name: Name);
}

impl HasName for ast::FieldDefinition {
    fn set_name(&mut self, name: Name) {
        self.name = name;
    }
}

impl HasName for ast::InputValueDefinition {
    fn set_name(&mut self, name: Name) {
        self.name = name;
    }
}

fn rename_in_fields(
    object: &mut apollo_compiler::Node<apollo_compiler::schema::ObjectType>,
    old: &Name,
    new: &Name,
) {
    let touched = object.fields.values().any(|field| {
        type_mentions(&field.ty, old)
            || field
                .arguments
                .iter()
                .any(|argument| type_mentions(&argument.ty, old))
    });
    if !touched {
        return;
    }
    for field in object.make_mut().fields.values_mut() {
        let needs_field = type_mentions(&field.ty, old);
        let needs_argument = field
            .arguments
            .iter()
            .any(|argument| type_mentions(&argument.ty, old));
        if !needs_field && !needs_argument {
            continue;
        }
        let field = field.make_mut();
        if needs_field {
            field.ty = rename_in_type(&field.ty, old, new);
        }
        for argument in &mut field.arguments {
            if type_mentions(&argument.ty, old) {
                let argument = argument.make_mut();
                argument.ty = apollo_compiler::Node::new(rename_in_type(&argument.ty, old, new));
            }
        }
    }
}

fn rename_in_interface_fields(
    interface: &mut apollo_compiler::Node<apollo_compiler::schema::InterfaceType>,
    old: &Name,
    new: &Name,
) {
    let touched = interface.fields.values().any(|field| {
        type_mentions(&field.ty, old)
            || field
                .arguments
                .iter()
                .any(|argument| type_mentions(&argument.ty, old))
    });
    if !touched {
        return;
    }
    for field in interface.make_mut().fields.values_mut() {
        let needs_field = type_mentions(&field.ty, old);
        let needs_argument = field
            .arguments
            .iter()
            .any(|argument| type_mentions(&argument.ty, old));
        if !needs_field && !needs_argument {
            continue;
        }
        let field = field.make_mut();
        if needs_field {
            field.ty = rename_in_type(&field.ty, old, new);
        }
        for argument in &mut field.arguments {
            if type_mentions(&argument.ty, old) {
                let argument = argument.make_mut();
                argument.ty = apollo_compiler::Node::new(rename_in_type(&argument.ty, old, new));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rewrites_references() {
        let mut schema = Schema::parse(
            r#"
            schema { query: RootQuery }
            type RootQuery { user(filter: UserFilter): User users: [User!]! }
            type User { friends: [User] }
            input UserFilter { friendOf: ID }
            union Account = User
            "#,
            "rename.graphql",
        )
        .unwrap();

        let old = Name::new("User").unwrap();
        let new = Name::new("Account_User").unwrap();
        assert!(rename_type(&mut schema, &old, &new));

        assert!(!schema.types.contains_key("User"));
        let root = schema.get_object("RootQuery").unwrap();
        assert_eq!(root.fields["user"].ty.to_string(), "Account_User");
        assert_eq!(root.fields["users"].ty.to_string(), "[Account_User!]!");
        let renamed = schema.get_object("Account_User").unwrap();
        assert_eq!(renamed.fields["friends"].ty.to_string(), "[Account_User]");
        let union_ = schema.get_union("Account").unwrap();
        assert!(union_.members.iter().any(|m| m.name == "Account_User"));
    }

    #[test]
    fn rename_updates_schema_roots() {
        let mut schema = Schema::parse(
            "schema { query: RootQuery } type RootQuery { ok: Boolean }",
            "roots.graphql",
        )
        .unwrap();
        let old = Name::new("RootQuery").unwrap();
        let new = Name::new("Query").unwrap();
        assert!(rename_type(&mut schema, &old, &new));
        assert_eq!(
            schema.root_operation(ast::OperationType::Query).unwrap(),
            &Name::new("Query").unwrap()
        );
    }

    #[test]
    fn rename_refuses_collisions() {
        let mut schema = Schema::parse(
            "type Query { a: A b: B } type A { id: ID } type B { id: ID }",
            "collide.graphql",
        )
        .unwrap();
        let old = Name::new("A").unwrap();
        let new = Name::new("B").unwrap();
        assert!(!rename_type(&mut schema, &old, &new));
        assert!(schema.types.contains_key("A"));
    }
}
