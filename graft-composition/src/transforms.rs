//! Schema transforms applied per subgraph during composition.
//!
//! A transform is a pure schema-to-schema rewrite running after annotation,
//! so `@source` directives keep recording the original names while the
//! supergraph exposes the transformed ones. Attached directives travel with
//! the elements they annotate.

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use heck::ToLowerCamelCase;
use heck::ToPascalCase;
use heck::ToShoutySnakeCase;
use heck::ToSnakeCase;
use indexmap::IndexSet;

use crate::rewrite;

/// A pure, per-subgraph schema rewrite.
pub trait SubgraphTransform: Send + Sync {
    fn transform(&self, schema: Schema, subgraph_name: &str) -> Schema;
}

/// Renames type definitions and every reference to them. Root types and
/// built-ins are exempt; renames that collide or produce an invalid
/// GraphQL name are skipped.
pub struct RenameTypes(Box<dyn Fn(&str) -> Option<String> + Send + Sync>);

impl RenameTypes {
    pub fn new(rename: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self(Box::new(rename))
    }
}

impl SubgraphTransform for RenameTypes {
    fn transform(&self, mut schema: Schema, _subgraph_name: &str) -> Schema {
        let roots = rewrite::root_type_names(&schema);
        let candidates: Vec<Name> = schema
            .types
            .keys()
            .filter(|name| !rewrite::is_built_in_type(name) && !roots.contains(*name))
            .cloned()
            .collect();
        for old in candidates {
            let Some(new) = (self.0)(&old) else {
                continue;
            };
            let Ok(new) = Name::new(&new) else {
                continue;
            };
            rewrite::rename_type(&mut schema, &old, &new);
        }
        schema
    }
}

/// Renames fields on object and interface types, root types included.
pub struct RenameFields(Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>);

impl RenameFields {
    pub fn new(rename: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self(Box::new(rename))
    }
}

impl SubgraphTransform for RenameFields {
    fn transform(&self, mut schema: Schema, _subgraph_name: &str) -> Schema {
        rewrite::rename_fields(&mut schema, |type_name, field_name| {
            (self.0)(type_name, field_name).and_then(|new| Name::new(&new).ok())
        });
        schema
    }
}

/// Prepends a fixed prefix to type names, and optionally to root field
/// names, so several subgraphs with overlapping vocabularies can coexist.
pub struct Prefix {
    value: String,
    ignore: Vec<String>,
    include_root_operations: bool,
}

impl Prefix {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ignore: Vec::new(),
            include_root_operations: false,
        }
    }

    /// Type names left untouched (built-ins and root types always are).
    pub fn ignore(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore.extend(types.into_iter().map(Into::into));
        self
    }

    /// Also prefix the fields of the root operation types.
    pub fn include_root_operations(mut self, include: bool) -> Self {
        self.include_root_operations = include;
        self
    }
}

impl SubgraphTransform for Prefix {
    fn transform(&self, mut schema: Schema, _subgraph_name: &str) -> Schema {
        let roots = rewrite::root_type_names(&schema);
        let candidates: Vec<Name> = schema
            .types
            .keys()
            .filter(|name| {
                !rewrite::is_built_in_type(name)
                    && !roots.contains(*name)
                    && !self.ignore.iter().any(|ignored| ignored == name.as_str())
            })
            .cloned()
            .collect();
        for old in candidates {
            let Ok(new) = Name::new(&format!("{}{}", self.value, old)) else {
                continue;
            };
            rewrite::rename_type(&mut schema, &old, &new);
        }
        if self.include_root_operations {
            rewrite::rename_fields(&mut schema, |type_name, field_name| {
                if !roots.contains(type_name) {
                    return None;
                }
                Name::new(&format!("{}{}", self.value, field_name)).ok()
            });
        }
        schema
    }
}

/// Keeps or drops types and fields by predicate, then prunes whatever the
/// filtering orphaned: fields whose type is gone, empty composites, and
/// types no longer reachable from the operation roots.
#[derive(Default)]
pub struct FilterSchema {
    keep_type: Option<Box<dyn Fn(&str) -> bool + Send + Sync>>,
    keep_field: Option<Box<dyn Fn(&str, &str) -> bool + Send + Sync>>,
}

impl FilterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_types(mut self, keep: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.keep_type = Some(Box::new(keep));
        self
    }

    pub fn keep_fields(
        mut self,
        keep: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.keep_field = Some(Box::new(keep));
        self
    }
}

impl SubgraphTransform for FilterSchema {
    fn transform(&self, mut schema: Schema, _subgraph_name: &str) -> Schema {
        let roots = rewrite::root_type_names(&schema);
        if let Some(keep) = &self.keep_type {
            let doomed: Vec<Name> = schema
                .types
                .keys()
                .filter(|name| {
                    !rewrite::is_built_in_type(name) && !roots.contains(*name) && !keep(name)
                })
                .cloned()
                .collect();
            for name in doomed {
                schema.types.shift_remove(&name);
            }
        }
        if let Some(keep) = &self.keep_field {
            for ty in schema.types.values_mut() {
                match ty {
                    ExtendedType::Object(object) => {
                        let object = object.make_mut();
                        let type_name = object.name.clone();
                        object.fields.retain(|field_name, _| keep(&type_name, field_name));
                    }
                    ExtendedType::Interface(interface) => {
                        let interface = interface.make_mut();
                        let type_name = interface.name.clone();
                        interface
                            .fields
                            .retain(|field_name, _| keep(&type_name, field_name));
                    }
                    _ => {}
                }
            }
        }
        prune_dangling(&mut schema, &roots);
        prune_unreachable(&mut schema);
        schema
    }
}

/// Drops fields, arguments, union members and input fields referencing
/// types that no longer exist, then drops composites the cleanup emptied,
/// until the schema stops changing.
pub(crate) fn prune_dangling(schema: &mut Schema, roots: &IndexSet<Name>) {
    loop {
        let mut changed = false;
        let existing: IndexSet<Name> = schema.types.keys().cloned().collect();
        let exists =
            |ty: &ast::Type| rewrite::is_built_in_type(ty.inner_named_type()) || existing.contains(ty.inner_named_type());
        for ty in schema.types.values_mut() {
            match ty {
                ExtendedType::Object(object) => {
                    let object = object.make_mut();
                    let before = object.fields.len();
                    object.fields.retain(|_, field| exists(&field.ty));
                    changed |= object.fields.len() != before;
                    for field in object.fields.values_mut() {
                        let field = field.make_mut();
                        let before = field.arguments.len();
                        field.arguments.retain(|argument| exists(&argument.ty));
                        changed |= field.arguments.len() != before;
                    }
                }
                ExtendedType::Interface(interface) => {
                    let interface = interface.make_mut();
                    let before = interface.fields.len();
                    interface.fields.retain(|_, field| exists(&field.ty));
                    changed |= interface.fields.len() != before;
                    for field in interface.fields.values_mut() {
                        let field = field.make_mut();
                        let before = field.arguments.len();
                        field.arguments.retain(|argument| exists(&argument.ty));
                        changed |= field.arguments.len() != before;
                    }
                }
                ExtendedType::Union(union_) => {
                    let union_ = union_.make_mut();
                    let before = union_.members.len();
                    union_.members.retain(|member| existing.contains(&member.name));
                    changed |= union_.members.len() != before;
                }
                ExtendedType::InputObject(input_object) => {
                    let input_object = input_object.make_mut();
                    let before = input_object.fields.len();
                    input_object.fields.retain(|_, field| exists(&field.ty));
                    changed |= input_object.fields.len() != before;
                }
                ExtendedType::Scalar(_) | ExtendedType::Enum(_) => {}
            }
        }
        let emptied: Vec<Name> = schema
            .types
            .iter()
            .filter(|(name, _)| !roots.contains(*name))
            .filter_map(|(name, ty)| {
                let empty = match ty {
                    ExtendedType::Object(object) => object.fields.is_empty(),
                    ExtendedType::Interface(interface) => interface.fields.is_empty(),
                    ExtendedType::Union(union_) => union_.members.is_empty(),
                    ExtendedType::InputObject(input_object) => input_object.fields.is_empty(),
                    ExtendedType::Scalar(_) | ExtendedType::Enum(_) => false,
                };
                empty.then(|| name.clone())
            })
            .collect();
        for name in emptied {
            schema.types.shift_remove(&name);
            changed = true;
        }
        if !changed {
            break;
        }
    }
}

/// Removes every non-built-in type the operation roots cannot reach.
/// Implementations of reachable interfaces count as reachable, as do types
/// referenced by directive definitions.
fn prune_unreachable(schema: &mut Schema) {
    let mut reachable = rewrite::root_type_names(schema);
    for definition in schema.directive_definitions.values() {
        for argument in &definition.arguments {
            reachable.insert(argument.ty.inner_named_type().clone());
        }
    }
    let mut stack: Vec<Name> = reachable.iter().cloned().collect();
    loop {
        while let Some(name) = stack.pop() {
            let Some(ty) = schema.types.get(&name) else {
                continue;
            };
            let mut found: Vec<Name> = Vec::new();
            match ty {
                ExtendedType::Object(object) => {
                    found.extend(object.implements_interfaces.iter().map(|i| i.name.clone()));
                    for field in object.fields.values() {
                        found.push(field.ty.inner_named_type().clone());
                        found.extend(
                            field.arguments.iter().map(|a| a.ty.inner_named_type().clone()),
                        );
                    }
                }
                ExtendedType::Interface(interface) => {
                    found.extend(interface.implements_interfaces.iter().map(|i| i.name.clone()));
                    for field in interface.fields.values() {
                        found.push(field.ty.inner_named_type().clone());
                        found.extend(
                            field.arguments.iter().map(|a| a.ty.inner_named_type().clone()),
                        );
                    }
                }
                ExtendedType::Union(union_) => {
                    found.extend(union_.members.iter().map(|m| m.name.clone()));
                }
                ExtendedType::InputObject(input_object) => {
                    found.extend(
                        input_object
                            .fields
                            .values()
                            .map(|f| f.ty.inner_named_type().clone()),
                    );
                }
                ExtendedType::Scalar(_) | ExtendedType::Enum(_) => {}
            }
            for name in found {
                if reachable.insert(name.clone()) {
                    stack.push(name);
                }
            }
        }
        let implementors: Vec<Name> = schema
            .types
            .iter()
            .filter(|(name, _)| !reachable.contains(*name))
            .filter_map(|(name, ty)| {
                let implements = match ty {
                    ExtendedType::Object(object) => &object.implements_interfaces,
                    ExtendedType::Interface(interface) => &interface.implements_interfaces,
                    _ => return None,
                };
                implements
                    .iter()
                    .any(|i| reachable.contains(&i.name))
                    .then(|| name.clone())
            })
            .collect();
        if implementors.is_empty() {
            break;
        }
        for name in implementors {
            reachable.insert(name.clone());
            stack.push(name);
        }
    }
    let doomed: Vec<Name> = schema
        .types
        .keys()
        .filter(|name| !rewrite::is_built_in_type(name) && !reachable.contains(*name))
        .cloned()
        .collect();
    for name in doomed {
        schema.types.shift_remove(&name);
    }
}

/// Case conventions applicable to schema element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingCase {
    Camel,
    Pascal,
    Snake,
    ScreamingSnake,
}

impl NamingCase {
    fn apply(self, value: &str) -> String {
        match self {
            NamingCase::Camel => value.to_lower_camel_case(),
            NamingCase::Pascal => value.to_pascal_case(),
            NamingCase::Snake => value.to_snake_case(),
            NamingCase::ScreamingSnake => value.to_shouty_snake_case(),
        }
    }
}

/// Normalizes names per element class: type names, field names (object,
/// interface and input object fields), and enum values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamingConvention {
    pub type_names: Option<NamingCase>,
    pub field_names: Option<NamingCase>,
    pub enum_values: Option<NamingCase>,
}

impl SubgraphTransform for NamingConvention {
    fn transform(&self, mut schema: Schema, _subgraph_name: &str) -> Schema {
        if let Some(case) = self.type_names {
            let roots = rewrite::root_type_names(&schema);
            let candidates: Vec<Name> = schema
                .types
                .keys()
                .filter(|name| !rewrite::is_built_in_type(name) && !roots.contains(*name))
                .cloned()
                .collect();
            for old in candidates {
                let converted = case.apply(&old);
                if converted == old.as_str() {
                    continue;
                }
                let Ok(new) = Name::new(&converted) else {
                    continue;
                };
                rewrite::rename_type(&mut schema, &old, &new);
            }
        }
        if let Some(case) = self.field_names {
            let convert = |_type_name: &Name, field_name: &Name| {
                let converted = case.apply(field_name);
                if converted == field_name.as_str() {
                    return None;
                }
                Name::new(&converted).ok()
            };
            rewrite::rename_fields(&mut schema, convert);
            rewrite::rename_input_fields(&mut schema, convert);
        }
        if let Some(case) = self.enum_values {
            rewrite::rename_enum_values(&mut schema, |_enum_name, value_name| {
                let converted = case.apply(value_name);
                if converted == value_name.as_str() {
                    return None;
                }
                Name::new(&converted).ok()
            });
        }
        schema
    }
}
