//! JSON paths and value plumbing shared by planning and dispatch.

use std::fmt;

use apollo_compiler::ast;
use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
pub use serde_json_bytes::Value;

/// A JSON object as returned by and sent to subgraphs.
pub type Object = JsonMap<ByteString, Value>;

/// One element of a response path.
///
/// `Flatten` (printed `@`) addresses every element of a list, the way
/// entity paths do when a merged field sits under a list-valued parent.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathElement {
    /// An index into an array.
    Index(usize),

    /// All array elements at this position.
    Flatten,

    /// An object key.
    Key(String),
}

impl Serialize for PathElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            PathElement::Flatten => serializer.serialize_str("@"),
            PathElement::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PathElementVisitor)
    }
}

struct PathElementVisitor;

impl de::Visitor<'_> for PathElementVisitor {
    type Value = PathElement;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or an unsigned integer")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(PathElement::Index(v as usize))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        usize::try_from(v)
            .map(PathElement::Index)
            .map_err(|_| E::custom("negative path index"))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(match v {
            "@" => PathElement::Flatten,
            key => PathElement::Key(key.to_string()),
        })
    }
}

/// A path into a response value, e.g. `users/@/reviews/0/body`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element);
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }

    /// This path extended by `other`.
    pub fn join(&self, other: &Path) -> Path {
        let mut elements = Vec::with_capacity(self.0.len() + other.0.len());
        elements.extend(self.0.iter().cloned());
        elements.extend(other.0.iter().cloned());
        Path(elements)
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path(
            s.split('/')
                .filter(|element| !element.is_empty())
                .map(|element| {
                    if element == "@" {
                        PathElement::Flatten
                    } else if let Ok(index) = element.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(element.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Flatten => write!(f, "@")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

pub(crate) trait ValueExt {
    /// Merges `other` into `self`: objects merge key-wise, arrays of equal
    /// length merge index-wise, anything else replaces. Nulls never
    /// overwrite an existing value.
    fn deep_merge(&mut self, other: Self);

    /// Mutable access along a concrete path. `Flatten` stops the walk,
    /// paths fed here come from [`ValueExt::select_values_and_paths`] and
    /// are index-resolved.
    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Option<&'a mut Value>;

    /// Visits every value reachable at `path` together with its concrete
    /// path, expanding `Flatten` over array elements.
    fn select_values_and_paths<'a>(&'a self, path: &Path, f: &mut dyn FnMut(&Path, &'a Value));
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b {
                    match a.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                for (existing, value) in a.iter_mut().zip(b) {
                    existing.deep_merge(value);
                }
            }
            (a, b) => {
                if !b.is_null() {
                    *a = b;
                }
            }
        }
    }

    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Option<&'a mut Value> {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Key(key) => current.as_object_mut()?.get_mut(key.as_str())?,
                PathElement::Index(index) => current.as_array_mut()?.get_mut(*index)?,
                PathElement::Flatten => return None,
            };
        }
        Some(current)
    }

    fn select_values_and_paths<'a>(&'a self, path: &Path, f: &mut dyn FnMut(&Path, &'a Value)) {
        iterate_path(&mut Path::empty(), &path.0, self, f)
    }
}

fn iterate_path<'a>(
    prefix: &mut Path,
    remaining: &[PathElement],
    value: &'a Value,
    f: &mut dyn FnMut(&Path, &'a Value),
) {
    match remaining.split_first() {
        None => f(prefix, value),
        Some((PathElement::Key(key), rest)) => {
            if let Some(child) = value.as_object().and_then(|object| object.get(key.as_str())) {
                prefix.push(PathElement::Key(key.clone()));
                iterate_path(prefix, rest, child, f);
                prefix.pop();
            }
        }
        Some((PathElement::Index(index), rest)) => {
            if let Some(child) = value.as_array().and_then(|array| array.get(*index)) {
                prefix.push(PathElement::Index(*index));
                iterate_path(prefix, rest, child, f);
                prefix.pop();
            }
        }
        Some((PathElement::Flatten, rest)) => {
            if let Some(array) = value.as_array() {
                for (index, child) in array.iter().enumerate() {
                    prefix.push(PathElement::Index(index));
                    iterate_path(prefix, rest, child, f);
                    prefix.pop();
                }
            }
        }
    }
}

/// Converts a GraphQL literal into a JSON value. Returns `None` when the
/// literal references a variable or holds a number JSON cannot represent.
pub(crate) fn ast_value_to_json(value: &ast::Value) -> Option<Value> {
    Some(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::String(s) => Value::String(ByteString::from(s.as_str())),
        ast::Value::Enum(name) => Value::String(ByteString::from(name.as_str())),
        ast::Value::Int(i) => match i.try_to_i32() {
            Ok(i) => Value::Number(i.into()),
            Err(_) => {
                let f = i.try_to_f64().ok()?;
                Value::Number(serde_json::Number::from_f64(f)?)
            }
        },
        ast::Value::Float(f) => {
            let f = f.try_to_f64().ok()?;
            Value::Number(serde_json::Number::from_f64(f)?)
        }
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| ast_value_to_json(item))
                .collect::<Option<_>>()?,
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| Some((ByteString::from(key.as_str()), ast_value_to_json(value)?)))
                .collect::<Option<_>>()?,
        ),
        ast::Value::Variable(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json_bytes::json;

    use super::*;

    #[rstest]
    #[case::key("user", PathElement::Key("user".to_string()))]
    #[case::index("3", PathElement::Index(3))]
    #[case::flatten("@", PathElement::Flatten)]
    #[case::numeric_prefix("3rd", PathElement::Key("3rd".to_string()))]
    fn path_elements_parse(#[case] text: &str, #[case] expected: PathElement) {
        assert_eq!(Path::from(text).0, vec![expected]);
    }

    #[test]
    fn path_parses_and_displays() {
        let path = Path::from("users/@/reviews/0/body");
        assert_eq!(
            path.0,
            vec![
                PathElement::Key("users".to_string()),
                PathElement::Flatten,
                PathElement::Key("reviews".to_string()),
                PathElement::Index(0),
                PathElement::Key("body".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "users/@/reviews/0/body");
    }

    #[test]
    fn path_serializes_as_json_array() {
        let path = Path::from("users/@/0/name");
        let serialized = serde_json_bytes::to_value(&path).unwrap();
        assert_eq!(serialized, json!(["users", "@", 0, "name"]));
        let roundtripped: Path = serde_json_bytes::from_value(serialized).unwrap();
        assert_eq!(roundtripped, path);
    }

    #[test]
    fn deep_merge_combines_objects_and_keeps_unrelated_keys() {
        let mut target = json!({"user": {"id": "1", "name": "ada"}});
        target.deep_merge(json!({"user": {"rating": 5}, "extra": true}));
        assert_eq!(
            target,
            json!({"user": {"id": "1", "name": "ada", "rating": 5}, "extra": true})
        );
    }

    #[test]
    fn deep_merge_zips_equal_length_arrays() {
        let mut target = json!({"users": [{"id": "1"}, {"id": "2"}]});
        target.deep_merge(json!({"users": [{"name": "ada"}, {"name": "brendan"}]}));
        assert_eq!(
            target,
            json!({"users": [{"id": "1", "name": "ada"}, {"id": "2", "name": "brendan"}]})
        );
    }

    #[test]
    fn deep_merge_does_not_overwrite_with_null() {
        let mut target = json!({"name": "ada"});
        target.deep_merge(json!({"name": null}));
        assert_eq!(target, json!({"name": "ada"}));
    }

    #[test]
    fn select_values_flattens_arrays() {
        let value = json!({
            "users": [
                {"reviews": [{"id": "a"}, {"id": "b"}]},
                {"reviews": [{"id": "c"}]},
            ]
        });
        let mut seen = Vec::new();
        value.select_values_and_paths(&Path::from("users/@/reviews/@"), &mut |path, value| {
            seen.push((path.to_string(), value.clone()));
        });
        assert_eq!(
            seen,
            vec![
                ("users/0/reviews/0".to_string(), json!({"id": "a"})),
                ("users/0/reviews/1".to_string(), json!({"id": "b"})),
                ("users/1/reviews/0".to_string(), json!({"id": "c"})),
            ]
        );
    }

    #[test]
    fn select_values_skips_missing_branches() {
        let value = json!({"users": [{"id": "1"}, null]});
        let mut seen = Vec::new();
        value.select_values_and_paths(&Path::from("users/@/id"), &mut |path, value| {
            seen.push((path.to_string(), value.clone()));
        });
        // the null element has no `id`, so only the first branch reports
        assert_eq!(seen, vec![("users/0/id".to_string(), json!("1"))]);
    }

    #[test]
    fn get_path_mut_follows_concrete_paths() {
        let mut value = json!({"users": [{"id": "1"}]});
        let target = value.get_path_mut(&Path::from("users/0")).unwrap();
        target.deep_merge(json!({"name": "ada"}));
        assert_eq!(value, json!({"users": [{"id": "1", "name": "ada"}]}));
    }

    #[test]
    fn ast_literals_convert_to_json() {
        let value: ast::Value = apollo_compiler::ast::Value::Boolean(true);
        assert_eq!(ast_value_to_json(&value), Some(json!(true)));
        let variable = apollo_compiler::ast::Value::Variable(apollo_compiler::name!("x"));
        assert_eq!(ast_value_to_json(&variable), None);
    }
}
