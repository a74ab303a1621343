//! Wire-level GraphQL types: requests, responses and errors as they
//! travel between clients, the gateway and subgraphs.

mod request;
mod response;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::error::FetchError;
pub use crate::graphql::request::Request;
pub use crate::graphql::response::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as found in the `errors` field of a [`Response`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the requested element within the operation.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    /// The path of the element in the response that failed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a new [`Error`].
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// The `code` carried in this error's extensions, if any.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions
            .get("code")
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }

    /// Reads an error out of a subgraph response entry.
    ///
    /// Malformed entries report against `service` so the failing subgraph
    /// is identifiable in the combined response.
    pub(crate) fn from_value(service: &str, value: Value) -> Result<Error, FetchError> {
        let malformed = |reason: String| FetchError::SubrequestMalformedResponse {
            service: service.to_string(),
            reason,
        };
        let Value::Object(mut object) = value else {
            return Err(malformed("error entry is not an object".to_string()));
        };
        let message = match object.remove("message") {
            Some(Value::String(message)) => message.as_str().to_string(),
            Some(_) => return Err(malformed("error message is not a string".to_string())),
            None => return Err(malformed("missing error message".to_string())),
        };
        let locations = match object.remove("locations") {
            None | Some(Value::Null) => Vec::new(),
            Some(mut locations) => {
                skip_invalid_locations(&mut locations);
                serde_json_bytes::from_value(locations)
                    .map_err(|error| malformed(format!("invalid error locations: {error}")))?
            }
        };
        let path = match object.remove("path") {
            None | Some(Value::Null) => None,
            Some(path) => serde_json_bytes::from_value(path)
                .map_err(|error| malformed(format!("invalid error path: {error}")))?,
        };
        let extensions = match object.remove("extensions") {
            None | Some(Value::Null) => Object::default(),
            Some(Value::Object(extensions)) => extensions,
            Some(_) => return Err(malformed("error extensions is not an object".to_string())),
        };
        Ok(Error {
            message,
            locations,
            path,
            extensions,
        })
    }
}

/// GraphQL-JS servers have been known to emit a `{ line: -1, column: -1 }`
/// location for errors without one; drop those instead of failing the
/// whole response.
fn skip_invalid_locations(value: &mut Value) {
    if let Some(array) = value.as_array_mut() {
        array.retain(|location| {
            location.get("line") != Some(&Value::from(-1))
                || location.get("column") != Some(&Value::from(-1))
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A location in a GraphQL document where an error applies.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// The line number, one-based.
    pub line: u32,
    /// The column number, one-based.
    pub column: u32,
}

/// Carried by error types that map to a `code` extension on the wire.
pub(crate) trait ErrorExtension {
    fn extension_code(&self) -> String;
}
