use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::error::FetchError;
use crate::graphql::Error;
use crate::json_ext::Object;

/// A GraphQL response as returned to a client or read off a subgraph.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The errors raised on this operation.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional GraphQL extensions for this response.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Returns a new [`Response`].
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }
}

impl Response {
    /// Reads a subgraph response off the wire.
    ///
    /// Anything that is not a GraphQL response object, including a
    /// response with neither data nor errors, reports as a
    /// [`FetchError::SubrequestMalformedResponse`] for `service`.
    pub(crate) fn from_bytes(service: &str, b: Bytes) -> Result<Response, FetchError> {
        let malformed = |reason: String| FetchError::SubrequestMalformedResponse {
            service: service.to_string(),
            reason,
        };
        let value =
            Value::from_bytes(b).map_err(|error| malformed(format!("invalid JSON: {error}")))?;
        let Value::Object(mut object) = value else {
            return Err(malformed("expected a JSON object".to_string()));
        };
        let data = object.remove("data");
        let errors = match object.remove("errors") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .into_iter()
                .map(|entry| Error::from_value(service, entry))
                .collect::<Result<Vec<Error>, FetchError>>()?,
            Some(_) => return Err(malformed("`errors` is not an array".to_string())),
        };
        let extensions = match object.remove("extensions") {
            Some(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };
        if data.is_none() && errors.is_empty() {
            return Err(malformed(
                "graphql response without data must contain at least one error".to_string(),
            ));
        }
        Ok(Response {
            data,
            errors,
            extensions,
        })
    }
}
