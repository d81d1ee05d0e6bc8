//! GraphQL-over-HTTP wire types.

mod request;
mod response;

use std::fmt;

use apollo_compiler::response::GraphQLError;
pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::json_ext::Path;

/// A 1-based position in the query document.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// An entry of the `errors` array of a [`Response`].
///
/// `locations`, `path` and `extensions` are omitted from the JSON when empty.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
#[non_exhaustive]
pub struct Error {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// Set for field errors: where the field sits in `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// `.message(..)` is required. `.extension_code(..)` fills `extensions.code` unless
    /// `.extension("code", ..)` already set one.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // the map type, not the `Object` alias, so that buildstructor generates `.extension(k, v)`
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code
            && !extensions.contains_key("code")
        {
            extensions.insert("code", Value::String(code.into()));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// `extensions.code`, when it is a string.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<GraphQLError> for Error {
    fn from(error: GraphQLError) -> Self {
        Self {
            locations: error
                .locations
                .iter()
                .map(|location| Location {
                    line: location.line as u32,
                    column: location.column as u32,
                })
                .collect(),
            path: (!error.path.is_empty()).then(|| Path::from(error.path)),
            message: error.message,
            extensions: error.extensions,
        }
    }
}
