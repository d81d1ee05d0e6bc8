use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use super::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// The `{ data, errors, extensions }` body returned for every GraphQL request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// `None` when execution did not start (request errors), `Some(Value::Null)` when a
    /// non-null root field error propagated up to the root.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// A response that only carries request errors.
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self::builder().errors(errors).build()
    }

    pub fn to_bytes(&self) -> Bytes {
        const UNSERIALIZABLE: &[u8] = br#"{"errors":[{"message":"could not serialize the response"}]}"#;
        match serde_json::to_vec(self) {
            Ok(body) => body.into(),
            Err(error) => {
                tracing::error!(%error, "response serialization failed");
                Bytes::from_static(UNSERIALIZABLE)
            }
        }
    }
}
