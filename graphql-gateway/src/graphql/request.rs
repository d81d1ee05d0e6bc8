use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::Error as _;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// The body of a GraphQL POST, or the parameters of a GraphQL GET.
///
/// `extensions.persistedQuery` carries the automatic persisted query hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Request {
    /// Document text. May be absent when a persisted query hash is sent instead.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// Required when the document holds more than one operation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub variables: Object,

    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub extensions: Object,
}

// clients send `"variables": null` for operations without variables
fn null_as_empty<'de, D>(deserializer: D) -> Result<Object, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Object>::deserialize(deserializer)?.unwrap_or_default())
}

/// GET parameters before their JSON members are decoded.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameters {
    query: Option<String>,
    operation_name: Option<String>,
    variables: Option<String>,
    extensions: Option<String>,
}

fn json_parameter(raw: Option<&str>) -> Result<Object, serde_json::Error> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            Ok(Option::<Object>::deserialize(&mut serde_json::Deserializer::from_str(raw))?
                .unwrap_or_default())
        }
        _ => Ok(Object::default()),
    }
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // the map type, not the `Object` alias, so that buildstructor generates `.variable(k, v)`
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }

    pub fn from_bytes(body: &[u8]) -> Result<Request, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Decodes `?query=..&operationName=..&variables=<json>&extensions=<json>`.
    ///
    /// An empty `operationName` counts as absent.
    pub fn from_urlencoded_query(url_encoded_query: &str) -> Result<Request, serde_json::Error> {
        let parameters: QueryParameters = serde_urlencoded::from_str(url_encoded_query)
            .map_err(|error| serde_json::Error::custom(error.to_string()))?;

        Ok(Self {
            variables: json_parameter(parameters.variables.as_deref())?,
            extensions: json_parameter(parameters.extensions.as_deref())?,
            query: parameters.query,
            operation_name: parameters.operation_name.filter(|name| !name.is_empty()),
        })
    }
}
