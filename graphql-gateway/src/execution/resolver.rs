//! Field resolvers.
//!
//! A resolver produces the JSON value of one field. Objects are plain JSON objects: fields that
//! have no resolver bound read the key of the same name from their parent object, and abstract
//! types are resolved from the `__typename` key of the returned object.

use std::future::Future;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::schema::Type;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json_bytes::ByteString;

use super::cache_control::CacheHint;
use crate::context::ExecutionContext;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::session::Session;

/// Resolves the value of a single field.
///
/// Implemented for any `Fn(ResolveInfo) -> impl Future<Output = Result<Value, FieldError>>`,
/// so most resolvers are async closures:
///
/// ```ignore
/// Resolvers::new().field("Query", "hello", |info: ResolveInfo| async move {
///     Ok(Value::from(format!("hello {}", info.argument("name").and_then(Value::as_str).unwrap_or("world"))))
/// })
/// ```
#[async_trait]
pub trait FieldResolver: Send + Sync + 'static {
    async fn resolve(&self, info: ResolveInfo) -> Result<Value, FieldError>;
}

#[async_trait]
impl<F, Fut> FieldResolver for F
where
    F: Fn(ResolveInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FieldError>> + Send + 'static,
{
    async fn resolve(&self, info: ResolveInfo) -> Result<Value, FieldError> {
        (self)(info).await
    }
}

/// Everything a resolver knows about the field it resolves.
pub struct ResolveInfo {
    pub(crate) context: Arc<ExecutionContext>,
    pub(crate) parent: Arc<Object>,
    pub(crate) arguments: Object,
    pub(crate) parent_type: Name,
    pub(crate) field_name: Name,
    pub(crate) return_type: Type,
    pub(crate) path: Path,
    pub(crate) cache_hint: Arc<Mutex<Option<CacheHint>>>,
}

impl ResolveInfo {
    /// The execution context shared by every resolver of this operation.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Shortcut for `info.context().session()`.
    pub fn session(&self) -> Option<&Session> {
        self.context.session()
    }

    /// Coerced field arguments, defaults applied.
    pub fn arguments(&self) -> &Object {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// The object this field is resolved on. Empty for root fields.
    pub fn parent(&self) -> &Object {
        &self.parent
    }

    pub fn parent_type(&self) -> &str {
        self.parent_type.as_str()
    }

    pub fn field_name(&self) -> &str {
        self.field_name.as_str()
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    /// Path of this field in the response.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Override the `@cacheControl` hint of this field for this response.
    ///
    /// Members left unset in `hint` keep their static value.
    pub fn set_cache_hint(&self, hint: CacheHint) {
        let mut current = self.cache_hint.lock();
        *current = Some(match current.take() {
            Some(existing) => existing.replace(hint),
            None => hint,
        });
    }
}

/// The error a resolver returns. It becomes an entry of the response `errors` list, and the
/// field is set to null.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub message: String,
    pub extensions: Object,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Object::new(),
        }
    }

    /// Sets `extensions.code`.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.extensions
            .insert("code", Value::String(ByteString::from(code.into())));
        self
    }

    pub fn with_extension(mut self, key: impl Into<ByteString>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Reads `parent[field_name]`, null when absent.
pub(crate) fn default_resolve(parent: &Object, field_name: &str) -> Value {
    parent.get(field_name).cloned().unwrap_or(Value::Null)
}
