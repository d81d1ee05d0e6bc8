//! The schema the `gateway` binary serves.

use crate::error::SchemaBuildError;
use crate::execution::FieldError;
use crate::execution::ResolveInfo;
use crate::json_ext::Value;
use crate::schema::ExecutableSchema;
use crate::schema::Resolvers;
use crate::schema::assemble;

pub const STARTER_TYPE_DEFS: &str = r#"
"Any JSON value"
scalar JSON

type Query {
  "The session of the caller. Fails with UNAUTHENTICATED for anonymous requests."
  me: JSON
  "Whether the request carried a session the identity provider accepted."
  authenticated: Boolean!
}
"#;

/// Assembles [`STARTER_TYPE_DEFS`] with its resolvers.
pub fn starter_schema() -> Result<ExecutableSchema, SchemaBuildError> {
    let resolvers = Resolvers::new()
        .field("Query", "me", |info: ResolveInfo| async move {
            match info.session() {
                Some(session) => Ok(session.value().clone()),
                None => Err(FieldError::new("You must be logged in to query this field")
                    .with_code("UNAUTHENTICATED")),
            }
        })
        .field("Query", "authenticated", |info: ResolveInfo| async move {
            Ok(Value::Bool(info.context().is_authenticated()))
        });
    assemble(STARTER_TYPE_DEFS, resolvers)
}
