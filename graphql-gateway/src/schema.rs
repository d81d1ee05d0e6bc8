//! Assembles type definitions and resolvers into an executable schema.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use crate::error::SchemaBuildError;
use crate::execution::FieldError;
use crate::execution::FieldResolver;
use crate::execution::ResolveInfo;
use crate::execution::cache_control::CACHE_CONTROL_DEFINITIONS;
use crate::json_ext::Value;

/// Field resolvers, by type name and field name.
#[derive(Default, Clone)]
pub struct Resolvers {
    types: HashMap<String, HashMap<String, Arc<dyn FieldResolver>>>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an async closure to `type_name.field_name`, replacing any previous binding.
    pub fn field<F, Fut>(
        self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        F: Fn(ResolveInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FieldError>> + Send + 'static,
    {
        self.field_resolver(type_name, field_name, resolver)
    }

    /// Binds any [`FieldResolver`] to `type_name.field_name`, replacing any previous binding.
    pub fn field_resolver(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: impl FieldResolver,
    ) -> Self {
        self.types
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Arc::new(resolver));
        self
    }

    fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.types.iter().flat_map(|(type_name, fields)| {
            fields
                .keys()
                .map(move |field_name| (type_name.as_str(), field_name.as_str()))
        })
    }
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bindings = self
            .bindings()
            .map(|(type_name, field_name)| format!("{type_name}.{field_name}"))
            .collect::<Vec<_>>();
        bindings.sort();
        f.debug_struct("Resolvers")
            .field("bindings", &bindings)
            .finish()
    }
}

/// A validated schema bound to its resolvers.
///
/// Immutable once assembled and cheap to clone.
#[derive(Clone, Debug)]
pub struct ExecutableSchema {
    schema: Arc<Valid<Schema>>,
    resolvers: Arc<Resolvers>,
}

impl ExecutableSchema {
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub(crate) fn resolver(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&Arc<dyn FieldResolver>> {
        self.resolvers.types.get(type_name)?.get(field_name)
    }
}

/// Parses and validates `type_defs`, then checks that every resolver is bound to a field that
/// exists on an object type.
///
/// `@cacheControl` and `CacheControlScope` are declared automatically when `type_defs` uses them
/// without declaring them.
pub fn assemble(
    type_defs: &str,
    resolvers: Resolvers,
) -> Result<ExecutableSchema, SchemaBuildError> {
    let source = if type_defs.contains("@cacheControl")
        && !type_defs.contains("directive @cacheControl")
    {
        format!("{type_defs}\n{CACHE_CONTROL_DEFINITIONS}")
    } else {
        type_defs.to_string()
    };
    let schema = Schema::parse_and_validate(source, "schema.graphql").map_err(|with_errors| {
        SchemaBuildError::InvalidTypeDefinitions(with_errors.errors.to_string())
    })?;

    for (type_name, field_name) in resolvers.bindings() {
        match schema.types.get(type_name) {
            None => return Err(SchemaBuildError::UndefinedType(type_name.to_string())),
            Some(ExtendedType::Object(object)) => {
                if !object.fields.contains_key(field_name) {
                    return Err(SchemaBuildError::UndefinedField {
                        type_name: type_name.to_string(),
                        field_name: field_name.to_string(),
                    });
                }
            }
            Some(_) => return Err(SchemaBuildError::NotAnObjectType(type_name.to_string())),
        }
    }

    tracing::debug!(
        types = schema.types.len(),
        resolvers = resolvers.bindings().count(),
        "schema assembled"
    );
    Ok(ExecutableSchema {
        schema: Arc::new(schema),
        resolvers: Arc::new(resolvers),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> Resolvers {
        Resolvers::new().field("Query", "hello", |_info: ResolveInfo| async {
            Ok(Value::from("world"))
        })
    }

    #[test]
    fn assembles_a_valid_schema() {
        let schema = assemble("type Query { hello: String }", hello()).unwrap();
        assert!(schema.resolver("Query", "hello").is_some());
        assert!(schema.resolver("Query", "other").is_none());
    }

    #[test]
    fn invalid_type_definitions_fail() {
        let error = assemble("type Query { hello: Strin }", hello()).unwrap_err();
        assert!(
            matches!(&error, SchemaBuildError::InvalidTypeDefinitions(message) if message.contains("Strin")),
            "{error}"
        );
    }

    #[test]
    fn syntax_errors_fail() {
        assert!(matches!(
            assemble("type Query {", Resolvers::new()),
            Err(SchemaBuildError::InvalidTypeDefinitions(_))
        ));
    }

    #[test]
    fn resolvers_must_target_existing_types() {
        let resolvers = Resolvers::new().field("Mutation", "hello", |_info: ResolveInfo| async {
            Ok(Value::Null)
        });
        assert_eq!(
            assemble("type Query { hello: String }", resolvers).unwrap_err(),
            SchemaBuildError::UndefinedType("Mutation".to_string())
        );
    }

    #[test]
    fn resolvers_must_target_existing_fields() {
        let resolvers = Resolvers::new().field("Query", "goodbye", |_info: ResolveInfo| async {
            Ok(Value::Null)
        });
        assert_eq!(
            assemble("type Query { hello: String }", resolvers).unwrap_err(),
            SchemaBuildError::UndefinedField {
                type_name: "Query".to_string(),
                field_name: "goodbye".to_string(),
            }
        );
    }

    #[test]
    fn resolvers_must_target_object_types() {
        let resolvers = Resolvers::new().field("Node", "id", |_info: ResolveInfo| async {
            Ok(Value::Null)
        });
        assert_eq!(
            assemble(
                "interface Node { id: ID! } type Query { node: Node }",
                resolvers
            )
            .unwrap_err(),
            SchemaBuildError::NotAnObjectType("Node".to_string())
        );
    }

    #[test]
    fn cache_control_is_declared_on_demand() {
        let schema = assemble(
            "type Query { hello: String @cacheControl(maxAge: 60) }",
            hello(),
        )
        .unwrap();
        assert!(schema.schema().directive_definitions.contains_key("cacheControl"));

        // an explicit declaration is kept as is
        let explicit = format!(
            "{CACHE_CONTROL_DEFINITIONS}\ntype Query {{ hello: String @cacheControl(maxAge: 60) }}"
        );
        assert!(assemble(&explicit, hello()).is_ok());
    }
}
