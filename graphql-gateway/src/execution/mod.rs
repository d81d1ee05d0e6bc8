//! Asynchronous GraphQL execution against the resolvers of an
//! [`ExecutableSchema`](crate::schema::ExecutableSchema).
//!
//! Follows the execution section of the GraphQL specification:
//!
//! * Fields of a selection set resolve concurrently, top-level mutation fields one at a time.
//! * A field error nulls the nearest nullable field and is reported in `errors`.
//! * `__schema` and `__type` are answered by `apollo_compiler::introspection`.
//! * Every resolved field contributes its cache hint to the [`CachePolicy`] of the response.

pub(crate) mod cache_control;
pub(crate) mod engine;
mod input_coercion;
pub(crate) mod resolver;
mod result_coercion;

pub use cache_control::CacheHint;
pub use cache_control::CachePolicy;
pub use cache_control::CacheScope;
pub use resolver::FieldError;
pub use resolver::FieldResolver;
pub use resolver::ResolveInfo;
