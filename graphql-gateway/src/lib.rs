//! A GraphQL gateway that resolves a per-request session and executes operations against an
//! executable schema.

pub mod json_ext;

mod axum_factory;
mod cache;
pub mod configuration;
mod context;
mod engine;
pub mod error;
mod executable;
pub mod execution;
pub mod graphql;
mod http_server_factory;
mod landing_page;
mod schema;
mod server;
mod session;
mod starter;
mod state_machine;

pub use configuration::Configuration;
pub use context::ContextFactory;
pub use context::ExecutionContext;
pub use engine::GraphQLEngine;
pub use error::GatewayError;
pub use error::SchemaBuildError;
pub use error::SessionError;
pub use executable::main;
pub use execution::CacheHint;
pub use execution::CachePolicy;
pub use execution::CacheScope;
pub use execution::FieldError;
pub use execution::FieldResolver;
pub use execution::ResolveInfo;
pub use schema::ExecutableSchema;
pub use schema::Resolvers;
pub use schema::assemble;
pub use server::GatewayServer;
pub use server::GatewayServerBuilder;
pub use server::GatewayServerHandle;
pub use server::ShutdownSource;
pub use session::CookieSessionResolver;
pub use session::NoSessionResolver;
pub use session::Session;
pub use session::SessionResolver;
pub use starter::STARTER_TYPE_DEFS;
pub use starter::starter_schema;
pub use state_machine::State;
