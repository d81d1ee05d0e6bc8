//! Gateway errors.
use std::net::SocketAddr;
use std::time::Duration;

use displaydoc::Display;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;

/// Errors raised while assembling an executable schema.
///
/// These are fatal at startup: a gateway that fails to assemble its schema never listens.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaBuildError {
    /// invalid type definitions: {0}
    InvalidTypeDefinitions(String),

    /// resolvers reference type `{0}` which is not defined in the type definitions
    UndefinedType(String),

    /// resolvers reference field `{type_name}.{field_name}` which is not defined in the type definitions
    UndefinedField {
        /// The type the resolver was bound to.
        type_name: String,
        /// The field that does not exist on that type.
        field_name: String,
    },

    /// resolvers can only be bound to fields of object types, but `{0}` is not an object type
    NotAnObjectType(String),
}

/// Errors that stop the gateway from starting or from shutting down cleanly.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// failed to start server
    StartupError,

    /// the GraphQL engine has already been started
    AlreadyStarted,

    /// no schema was provided
    NoSchema,

    /// could not bind {0}: {1}
    BindError(SocketAddr, std::io::Error),

    /// could not assemble the schema: {0}
    SchemaError(#[from] SchemaBuildError),

    /// invalid configuration: {0}
    ConfigurationError(#[from] ConfigurationError),

    /// could not create the session resolver: {0}
    SessionResolverError(#[from] SessionError),

    /// failed to stop HTTP Server
    HttpServerLifecycleError,

    /// in-flight operations did not complete within the drain deadline of {0:?}
    DrainDeadlineExceeded(Duration),
}

/// Errors raised by a [`crate::session::SessionResolver`].
///
/// The context factory never propagates these: they degrade the request to an anonymous context.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// could not reach the identity provider: {0}
    Request(#[from] reqwest::Error),

    /// the identity provider responded with unexpected status {0}
    UnexpectedStatus(http::StatusCode),

    /// the identity provider returned an invalid session payload: {0}
    InvalidPayload(String),

    /// session resolution failed: {0}
    Other(String),
}
