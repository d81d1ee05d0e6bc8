//! The GraphQL engine: binds the executable schema to the context factory and runs one
//! operation per HTTP request.

mod apq;
mod csrf;
mod response_cache;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::ast;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::Valid;
use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header;
use mediatype::MediaTypeList;
use mediatype::names::APPLICATION;
use mediatype::names::JSON;
use tokio_util::task::TaskTracker;

use self::apq::Apq;
use self::csrf::CsrfCheck;
use self::response_cache::ResponseCache;
use crate::cache::CacheStorage;
use crate::cache::hash_key;
use crate::configuration::Configuration;
use crate::context::ContextFactory;
use crate::error::GatewayError;
use crate::execution::engine::execute;
use crate::graphql;
use crate::schema::ExecutableSchema;

pub(crate) const APPLICATION_JSON_HEADER_VALUE: &str = "application/json";
pub(crate) const GRAPHQL_JSON_RESPONSE_HEADER_VALUE: &str = "application/graphql-response+json";

type Document = Arc<Valid<ExecutableDocument>>;

/// Executes GraphQL-over-HTTP requests against an [`ExecutableSchema`].
///
/// Cloning is cheap and every clone shares the same caches, start guard and drain state.
#[derive(Clone)]
pub struct GraphQLEngine {
    inner: Arc<Inner>,
}

struct Inner {
    schema: ExecutableSchema,
    context_factory: ContextFactory,
    csrf: CsrfCheck,
    apq: Apq,
    documents: CacheStorage<String, Document>,
    responses: Option<ResponseCache>,
    introspection: bool,
    started: AtomicBool,
    operations: TaskTracker,
}

impl GraphQLEngine {
    pub fn new(
        schema: ExecutableSchema,
        context_factory: ContextFactory,
        configuration: &Configuration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                context_factory,
                csrf: CsrfCheck::new(&configuration.csrf),
                apq: Apq::new(configuration.cache.persisted_queries.capacity),
                documents: CacheStorage::new(configuration.cache.documents.capacity, "document"),
                responses: ResponseCache::new(&configuration.cache.responses),
                introspection: configuration.server.introspection,
                started: AtomicBool::new(false),
                operations: TaskTracker::new(),
            }),
        }
    }

    /// One-time initialization. A second call fails with [`GatewayError::AlreadyStarted`].
    pub fn start(&self) -> Result<(), GatewayError> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GatewayError::AlreadyStarted);
        }
        tracing::debug!(
            types = self.inner.schema.schema().types.len(),
            introspection = self.inner.introspection,
            "GraphQL engine started"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// `true` once [`GraphQLEngine::drain`] has been called.
    pub fn is_draining(&self) -> bool {
        self.inner.operations.is_closed()
    }

    /// Number of operations currently executing.
    pub fn in_flight(&self) -> usize {
        self.inner.operations.len()
    }

    /// Stops admitting operations and waits for the admitted ones to complete.
    pub async fn drain(&self) {
        self.inner.operations.close();
        tracing::info!(in_flight = self.in_flight(), "draining GraphQL operations");
        self.inner.operations.wait().await;
        tracing::info!("all GraphQL operations completed");
    }

    /// Executes one GraphQL operation. Every failure becomes a GraphQL error response.
    pub async fn handle(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        if !self.is_started() {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                graphql::Error::builder()
                    .message("the GraphQL engine has not been started")
                    .extension_code("SERVICE_UNAVAILABLE")
                    .build(),
            );
        }

        // the token is taken before checking for drain, so that `drain` waits for this operation
        // if it was admitted
        let token = self.inner.operations.token();
        if self.inner.operations.is_closed() {
            tracing::debug!("rejecting operation: the server is draining");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                graphql::Error::builder()
                    .message("the server is shutting down")
                    .extension_code("SERVER_DRAINING")
                    .build(),
            );
        }

        let response = self.process(request).await;
        drop(token);
        response
    }

    async fn process(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        let inner = &self.inner;
        let (parts, body) = request.into_parts();

        if parts.method != Method::GET && parts.method != Method::POST {
            tracing::debug!(method = %parts.method, "rejecting unsupported method");
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                graphql::Error::builder()
                    .message(format!("{} is not supported", parts.method))
                    .extension_code("METHOD_NOT_ALLOWED")
                    .build(),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
            return response;
        }

        if let Err(error) = inner.csrf.check(&parts.headers) {
            tracing::debug!("request is not preflighted, blocking it");
            return error_response(StatusCode::BAD_REQUEST, error);
        }

        let mut request = match parts.method {
            Method::GET => {
                match graphql::Request::from_urlencoded_query(parts.uri.query().unwrap_or_default())
                {
                    Ok(request) => request,
                    Err(error) => return invalid_request(error),
                }
            }
            _ => {
                if !content_type_is_json(&parts.headers) {
                    tracing::debug!("rejecting POST request without a JSON content type");
                    return error_response(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        graphql::Error::builder()
                            .message(format!(
                                "'content-type' header must be one of {APPLICATION_JSON_HEADER_VALUE:?} or {GRAPHQL_JSON_RESPONSE_HEADER_VALUE:?}"
                            ))
                            .extension_code("INVALID_CONTENT_TYPE")
                            .build(),
                    );
                }
                match graphql::Request::from_bytes(&body) {
                    Ok(request) => request,
                    Err(error) => return invalid_request(error),
                }
            }
        };

        if let Err(rejection) = inner.apq.apq_request(&mut request).await {
            return error_response(rejection.status, rejection.error);
        }

        let Some(query) = request.query.clone().filter(|query| !query.trim().is_empty()) else {
            tracing::debug!("rejecting request without a query");
            return error_response(
                StatusCode::BAD_REQUEST,
                graphql::Error::builder()
                    .message(
                        "GraphQL operations must contain a non-empty `query` or a `persistedQuery` extension.",
                    )
                    .extension_code("BAD_REQUEST")
                    .build(),
            );
        };

        let document = match self.document(&query).await {
            Ok(document) => document,
            Err(errors) => return graphql_response(graphql::Response::from_errors(errors)),
        };

        let operation_name = request.operation_name.as_deref();
        let Ok(operation) = document.operations.get(operation_name) else {
            let message = match operation_name {
                Some(name) => format!("Unknown operation named \"{name}\"."),
                None => "Must provide operation name if query contains multiple operations."
                    .to_string(),
            };
            return graphql_response(graphql::Response::from_errors(vec![
                graphql::Error::builder()
                    .message(message)
                    .extension_code("OPERATION_RESOLUTION_FAILURE")
                    .build(),
            ]));
        };

        if parts.method == Method::GET && operation.operation_type == OperationType::Mutation {
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                graphql::Error::builder()
                    .message("Mutations can only be sent over HTTP POST")
                    .extension_code("MUTATION_FORBIDDEN")
                    .build(),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        let variable_values = match apollo_compiler::request::coerce_variable_values(
            inner.schema.schema(),
            operation,
            &request.variables,
        ) {
            Ok(values) => values,
            Err(error) => {
                let error: graphql::Error = error.to_graphql_error(&document.sources).into();
                return graphql_response(graphql::Response::from_errors(vec![with_code(
                    error,
                    "BAD_USER_INPUT",
                )]));
            }
        };

        let context = inner.context_factory.build_context(&parts).await;

        let cache_key = match (&inner.responses, operation.operation_type) {
            (Some(responses), OperationType::Query) => {
                let key = ResponseCache::key(&query, operation_name, &request.variables);
                if let Some(cached) = responses.get(&key).await {
                    return json_response(StatusCode::OK, cached.body, Some(cached.cache_control));
                }
                Some(key)
            }
            _ => None,
        };

        let output = match execute(
            &inner.schema,
            &document,
            operation,
            &variable_values,
            Arc::new(context),
        )
        .await
        {
            Ok(output) => output,
            Err(errors) => return graphql_response(graphql::Response::from_errors(errors)),
        };

        let cache_policy = output.cache_policy;
        let response = graphql::Response::builder()
            .and_data(output.data)
            .errors(output.errors)
            .build();
        let body = response.to_bytes();
        if !response.errors.is_empty() {
            return json_response(StatusCode::OK, body, None);
        }
        if let (Some(responses), Some(key)) = (&inner.responses, cache_key)
            && responses.store(key, body.clone(), &cache_policy).await
        {
            tracing::trace!("response stored in the response cache");
        }
        json_response(StatusCode::OK, body, cache_policy.header_value())
    }

    /// Parses and validates `query`, going through the document cache.
    async fn document(&self, query: &str) -> Result<Document, Vec<graphql::Error>> {
        let inner = &self.inner;
        let key = hash_key([query.as_bytes()]);
        if let Some(document) = inner.documents.get(&key).await {
            return Ok(document);
        }

        let schema = inner.schema.schema();
        let parsed = ast::Document::parse(query, "query.graphql").map_err(|e| {
            tracing::debug!("rejecting request: the query could not be parsed");
            diagnostics_to_errors(&e.errors, "GRAPHQL_PARSE_FAILED")
        })?;
        let document = parsed.to_executable_validate(schema).map_err(|e| {
            tracing::debug!("rejecting request: the query is not valid against the schema");
            diagnostics_to_errors(&e.errors, "GRAPHQL_VALIDATION_FAILED")
        })?;

        if !inner.introspection && uses_introspection(&document) {
            tracing::debug!("rejecting request: introspection is disabled");
            return Err(vec![
                graphql::Error::builder()
                    .message(
                        "GraphQL introspection is not allowed, but the query contained __schema or __type",
                    )
                    .extension_code("GRAPHQL_VALIDATION_FAILED")
                    .build(),
            ]);
        }

        let document = Arc::new(document);
        inner.documents.insert(key, document.clone()).await;
        Ok(document)
    }
}

fn diagnostics_to_errors(diagnostics: &DiagnosticList, code: &str) -> Vec<graphql::Error> {
    diagnostics
        .iter()
        .map(|diagnostic| with_code(diagnostic.to_json().into(), code))
        .collect()
}

fn with_code(mut error: graphql::Error, code: &str) -> graphql::Error {
    error
        .extensions
        .insert("code", serde_json_bytes::Value::String(code.into()));
    error
}

fn uses_introspection(document: &ExecutableDocument) -> bool {
    fn visit(selection_set: &SelectionSet) -> bool {
        selection_set.selections.iter().any(|selection| match selection {
            Selection::Field(field) => {
                matches!(field.name.as_str(), "__schema" | "__type") || visit(&field.selection_set)
            }
            Selection::InlineFragment(inline) => visit(&inline.selection_set),
            Selection::FragmentSpread(_) => false,
        })
    }
    document
        .operations
        .iter()
        .any(|operation| visit(&operation.selection_set))
        || document
            .fragments
            .values()
            .any(|fragment| visit(&fragment.selection_set))
}

/// Returns true if the headers contain `content-type: application/json` or
/// `content-type: application/graphql-response+json`.
fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers.get_all(header::CONTENT_TYPE).iter().any(|value| {
        value
            .to_str()
            .map(|content_type| {
                MediaTypeList::new(content_type).any(|mime| {
                    mime.as_ref()
                        .map(|mime| {
                            (mime.ty == APPLICATION && mime.subty == JSON)
                                || (mime.ty == APPLICATION
                                    && mime.subty.as_str() == "graphql-response"
                                    && mime.suffix == Some(JSON))
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    })
}

fn invalid_request(error: serde_json::Error) -> http::Response<Bytes> {
    tracing::debug!(%error, "rejecting malformed GraphQL request");
    error_response(
        StatusCode::BAD_REQUEST,
        graphql::Error::builder()
            .message(format!("Invalid GraphQL request: {error}"))
            .extension_code("INVALID_GRAPHQL_REQUEST")
            .build(),
    )
}

pub(crate) fn error_response(status: StatusCode, error: graphql::Error) -> http::Response<Bytes> {
    json_response(
        status,
        graphql::Response::from_errors(vec![error]).to_bytes(),
        None,
    )
}

fn graphql_response(response: graphql::Response) -> http::Response<Bytes> {
    json_response(StatusCode::OK, response.to_bytes(), None)
}

fn json_response(
    status: StatusCode,
    body: Bytes,
    cache_control: Option<String>,
) -> http::Response<Bytes> {
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(APPLICATION_JSON_HEADER_VALUE),
    );
    if let Some(value) = cache_control.and_then(|value| HeaderValue::try_from(value).ok()) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

#[cfg(test)]
mod tests;
