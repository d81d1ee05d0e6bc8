//! Axum http server factory. Axum provides routing capability on top of Hyper HTTP.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::BoxError;
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::any;
use axum::routing::get;
use bytes::Bytes;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use http_body_util::LengthLimitError;
use http_body_util::Limited;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use super::listeners::serve_router_on_listen_addr;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::engine::GraphQLEngine;
use crate::engine::error_response;
use crate::error::GatewayError;
use crate::graphql;
use crate::http_server_factory::HttpServerFactory;
use crate::http_server_factory::HttpServerHandle;
use crate::landing_page::landing_page_content;
use crate::landing_page::prefers_html;

/// A basic http server using Axum.
#[derive(Debug, Default)]
pub(crate) struct AxumHttpServerFactory;

impl AxumHttpServerFactory {
    pub(crate) fn new() -> Self {
        Self
    }
}

#[derive(Clone)]
struct GatewayState {
    engine: GraphQLEngine,
    landing_page: Option<Bytes>,
    max_request_body_size: usize,
}

/// Routes the GraphQL path to the engine and the health check path to its handler, behind the
/// tracing, CORS and compression layers.
pub(crate) fn make_axum_router(
    engine: GraphQLEngine,
    configuration: &Configuration,
) -> Result<Router, GatewayError> {
    let cors = configuration
        .cors
        .clone()
        .into_layer()
        .map_err(|error| ConfigurationError::InvalidConfiguration {
            message: "invalid 'cors' configuration",
            error,
        })?;

    let state = GatewayState {
        engine,
        landing_page: configuration
            .landing_page
            .enabled
            .then(|| landing_page_content(configuration.graphql_path())),
        max_request_body_size: configuration.server.max_request_body_size,
    };

    let mut router = Router::new().route(configuration.graphql_path(), any(handle_graphql));
    if configuration.health_check.enabled {
        router = router.route(&configuration.health_check.path, get(health_check));
    }

    Ok(router
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &http::Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(cors)
        .layer(CompressionLayer::new()))
}

impl HttpServerFactory for AxumHttpServerFactory {
    type Future = Pin<Box<dyn Future<Output = Result<HttpServerHandle, GatewayError>> + Send>>;

    fn create(&self, engine: GraphQLEngine, configuration: Arc<Configuration>) -> Self::Future {
        Box::pin(async move {
            let router = make_axum_router(engine, &configuration)?;

            let address = configuration.listen();
            let listener = TcpListener::bind(address)
                .await
                .map_err(|error| GatewayError::BindError(address, error))?;
            let actual_address = listener
                .local_addr()
                .map_err(|error| GatewayError::BindError(address, error))?;

            // every connection task holds a clone of the sender, the receiver completes once
            // they are all gone
            let (all_connections_stopped_sender, all_connections_stopped_receiver) =
                mpsc::channel::<()>(1);
            let force_close = CancellationToken::new();

            let (server, shutdown_sender) = serve_router_on_listen_addr(
                listener,
                actual_address,
                router,
                all_connections_stopped_sender,
                force_close.clone(),
            );
            let accept_loop = tokio::task::spawn(server);

            tracing::info!(
                "GraphQL endpoint exposed at http://{}{} 🚀",
                actual_address,
                configuration.graphql_path()
            );

            Ok(HttpServerHandle::new(
                shutdown_sender,
                accept_loop,
                all_connections_stopped_receiver,
                force_close,
                actual_address,
            ))
        })
    }
}

async fn handle_graphql(State(state): State<GatewayState>, request: Request) -> Response {
    if let Some(page) = &state.landing_page
        && request.method() == Method::GET
        && prefers_html(request.headers())
    {
        return (
            [(CONTENT_TYPE, "text/html; charset=utf-8")],
            page.clone(),
        )
            .into_response();
    }

    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, state.max_request_body_size)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(error) => return body_error_response(error).map(Body::from).into_response(),
    };

    state
        .engine
        .handle(http::Request::from_parts(parts, body))
        .await
        .map(Body::from)
        .into_response()
}

fn body_error_response(error: BoxError) -> http::Response<Bytes> {
    if error.is::<LengthLimitError>() {
        tracing::debug!("rejecting request: body exceeds the configured limit");
        error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            graphql::Error::builder()
                .message("Request body payload too large")
                .extension_code("INVALID_GRAPHQL_REQUEST")
                .build(),
        )
    } else {
        tracing::debug!(%error, "could not read the request body");
        error_response(
            StatusCode::BAD_REQUEST,
            graphql::Error::builder()
                .message(format!("failed to read the request body: {error}"))
                .extension_code("INVALID_GRAPHQL_REQUEST")
                .build(),
        )
    }
}

async fn health_check(State(state): State<GatewayState>) -> Response {
    if state.engine.is_draining() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "fail" })),
        )
            .into_response()
    } else {
        Json(json!({ "status": "pass" })).into_response()
    }
}
