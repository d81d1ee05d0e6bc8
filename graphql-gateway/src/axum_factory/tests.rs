use axum::body::Body;
use http::Method;
use http::StatusCode;
use http::header::ACCEPT;
use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use http::header::ACCESS_CONTROL_REQUEST_METHOD;
use http::header::CONTENT_TYPE;
use http::header::ORIGIN;
use http_body_util::BodyExt;
use serde_json::json;
use test_log::test;
use tower::ServiceExt;

use super::make_axum_router;
use crate::configuration::Configuration;
use crate::configuration::HealthCheck;
use crate::configuration::LandingPage;
use crate::configuration::Server;
use crate::context::ContextFactory;
use crate::engine::GraphQLEngine;
use crate::json_ext::Value;
use crate::schema::Resolvers;
use crate::schema::assemble;

const HEALTH_PATH: &str = "/.well-known/apollo/server-health";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

fn engine(configuration: &Configuration) -> GraphQLEngine {
    let schema = assemble(
        "type Query { hello: String }",
        Resolvers::new().field("Query", "hello", |_| async {
            Ok(Value::String("world".into()))
        }),
    )
    .unwrap();
    let engine = GraphQLEngine::new(schema, ContextFactory::anonymous(), configuration);
    engine.start().unwrap();
    engine
}

fn router(configuration: &Configuration) -> axum::Router {
    make_axum_router(engine(configuration), configuration).unwrap()
}

async fn send(
    router: axum::Router,
    request: http::Request<Body>,
) -> (StatusCode, http::HeaderMap, bytes::Bytes) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn browser_get(path: &str) -> http::Request<Body> {
    http::Request::get(path)
        .header(ACCEPT, BROWSER_ACCEPT)
        .body(Body::empty())
        .unwrap()
}

#[test(tokio::test)]
async fn executes_graphql_posts() {
    let configuration = Configuration::default();
    let (status, headers, body) = send(
        router(&configuration),
        http::Request::post("/graphql")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"query":"{ hello }"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "data": { "hello": "world" } }));
}

#[test(tokio::test)]
async fn browsers_get_the_landing_page() {
    let configuration = Configuration::default();
    let (status, headers, body) = send(router(&configuration), browser_get("/graphql")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(std::str::from_utf8(&body).unwrap().contains("/graphql"));
}

#[test(tokio::test)]
async fn without_a_landing_page_browser_navigation_is_blocked() {
    let configuration = Configuration::builder()
        .landing_page(LandingPage::builder().enabled(false).build())
        .build()
        .unwrap();
    let (status, _, body) = send(router(&configuration), browser_get("/graphql")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("CSRF_ERROR"));
}

#[test(tokio::test)]
async fn health_check_fails_once_draining() {
    let configuration = Configuration::default();
    let engine = engine(&configuration);
    let router = make_axum_router(engine.clone(), &configuration).unwrap();

    let (status, _, body) = send(
        router.clone(),
        http::Request::get(HEALTH_PATH).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
        json!({ "status": "pass" })
    );

    engine.drain().await;

    let (status, _, body) = send(
        router,
        http::Request::get(HEALTH_PATH).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
        json!({ "status": "fail" })
    );
}

#[test(tokio::test)]
async fn health_check_can_be_disabled() {
    let configuration = Configuration::builder()
        .health_check(HealthCheck {
            enabled: false,
            ..Default::default()
        })
        .build()
        .unwrap();
    let (status, _, _) = send(
        router(&configuration),
        http::Request::get(HEALTH_PATH).body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test(tokio::test)]
async fn oversized_bodies_are_rejected() {
    let configuration = Configuration::builder()
        .server(Server::builder().max_request_body_size(32).build())
        .build()
        .unwrap();
    let query = format!(
        r#"{{"query":"{{ hello }}","variables":{{"padding":"{}"}}}}"#,
        "a".repeat(64)
    );
    let (status, _, body) = send(
        router(&configuration),
        http::Request::post("/graphql")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(query))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body["errors"][0]["message"],
        json!("Request body payload too large")
    );
}

#[test(tokio::test)]
async fn cors_preflights_are_answered_for_allowed_origins() {
    let configuration = Configuration::default();
    let (status, headers, _) = send(
        router(&configuration),
        http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/graphql")
            .header(ORIGIN, "https://studio.apollographql.com")
            .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://studio.apollographql.com"
    );
}

#[test(tokio::test)]
async fn cors_headers_are_withheld_from_unknown_origins() {
    let configuration = Configuration::default();
    let (_, headers, _) = send(
        router(&configuration),
        http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/graphql")
            .header(ORIGIN, "https://evil.example.com")
            .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
