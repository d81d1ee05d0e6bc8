use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use http::request::Parts;
use serde_json_bytes::json;
use sha2::Digest;
use sha2::Sha256;

use super::*;
use crate::configuration::Cache;
use crate::configuration::Server;
use crate::error::SessionError;
use crate::execution::FieldError;
use crate::execution::ResolveInfo;
use crate::json_ext::Value;
use crate::schema::Resolvers;
use crate::schema::assemble;
use crate::session::Session;
use crate::session::SessionResolver;

const TYPE_DEFS: &str = r#"
    type Query {
      hello: String @cacheControl(maxAge: 60)
      whoami: String
      slow: String
      count: Int
      echo(value: Int!): Int
    }
    type Mutation {
      bump: Int
    }
"#;

#[derive(Default)]
struct Counters {
    sessions: AtomicUsize,
    hellos: AtomicUsize,
}

struct HeaderSessions(Arc<Counters>);

#[async_trait]
impl SessionResolver for HeaderSessions {
    async fn resolve(&self, request: &Parts) -> Result<Option<Session>, SessionError> {
        self.0.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(request
            .headers
            .get("x-user")
            .and_then(|value| value.to_str().ok())
            .map(|user| Session::new(json!(user))))
    }
}

fn engine_with(configuration: Configuration) -> (GraphQLEngine, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let hellos = counters.clone();
    let resolvers = Resolvers::new()
        .field("Query", "hello", move |_info: ResolveInfo| {
            let counters = hellos.clone();
            async move {
                counters.hellos.fetch_add(1, Ordering::SeqCst);
                Ok(json!("world"))
            }
        })
        .field("Query", "whoami", |info: ResolveInfo| async move {
            match info.session() {
                Some(session) => Ok(session.value().clone()),
                None => Err(FieldError::new("not authenticated").with_code("UNAUTHENTICATED")),
            }
        })
        .field("Query", "slow", |_info: ResolveInfo| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("done"))
        })
        .field("Query", "echo", |info: ResolveInfo| async move {
            Ok(info.argument("value").cloned().unwrap_or(Value::Null))
        })
        .field("Mutation", "bump", |_info: ResolveInfo| async move { Ok(json!(1)) });
    let schema = assemble(TYPE_DEFS, resolvers).unwrap();
    let context_factory = ContextFactory::new(
        Arc::new(HeaderSessions(counters.clone())),
        &configuration.session,
    );
    let engine = GraphQLEngine::new(schema, context_factory, &configuration);
    engine.start().unwrap();
    (engine, counters)
}

fn engine() -> GraphQLEngine {
    engine_with(Configuration::default()).0
}

fn post(body: serde_json::Value) -> http::Request<Bytes> {
    http::Request::post("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(body.to_string()))
        .unwrap()
}

fn post_as(user: &str, body: serde_json::Value) -> http::Request<Bytes> {
    http::Request::post("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user", user)
        .body(Bytes::from(body.to_string()))
        .unwrap()
}

fn get(query_string: &str) -> http::Request<Bytes> {
    http::Request::get(format!("/graphql?{query_string}"))
        .header("apollo-require-preflight", "true")
        .body(Bytes::new())
        .unwrap()
}

fn body(response: &http::Response<Bytes>) -> serde_json::Value {
    serde_json::from_slice(response.body()).unwrap()
}

fn code(response: &http::Response<Bytes>) -> serde_json::Value {
    body(response)["errors"][0]["extensions"]["code"].clone()
}

#[tokio::test]
async fn executes_typename() {
    let response = engine()
        .handle(post(serde_json::json!({ "query": "{ __typename }" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(
        body(&response),
        serde_json::json!({ "data": { "__typename": "Query" } })
    );
}

#[tokio::test]
async fn refuses_operations_before_start() {
    let schema = assemble(TYPE_DEFS, Resolvers::new()).unwrap();
    let engine = GraphQLEngine::new(
        schema,
        ContextFactory::anonymous(),
        &Configuration::default(),
    );
    let response = engine
        .handle(post(serde_json::json!({ "query": "{ __typename }" })))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn start_is_guarded() {
    let engine = engine();
    assert!(matches!(engine.start(), Err(GatewayError::AlreadyStarted)));
    assert!(engine.is_started());
}

#[tokio::test]
async fn sessions_reach_resolvers() {
    let (engine, counters) = engine_with(Configuration::default());
    let query = serde_json::json!({ "query": "{ a: whoami b: whoami hello }" });

    let response = engine.handle(post_as("ada", query.clone())).await;
    assert_eq!(
        body(&response),
        serde_json::json!({ "data": { "a": "ada", "b": "ada", "hello": "world" } })
    );
    // one context per operation, not per field
    assert_eq!(counters.sessions.load(Ordering::SeqCst), 1);

    let response = engine.handle(post(query)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body(&response);
    assert_eq!(body["data"]["a"], serde_json::Value::Null);
    assert_eq!(body["errors"][0]["message"], "not authenticated");
    assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn concurrent_operations_see_their_own_session() {
    let engine = engine();
    let users: Vec<String> = (0..20).map(|i| format!("user-{i}")).collect();
    let responses = futures::future::join_all(users.iter().map(|user| {
        engine.handle(post_as(
            user,
            serde_json::json!({ "query": "{ whoami slow }" }),
        ))
    }))
    .await;
    for (user, response) in users.iter().zip(responses) {
        assert_eq!(
            body(&response),
            serde_json::json!({ "data": { "whoami": user, "slow": "done" } })
        );
    }
}

#[tokio::test]
async fn csrf_blocks_simple_requests() {
    let engine = engine();
    let request = http::Request::post("/graphql")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Bytes::from(r#"{"query":"{ __typename }"}"#))
        .unwrap();
    let response = engine.handle(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(code(&response), "CSRF_ERROR");

    let request = http::Request::get("/graphql?query=%7B__typename%7D")
        .body(Bytes::new())
        .unwrap();
    let response = engine.handle(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(code(&response), "CSRF_ERROR");
}

#[tokio::test]
async fn get_requests_are_supported() {
    let response = engine()
        .handle(get("query=query%20Q(%24v%3A%20Int!)%20%7B%20echo(value%3A%20%24v)%20%7D&variables=%7B%22v%22%3A3%7D"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response), serde_json::json!({ "data": { "echo": 3 } }));
}

#[tokio::test]
async fn mutations_are_forbidden_over_get() {
    let response = engine()
        .handle(get("query=mutation%20%7B%20bump%20%7D"))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");
    assert_eq!(code(&response), "MUTATION_FORBIDDEN");

    let response = engine()
        .handle(post(serde_json::json!({ "query": "mutation { bump }" })))
        .await;
    assert_eq!(body(&response), serde_json::json!({ "data": { "bump": 1 } }));
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let request = http::Request::put("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::new())
        .unwrap();
    let response = engine().handle(request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, POST");
}

#[tokio::test]
async fn unsupported_methods_are_rejected_before_csrf_prevention() {
    let engine = engine();
    for method in [Method::PUT, Method::DELETE, Method::PATCH, Method::OPTIONS] {
        let request = http::Request::builder()
            .method(method.clone())
            .uri("/graphql")
            .body(Bytes::new())
            .unwrap();
        let response = engine.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, POST");
        assert_eq!(code(&response), "METHOD_NOT_ALLOWED");
    }
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let engine = engine();
    let request = http::Request::post("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from_static(b"{ not json"))
        .unwrap();
    let response = engine.handle(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(code(&response), "INVALID_GRAPHQL_REQUEST");

    let response = engine.handle(post(serde_json::json!({ "variables": {} }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(code(&response), "BAD_REQUEST");

    let request = http::Request::post("/graphql")
        .header("apollo-require-preflight", "true")
        .body(Bytes::from_static(br#"{"query":"{ hello }"}"#))
        .unwrap();
    let response = engine.handle(request).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn parse_and_validation_errors_are_graphql_errors() {
    let engine = engine();
    let response = engine
        .handle(post(serde_json::json!({ "query": "{ hello" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(code(&response), "GRAPHQL_PARSE_FAILED");
    assert!(body(&response).get("data").is_none());

    let response = engine
        .handle(post(serde_json::json!({ "query": "{ nope }" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(code(&response), "GRAPHQL_VALIDATION_FAILED");
}

#[tokio::test]
async fn operations_are_selected_by_name() {
    let engine = engine();
    let query = "query A { hello } query B { __typename }";
    let response = engine
        .handle(post(
            serde_json::json!({ "query": query, "operationName": "B" }),
        ))
        .await;
    assert_eq!(
        body(&response),
        serde_json::json!({ "data": { "__typename": "Query" } })
    );

    let response = engine
        .handle(post(serde_json::json!({ "query": query })))
        .await;
    assert_eq!(code(&response), "OPERATION_RESOLUTION_FAILURE");

    let response = engine
        .handle(post(
            serde_json::json!({ "query": query, "operationName": "C" }),
        ))
        .await;
    assert_eq!(code(&response), "OPERATION_RESOLUTION_FAILURE");
}

#[tokio::test]
async fn invalid_variables_are_bad_user_input() {
    let response = engine()
        .handle(post(serde_json::json!({
            "query": "query($v: Int!) { echo(value: $v) }",
            "variables": { "v": "three" }
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(code(&response), "BAD_USER_INPUT");
}

#[tokio::test]
async fn introspection_can_be_disabled() {
    let query = serde_json::json!({ "query": "{ __schema { queryType { name } } }" });

    let response = engine().handle(post(query.clone())).await;
    assert_eq!(
        body(&response),
        serde_json::json!({ "data": { "__schema": { "queryType": { "name": "Query" } } } })
    );

    let configuration = Configuration::builder()
        .server(Server::builder().introspection(false).build())
        .build()
        .unwrap();
    let (engine, _) = engine_with(configuration);
    let response = engine.handle(post(query)).await;
    assert_eq!(code(&response), "GRAPHQL_VALIDATION_FAILED");
}

#[tokio::test]
async fn persisted_queries() {
    let engine = engine();
    let query = "{ hello }";
    let hash = hex::encode(Sha256::digest(query.as_bytes()));
    let extensions =
        serde_json::json!({ "persistedQuery": { "version": 1, "sha256Hash": hash } });

    let response = engine
        .handle(post(serde_json::json!({ "extensions": extensions })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(code(&response), "PERSISTED_QUERY_NOT_FOUND");

    let response = engine
        .handle(post(
            serde_json::json!({ "query": query, "extensions": extensions }),
        ))
        .await;
    assert_eq!(body(&response), serde_json::json!({ "data": { "hello": "world" } }));

    let response = engine
        .handle(post(serde_json::json!({ "extensions": extensions })))
        .await;
    assert_eq!(body(&response), serde_json::json!({ "data": { "hello": "world" } }));

    let response = engine
        .handle(post(
            serde_json::json!({ "query": "{ count }", "extensions": extensions }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(code(&response), "PERSISTED_QUERY_HASH_MISMATCH");
}

#[tokio::test]
async fn public_responses_are_cached() {
    let (engine, counters) = engine_with(Configuration::default());
    let query = serde_json::json!({ "query": "{ hello }" });

    for _ in 0..3 {
        let response = engine.handle(post(query.clone())).await;
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=60, public"
        );
        assert_eq!(body(&response), serde_json::json!({ "data": { "hello": "world" } }));
    }
    assert_eq!(counters.hellos.load(Ordering::SeqCst), 1);
    // the context is still built for cached responses
    assert_eq!(counters.sessions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn uncacheable_responses_are_not_cached() {
    let (engine, counters) = engine_with(Configuration::default());
    let query = serde_json::json!({ "query": "{ hello count }" });
    for _ in 0..2 {
        let response = engine.handle(post(query.clone())).await;
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    }
    assert_eq!(counters.hellos.load(Ordering::SeqCst), 2);

    let configuration = Configuration::builder()
        .cache(Cache::builder().responses_enabled(false).build())
        .build()
        .unwrap();
    let (engine, counters) = engine_with(configuration);
    for _ in 0..2 {
        engine
            .handle(post(serde_json::json!({ "query": "{ hello }" })))
            .await;
    }
    assert_eq!(counters.hellos.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn drain_waits_for_admitted_operations() {
    let engine = engine();

    let in_flight = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .handle(post(serde_json::json!({ "query": "{ slow }" })))
                .await
        }
    });
    while engine.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let drained = tokio::spawn({
        let engine = engine.clone();
        async move { engine.drain().await }
    });
    while !engine.is_draining() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let refused = engine
        .handle(post(serde_json::json!({ "query": "{ hello }" })))
        .await;
    assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(code(&refused), "SERVER_DRAINING");
    assert!(!drained.is_finished());

    let response = in_flight.await.unwrap();
    assert_eq!(body(&response), serde_json::json!({ "data": { "slow": "done" } }));
    drained.await.unwrap();
    assert_eq!(engine.in_flight(), 0);
}
