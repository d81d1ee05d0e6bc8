//! Startup and graceful shutdown of a gateway served over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use graphql_gateway::Configuration;
use graphql_gateway::ContextFactory;
use graphql_gateway::GatewayError;
use graphql_gateway::GatewayServer;
use graphql_gateway::GatewayServerHandle;
use graphql_gateway::GraphQLEngine;
use graphql_gateway::ResolveInfo;
use graphql_gateway::Resolvers;
use graphql_gateway::ShutdownSource;
use graphql_gateway::State;
use graphql_gateway::assemble;
use graphql_gateway::json_ext::Value;
use serde_json::json;
use tokio::sync::Notify;
use tokio::sync::oneshot;

/// A `slow` field that signals when it starts and only completes once released.
#[derive(Clone, Default)]
struct SlowField {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl SlowField {
    fn resolvers(&self) -> Resolvers {
        let slow = self.clone();
        Resolvers::new().field("Query", "slow", move |_info: ResolveInfo| {
            let slow = slow.clone();
            async move {
                slow.started.notify_one();
                slow.release.notified().await;
                Ok(Value::from("done"))
            }
        })
    }
}

fn start(yaml: &str, resolvers: Resolvers) -> (GatewayServerHandle, oneshot::Sender<()>) {
    let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
    let configuration: Configuration = yaml.parse().unwrap();
    let handle = GatewayServer::builder()
        .configuration(configuration)
        .schema(assemble("type Query { slow: String }", resolvers).unwrap())
        .shutdown(ShutdownSource::Custom(
            async move {
                let _ = shutdown_receiver.await;
            }
            .boxed(),
        ))
        .build()
        .unwrap()
        .serve();
    (handle, shutdown_sender)
}

fn slow_query(
    address: SocketAddr,
) -> tokio::task::JoinHandle<reqwest::Result<serde_json::Value>> {
    tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{address}/graphql"))
            .json(&json!({ "query": "{ slow }" }))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_waits_for_in_flight_requests_and_refuses_new_connections() {
    let slow = SlowField::default();
    let (mut handle, shutdown) = start("server:\n  listen: 127.0.0.1:0\n", slow.resolvers());
    let address = handle.ready().await.expect("the gateway should listen");

    let in_flight = slow_query(address);
    slow.started.notified().await;

    let mut state = handle.state_receiver();
    shutdown.send(()).unwrap();
    state
        .wait_for(|state| *state == State::Draining)
        .await
        .unwrap();

    assert!(
        tokio::net::TcpStream::connect(address).await.is_err(),
        "new connections must be refused while draining"
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), &mut handle)
            .await
            .is_err(),
        "the gateway must not stop before the in-flight response is sent"
    );

    slow.release.notify_one();
    assert_eq!(
        in_flight.await.unwrap().unwrap(),
        json!({ "data": { "slow": "done" } })
    );
    tokio::time::timeout(Duration::from_secs(5), &mut handle)
        .await
        .expect("the gateway should stop once drained")
        .unwrap();
    assert_eq!(handle.state(), State::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_deadline_closes_stuck_connections() {
    let slow = SlowField::default();
    let (mut handle, shutdown) = start(
        "server:\n  listen: 127.0.0.1:0\nshutdown:\n  drain_deadline: 200ms\n",
        slow.resolvers(),
    );
    let address = handle.ready().await.expect("the gateway should listen");

    let in_flight = slow_query(address);
    slow.started.notified().await;
    shutdown.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), &mut handle)
        .await
        .expect("the drain deadline should bound the shutdown");
    assert!(matches!(
        result,
        Err(GatewayError::DrainDeadlineExceeded(deadline)) if deadline == Duration::from_millis(200)
    ));
    assert_eq!(handle.state(), State::Closed);
    assert!(in_flight.await.unwrap().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_port_in_use_is_a_fatal_startup_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap();

    let (mut handle, _shutdown) = start(
        &format!("server:\n  listen: {address}\n"),
        SlowField::default().resolvers(),
    );

    assert_eq!(handle.ready().await, None);
    assert_eq!(handle.state(), State::Errored);
    assert!(matches!(
        (&mut handle).await,
        Err(GatewayError::BindError(bound, _)) if bound == address
    ));
}

#[tokio::test]
async fn an_engine_starts_once() {
    let configuration = Configuration::default();
    let engine = GraphQLEngine::new(
        assemble("type Query { slow: String }", Resolvers::new()).unwrap(),
        ContextFactory::anonymous(),
        &configuration,
    );

    assert!(!engine.is_started());
    engine.start().unwrap();
    assert!(engine.is_started());
    assert!(matches!(engine.start(), Err(GatewayError::AlreadyStarted)));
}

#[tokio::test]
async fn requests_are_rejected_once_draining() {
    let configuration = Configuration::default();
    let engine = GraphQLEngine::new(
        assemble("type Query { slow: String }", Resolvers::new()).unwrap(),
        ContextFactory::anonymous(),
        &configuration,
    );
    engine.start().unwrap();
    engine.drain().await;

    let response = engine
        .handle(
            http::Request::post("/graphql")
                .header("content-type", "application/json")
                .body(bytes::Bytes::from_static(br#"{"query":"{ slow }"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("SERVER_DRAINING"));
}
