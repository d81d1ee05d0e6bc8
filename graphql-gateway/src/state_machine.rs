use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::configuration::Configuration;
use crate::engine::GraphQLEngine;
use crate::error::GatewayError;
use crate::http_server_factory::HttpServerFactory;
use crate::http_server_factory::HttpServerHandle;

/// The lifecycle state of a [`crate::GatewayServer`].
///
/// `Created -> Starting -> Listening -> Draining -> Closed`, or `Errored` when startup fails.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum State {
    Created,
    Starting,
    Listening { address: SocketAddr },
    Draining,
    Closed,
    Errored,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Created => write!(f, "created"),
            State::Starting => write!(f, "starting"),
            State::Listening { address } => write!(f, "listening on {address}"),
            State::Draining => write!(f, "draining"),
            State::Closed => write!(f, "closed"),
            State::Errored => write!(f, "errored"),
        }
    }
}

/// Drives the gateway through its lifecycle and publishes every transition.
///
/// Startup failures are fatal: the machine goes to `Errored` and never listens. Once listening,
/// the shutdown future starts the drain: the listen socket is closed first, then the engine and
/// the open connections get `shutdown.drain_deadline` to finish before they are force-closed.
pub(crate) struct StateMachine<S>
where
    S: HttpServerFactory,
{
    http_server_factory: S,
    state: watch::Sender<State>,
}

impl<S> StateMachine<S>
where
    S: HttpServerFactory,
{
    pub(crate) fn new(http_server_factory: S, state: watch::Sender<State>) -> Self {
        Self {
            http_server_factory,
            state,
        }
    }

    pub(crate) async fn process_events(
        self,
        configuration: Arc<Configuration>,
        engine: GraphQLEngine,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), GatewayError> {
        self.transition(State::Starting);

        let mut server_handle = match self.start(engine.clone(), configuration.clone()).await {
            Ok(server_handle) => server_handle,
            Err(error) => {
                tracing::error!("failed to start the gateway: {error}");
                self.transition(State::Errored);
                return Err(error);
            }
        };
        self.transition(State::Listening {
            address: server_handle.listen_address(),
        });

        shutdown.await;

        if let Err(error) = server_handle.stop_accepting().await {
            self.transition(State::Errored);
            return Err(error);
        }
        self.transition(State::Draining);

        let deadline = configuration.drain_deadline();
        let drained = tokio::time::timeout(deadline, async {
            engine.drain().await;
            server_handle.connections_closed().await;
        })
        .await;

        let result = match drained {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    deadline = ?deadline,
                    in_flight = engine.in_flight(),
                    "drain deadline exceeded, forcing connections to close"
                );
                server_handle.force_close();
                server_handle.connections_closed().await;
                Err(GatewayError::DrainDeadlineExceeded(deadline))
            }
        };

        self.transition(State::Closed);
        result
    }

    async fn start(
        &self,
        engine: GraphQLEngine,
        configuration: Arc<Configuration>,
    ) -> Result<HttpServerHandle, GatewayError> {
        engine.start()?;
        self.http_server_factory.create(engine, configuration).await
    }

    fn transition(&self, state: State) {
        let previous = self.state.send_replace(state.clone());
        tracing::info!("gateway state changed from {previous} to {state}");
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::channel::oneshot;
    use test_log::test;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::configuration::Shutdown;
    use crate::context::ContextFactory;
    use crate::json_ext::Value;
    use crate::schema::Resolvers;
    use crate::schema::assemble;

    #[derive(Default, Clone)]
    struct StubServerFactory {
        created: Arc<AtomicUsize>,
    }

    impl HttpServerFactory for StubServerFactory {
        type Future =
            Pin<Box<dyn Future<Output = Result<HttpServerHandle, GatewayError>> + Send>>;

        fn create(&self, _engine: GraphQLEngine, _configuration: Arc<Configuration>) -> Self::Future {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
                let (connection_sender, connection_receiver) = mpsc::channel(1);
                let accept_loop = tokio::task::spawn(async move {
                    let _ = shutdown_receiver.await;
                    drop(connection_sender);
                });
                Ok(HttpServerHandle::new(
                    shutdown_sender,
                    accept_loop,
                    connection_receiver,
                    CancellationToken::new(),
                    "127.0.0.1:4000".parse().unwrap(),
                ))
            })
        }
    }

    fn engine(configuration: &Configuration) -> GraphQLEngine {
        let schema = assemble(
            "type Query { stuck: Boolean }",
            Resolvers::new().field("Query", "stuck", |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Bool(true))
            }),
        )
        .unwrap();
        GraphQLEngine::new(schema, ContextFactory::anonymous(), configuration)
    }

    fn stuck_request() -> http::Request<Bytes> {
        http::Request::post("/graphql")
            .header("content-type", "application/json")
            .body(Bytes::from_static(br#"{"query":"{ stuck }"}"#))
            .unwrap()
    }

    #[test(tokio::test)]
    async fn listens_until_shutdown_then_closes() {
        let configuration = Arc::new(Configuration::default());
        let factory = StubServerFactory::default();
        let (state_sender, mut state_receiver) = watch::channel(State::Created);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let machine = StateMachine::new(factory.clone(), state_sender);
        let run = tokio::task::spawn(machine.process_events(
            configuration.clone(),
            engine(&configuration),
            async move {
                let _ = shutdown_receiver.await;
            },
        ));

        let listening = state_receiver
            .wait_for(|state| matches!(state, State::Listening { .. }))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            listening,
            State::Listening {
                address: "127.0.0.1:4000".parse().unwrap()
            }
        );

        shutdown_sender.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert_eq!(*state_receiver.borrow(), State::Closed);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test(tokio::test)]
    async fn an_already_started_engine_never_listens() {
        let configuration = Arc::new(Configuration::default());
        let factory = StubServerFactory::default();
        let (state_sender, state_receiver) = watch::channel(State::Created);
        let engine = engine(&configuration);
        engine.start().unwrap();

        let result = StateMachine::new(factory.clone(), state_sender)
            .process_events(configuration, engine, futures::future::pending())
            .await;

        assert!(matches!(result, Err(GatewayError::AlreadyStarted)));
        assert_eq!(*state_receiver.borrow(), State::Errored);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[test(tokio::test)]
    async fn drain_deadline_is_enforced() {
        let configuration = Arc::new(
            Configuration::builder()
                .shutdown(
                    Shutdown::builder()
                        .drain_deadline(Duration::from_millis(100))
                        .build(),
                )
                .build()
                .unwrap(),
        );
        let engine = engine(&configuration);
        let (state_sender, state_receiver) = watch::channel(State::Created);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let machine = StateMachine::new(StubServerFactory::default(), state_sender);
        let run = tokio::task::spawn(machine.process_events(
            configuration.clone(),
            engine.clone(),
            async move {
                let _ = shutdown_receiver.await;
            },
        ));

        let mut listening = state_receiver.clone();
        listening
            .wait_for(|state| matches!(state, State::Listening { .. }))
            .await
            .unwrap();

        let stuck_engine = engine.clone();
        let _stuck = tokio::task::spawn(async move { stuck_engine.handle(stuck_request()).await });
        while engine.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        shutdown_sender.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("the deadline must bound the drain")
            .unwrap();
        assert!(matches!(
            result,
            Err(GatewayError::DrainDeadlineExceeded(deadline)) if deadline == Duration::from_millis(100)
        ));
        assert_eq!(*state_receiver.borrow(), State::Closed);
    }
}
