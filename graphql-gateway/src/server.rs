//! The entry point for running the gateway's HTTP server.

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use derivative::Derivative;
use futures::channel::oneshot;
use futures::prelude::*;
use tokio::sync::watch;
use tokio::task::spawn;
use tracing_futures::WithSubscriber;

use crate::axum_factory::AxumHttpServerFactory;
use crate::configuration::Configuration;
use crate::context::ContextFactory;
use crate::engine::GraphQLEngine;
use crate::error::GatewayError;
use crate::schema::ExecutableSchema;
use crate::session::CookieSessionResolver;
use crate::session::NoSessionResolver;
use crate::session::SessionResolver;
use crate::state_machine::State;
use crate::state_machine::StateMachine;

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Specifies when the gateway's HTTP server should gracefully shutdown
#[derive(Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub enum ShutdownSource {
    /// No graceful shutdown
    None,

    /// A custom shutdown future.
    Custom(#[derivative(Debug = "ignore")] ShutdownFuture),

    /// Watch for Ctl-C signal, and SIGTERM on unix.
    CtrlC,
}

impl fmt::Display for ShutdownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSource::None => write!(f, "None"),
            ShutdownSource::Custom(_) => write!(f, "Custom"),
            ShutdownSource::CtrlC => write!(f, "CtrlC"),
        }
    }
}

impl ShutdownSource {
    /// Convert this shutdown hook into a future. Allows for unified handling later.
    pub(crate) fn into_shutdown_future(self) -> ShutdownFuture {
        match self {
            ShutdownSource::None => future::pending::<()>().boxed(),
            ShutdownSource::Custom(future) => future,
            ShutdownSource::CtrlC => async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::SignalKind;
                    use tokio::signal::unix::signal;

                    match signal(SignalKind::terminate()) {
                        Ok(mut terminate) => {
                            tokio::select! {
                                _ = ctrl_c() => {}
                                _ = terminate.recv() => {}
                            }
                        }
                        Err(error) => {
                            tracing::error!(%error, "failed to install SIGTERM signal handler");
                            ctrl_c().await;
                        }
                    }
                }

                #[cfg(not(unix))]
                ctrl_c().await;

                tracing::info!("received shutdown signal");
            }
            .boxed(),
        }
    }
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install CTRL+C signal handler");
        future::pending::<()>().await;
    }
}

/// The gateway: an executable schema, a session resolver and the configuration of the HTTP
/// server that serves them.
///
/// # Examples
///
/// ```ignore
/// let schema = graphql_gateway::assemble("type Query { hello: String }", Resolvers::new())?;
/// let mut server = GatewayServer::builder()
///     .schema(schema)
///     .build()?
///     .serve();
/// let address = server.ready().await;
/// // …
/// server.shutdown().await?;
/// ```
#[derive(Debug)]
pub struct GatewayServer {
    configuration: Configuration,
    schema: ExecutableSchema,
    context_factory: ContextFactory,
    shutdown: ShutdownSource,
}

/// Builder for [`GatewayServer`].
///
/// * `.schema(`[`ExecutableSchema`]`)`
///   Required.
///
/// * `.configuration(`[`Configuration`]`)`
///   Optional, defaults to the configuration of an empty YAML file.
///
/// * `.session_resolver(impl `[`SessionResolver`]`)`
///   Optional. When not provided, a [`CookieSessionResolver`] is created if
///   `session.endpoint` is configured, otherwise every request executes anonymously.
///
/// * `.shutdown(`[`ShutdownSource`]`)`
///   Optional, defaults to [`ShutdownSource::CtrlC`].
#[derive(Default)]
pub struct GatewayServerBuilder {
    configuration: Option<Configuration>,
    schema: Option<ExecutableSchema>,
    session_resolver: Option<Arc<dyn SessionResolver>>,
    shutdown: Option<ShutdownSource>,
}

impl GatewayServerBuilder {
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn schema(mut self, schema: ExecutableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn session_resolver(mut self, session_resolver: impl SessionResolver) -> Self {
        self.session_resolver = Some(Arc::new(session_resolver));
        self
    }

    pub fn shutdown(mut self, shutdown: ShutdownSource) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Result<GatewayServer, GatewayError> {
        let schema = self.schema.ok_or(GatewayError::NoSchema)?;
        let configuration = self.configuration.unwrap_or_default();
        let session_resolver: Arc<dyn SessionResolver> = match self.session_resolver {
            Some(session_resolver) => session_resolver,
            None => match CookieSessionResolver::from_configuration(&configuration.session)? {
                Some(session_resolver) => Arc::new(session_resolver) as Arc<dyn SessionResolver>,
                None => {
                    tracing::debug!("no session endpoint configured, requests execute anonymously");
                    Arc::new(NoSessionResolver)
                }
            },
        };
        let context_factory = ContextFactory::new(session_resolver, &configuration.session);

        Ok(GatewayServer {
            configuration,
            schema,
            context_factory,
            shutdown: self.shutdown.unwrap_or(ShutdownSource::CtrlC),
        })
    }
}

impl GatewayServer {
    pub fn builder() -> GatewayServerBuilder {
        GatewayServerBuilder::default()
    }

    /// Starts the HTTP server in a separate Tokio task and returns its handle.
    ///
    /// The handle can be used in multiple ways.
    /// As a [`Future`], it resolves to `Result<(), `[`GatewayError`]`>`
    /// either when the server has finished draining
    /// or when it encounters a fatal error that prevents it from starting.
    ///
    /// If the handle is dropped before being awaited as a future,
    /// a graceful shutdown is triggered.
    /// In order to wait until shutdown finishes,
    /// use the [`shutdown`][GatewayServerHandle::shutdown] method instead.
    pub fn serve(self) -> GatewayServerHandle {
        let (state_sender, state_receiver) = watch::channel(State::Created);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let configuration = Arc::new(self.configuration);
        let engine = GraphQLEngine::new(self.schema, self.context_factory, &configuration);
        let shutdown = future::select(self.shutdown.into_shutdown_future(), shutdown_receiver)
            .map(|_| ());

        let state_machine = StateMachine::new(AxumHttpServerFactory::new(), state_sender);
        let result = spawn(
            async move {
                state_machine
                    .process_events(configuration, engine, shutdown)
                    .await
            }
            .with_current_subscriber(),
        )
        .map(|r| match r {
            Ok(Ok(ok)) => Ok(ok),
            Ok(Err(err)) => Err(err),
            Err(err) => {
                tracing::error!("{}", err);
                Err(GatewayError::StartupError)
            }
        })
        .with_current_subscriber()
        .boxed();

        GatewayServerHandle {
            result,
            state: state_receiver,
            shutdown_sender: Some(shutdown_sender),
        }
    }
}

/// Handle on a running [`GatewayServer`].
pub struct GatewayServerHandle {
    result: Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send>>,
    state: watch::Receiver<State>,
    shutdown_sender: Option<oneshot::Sender<()>>,
}

impl GatewayServerHandle {
    /// Observes lifecycle transitions.
    pub fn state_receiver(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    /// Resolves to the bound address once the server listens, or to `None` if it failed to start.
    ///
    /// This can be useful when `server.listen` specifies TCP port 0,
    /// which instructs the operating system to pick an available port number.
    pub fn ready(&self) -> impl Future<Output = Option<SocketAddr>> + Send + 'static {
        let mut state = self.state.clone();
        async move {
            let reached = state
                .wait_for(|state| {
                    matches!(
                        state,
                        State::Listening { .. } | State::Errored | State::Closed
                    )
                })
                .await
                .ok()?
                .clone();
            match reached {
                State::Listening { address } => Some(address),
                _ => None,
            }
        }
    }

    /// Trigger and wait for graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), GatewayError> {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
        (&mut self.result).await
    }
}

impl fmt::Debug for GatewayServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayServerHandle")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Drop for GatewayServerHandle {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
    }
}

impl Future for GatewayServerHandle {
    type Output = Result<(), GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.poll_unpin(cx)
    }
}
