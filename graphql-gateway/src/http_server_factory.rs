use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use derivative::Derivative;
use futures::channel::oneshot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configuration::Configuration;
use crate::engine::GraphQLEngine;
use crate::error::GatewayError;

/// Factory for creating the http server component.
///
/// This trait enables us to test that `StateMachine` walks through its states without binding
/// a socket.
pub(crate) trait HttpServerFactory {
    type Future: Future<Output = Result<HttpServerHandle, GatewayError>> + Send;

    fn create(&self, engine: GraphQLEngine, configuration: Arc<Configuration>) -> Self::Future;
}

/// A handle with which a client can shut down the server gracefully.
///
/// Shutdown happens in two steps: [`HttpServerHandle::stop_accepting`] closes the listen socket,
/// then [`HttpServerHandle::connections_closed`] waits until every open connection has finished
/// its request in progress.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct HttpServerHandle {
    /// Sender to use to notify of shutdown
    shutdown_sender: Option<oneshot::Sender<()>>,

    /// The accept loop, completes once the listen socket is closed
    #[derivative(Debug = "ignore")]
    accept_loop: Option<JoinHandle<()>>,

    /// Yields `None` once every connection task is gone
    #[derivative(Debug = "ignore")]
    all_connections_stopped: mpsc::Receiver<()>,

    force_close: CancellationToken,

    /// The listen address that the server is actually listening on.
    /// If the socket address specified port zero the OS will assign a random free port.
    listen_address: SocketAddr,
}

impl HttpServerHandle {
    pub(crate) fn new(
        shutdown_sender: oneshot::Sender<()>,
        accept_loop: JoinHandle<()>,
        all_connections_stopped: mpsc::Receiver<()>,
        force_close: CancellationToken,
        listen_address: SocketAddr,
    ) -> Self {
        Self {
            shutdown_sender: Some(shutdown_sender),
            accept_loop: Some(accept_loop),
            all_connections_stopped,
            force_close,
            listen_address,
        }
    }

    /// Closes the listen socket. New connections are refused once this returns.
    pub(crate) async fn stop_accepting(&mut self) -> Result<(), GatewayError> {
        if let Some(sender) = self.shutdown_sender.take()
            && sender.send(()).is_err()
        {
            tracing::error!("Failed to notify http thread of shutdown")
        }
        if let Some(accept_loop) = self.accept_loop.take() {
            accept_loop.await.map_err(|error| {
                tracing::error!(%error, "the accept loop failed");
                GatewayError::HttpServerLifecycleError
            })?;
        }
        Ok(())
    }

    /// Resolves once every connection has been closed.
    pub(crate) async fn connections_closed(&mut self) {
        while self.all_connections_stopped.recv().await.is_some() {}
    }

    /// Drops every connection still open, even if a request is in progress.
    pub(crate) fn force_close(&self) {
        self.force_close.cancel();
    }

    pub(crate) fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }
}
