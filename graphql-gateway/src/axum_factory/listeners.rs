//! Listeners and connections

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use futures::channel::oneshot;
use futures::prelude::*;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::rt::TokioTimer;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static MAX_FILE_HANDLES_WARN: AtomicBool = AtomicBool::new(false);

/// Serves `router` on `listener` until the returned sender fires or is dropped.
///
/// Once stopped, the listener is closed so new connections are refused, and every open
/// connection is told to shut down gracefully: requests in progress complete, idle keep-alive
/// connections close. `force_close` drops the remaining connections without waiting.
pub(super) fn serve_router_on_listen_addr(
    listener: TcpListener,
    address: SocketAddr,
    router: Router,
    all_connections_stopped_sender: mpsc::Sender<()>,
    force_close: CancellationToken,
) -> (impl Future<Output = ()>, oneshot::Sender<()>) {
    let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

    // this server reproduces most of hyper::server::Server's behaviour
    // we select over the shutdown receiver and the listener's accept future.
    // If the channel received something or the sender was dropped, we stop
    // using the listener and drop it
    let server = async move {
        tokio::pin!(shutdown_receiver);

        let connection_shutdown = CancellationToken::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_receiver => {
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, peer_address)) => {
                            if MAX_FILE_HANDLES_WARN.load(Ordering::SeqCst) {
                                tracing::info!("can accept connections again");
                                MAX_FILE_HANDLES_WARN.store(false, Ordering::SeqCst);
                            }

                            tokio::task::spawn(serve_connection(
                                stream,
                                peer_address,
                                router.clone(),
                                connection_shutdown.clone(),
                                force_close.clone(),
                                // this sender must be moved into the connection task to track
                                // that it is still running
                                all_connections_stopped_sender.clone(),
                            ));
                        }

                        Err(e) => match e.kind() {
                            // should be treated as EAGAIN
                            // https://man7.org/linux/man-pages/man2/accept.2.html
                            // Linux accept() (and accept4()) passes already-pending network
                            // errors on the new socket as an error code from accept().
                            //ECONNABORTED
                            std::io::ErrorKind::ConnectionAborted|
                            //EINTR
                            std::io::ErrorKind::Interrupted|
                            // EINVAL
                            std::io::ErrorKind::InvalidInput|
                            std::io::ErrorKind::PermissionDenied |
                            std::io::ErrorKind::TimedOut |
                            std::io::ErrorKind::ConnectionReset|
                            std::io::ErrorKind::NotConnected => {
                                // the socket was invalid (maybe timedout waiting in accept queue, or was closed)
                                // we should ignore that and get to the next one
                                continue;
                            }

                            // EPROTO, EOPNOTSUPP, EBADF, EFAULT, EMFILE, ENOBUFS, ENOMEM, ENOTSOCK
                            // We match on _ because max open file errors fall under ErrorKind::Uncategorized
                            _ => {
                                match e.raw_os_error() {
                                    Some(libc::EMFILE) | Some(libc::ENFILE) => {
                                        tracing::error!(
                                            "reached the max open file limit, cannot accept any new connection"
                                        );
                                        MAX_FILE_HANDLES_WARN.store(true, Ordering::SeqCst);
                                        tokio::time::sleep(Duration::from_millis(1)).await;
                                    }
                                    _ => {}
                                }
                                continue;
                            }
                        }
                    }
                }
            }
        }

        // the shutdown receiver was triggered so we break out of the server loop,
        // close the listen socket, then tell the currently active connections to stop
        drop(listener);
        tracing::info!(%address, "stopped accepting connections");
        connection_shutdown.cancel();
    };
    (server, shutdown_sender)
}

async fn serve_connection(
    stream: TcpStream,
    peer_address: SocketAddr,
    router: Router,
    connection_shutdown: CancellationToken,
    force_close: CancellationToken,
    _connection_stop_signal: mpsc::Sender<()>,
) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(%error, "could not set TCP_NODELAY");
    }

    let service = hyper::service::service_fn(move |request: http::Request<Incoming>| {
        router.clone().oneshot(request)
    });
    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        // the connection finished first
        res = &mut connection => {
            if let Err(error) = res {
                tracing::debug!(%error, %peer_address, "connection closed with an error");
            }
        }
        // the shutdown was triggered first, so we tell the connection to do a graceful shutdown:
        // a request in progress completes, then the connection closes
        _ = connection_shutdown.cancelled() => {
            connection.as_mut().graceful_shutdown();
            tokio::select! {
                _ = &mut connection => {}
                _ = force_close.cancelled() => {
                    tracing::warn!(%peer_address, "connection shutdown exceeded the drain deadline, forcing close");
                }
            }
        }
    }
}
