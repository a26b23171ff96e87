//! Host server: serves a composed handler until told to stop.
//!
//! # Graceful shutdown
//!
//! [`Server::serve`] watches a [`CancellationToken`], normally the one
//! returned by [`SignalRegistry::setup_signal_handler`](crate::SignalRegistry::setup_signal_handler).
//! Once it is cancelled the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Tells every open connection to shut down gracefully: requests already
//!    in flight finish, idle keep-alive connections close right away.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! A second signal during the drain exits the process without waiting.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::body::{self, Body};
use crate::error::Error;
use crate::handler::{BoxedHandler, ErasedHandler};
use crate::request::Request;

/// The HTTP server.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Binds a listener on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        Ok(Self { listener: TcpListener::bind(addr).await? })
    }

    /// Serves on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections and dispatches every request to `handler`.
    ///
    /// Returns after `shutdown` is cancelled and every open connection has
    /// finished its in-flight requests and closed.
    pub async fn serve(self, handler: BoxedHandler, shutdown: CancellationToken) -> Result<(), Error> {
        let listener = self.listener;
        let addr = listener.local_addr()?;

        info!(%addr, "portcullis listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                // Check shutdown first so cancellation stops accepting at
                // once, even if more connections are queued.
                biased;

                () = shutdown.cancelled() => {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&handler);
                    let shutdown = shutdown.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not
                        // once per connection.
                        let svc = service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move { dispatch(handler, req).await }
                        });

                        // Handles both HTTP/1.1 and HTTP/2, whatever the
                        // client negotiates.
                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        // An idle keep-alive connection would otherwise hold
                        // the drain open forever.
                        let res = tokio::select! {
                            res = conn.as_mut() => res,
                            () = shutdown.cancelled() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = res {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("portcullis stopped");
        Ok(())
    }
}

/// Runs one request through the composed handler.
///
/// Infallible: every failure inside the chain is already a response.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<Body>, std::convert::Infallible> {
    let req = req.map(body::from_incoming);
    let response = handler.call(Request::new(req)).await;
    Ok(response.into_inner())
}
