//! # portcullis
//!
//! Request instrumentation for an HTTP gateway.
//!
//! - [`Chain`] composes interceptors around a terminal handler, outer to
//!   inner in the order they were added.
//! - [`trace`] starts one span per request, continues upstream traces, and
//!   tags the span from the request and response with sensitive headers
//!   masked. Bodies are captured without consuming them.
//! - [`SignalRegistry`] turns the first SIGINT / SIGTERM into a cancellation
//!   token the [`Server`] drains on, and the second into an immediate exit.
//!
//! Routing, authentication and rate limiting are not here. They are
//! interceptors or handlers you plug into a chain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use portcullis::trace::{SpanManager, TraceInterceptor};
//! use portcullis::{Chain, Handler, InstrumentationConfig, Request, Response, Server, SignalRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), portcullis::Error> {
//!     let config = InstrumentationConfig::load(None)?;
//!     let tracing = TraceInterceptor::new(SpanManager::default(), config.redaction_policy());
//!
//!     let mut chain = Chain::new();
//!     chain.add([tracing.into_interceptor()]);
//!     let app = chain.link(hello.into_boxed_handler());
//!
//!     let shutdown = SignalRegistry::global().setup_signal_handler();
//!     Server::bind("0.0.0.0:3000".parse().unwrap())
//!         .await?
//!         .serve(app, shutdown)
//!         .await
//! }
//!
//! async fn hello(_req: Request) -> Response {
//!     Response::text("hello")
//! }
//! ```

mod body;
mod config;
mod error;
mod request;
mod response;
mod server;
mod shutdown;

pub mod chain;
pub mod handler;
pub mod trace;

pub use crate::body::{Body, BodyReadError, BoxError, duplicate as duplicate_body, empty as empty_body, full as full_body};
pub use crate::chain::{BoxedInterceptor, Chain, Interceptor};
pub use crate::config::{InstrumentationConfig, RedactionPolicy};
pub use crate::error::Error;
pub use crate::handler::{BoxedHandler, Handler};
pub use crate::request::{Request, RequestContext};
pub use crate::response::{IntoResponse, Response, ResponseBuilder};
pub use crate::server::Server;
pub use crate::shutdown::{FORCED_EXIT_CODE, ShutdownSignal, ShutdownState, SignalRegistry};
