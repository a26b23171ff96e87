//! Minimal gateway: a traced chain in front of a JSON echo handler.
//!
//! Run with:
//!   RUST_LOG=debug PORTCULLIS__MASK_HEADER_KEYS=authorization cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/keys?team=core -H 'authorization: Bearer s3cret'
//!   curl -X POST http://localhost:3000/keys -d '{"name":"ci"}'
//!   curl http://localhost:3000/admin          # short-circuited with 403
//!
//! Ctrl-C once to drain, twice to exit immediately.

use http::StatusCode;
use portcullis::chain::from_fn;
use portcullis::handler::ErasedHandler;
use portcullis::trace::{SpanManager, TraceInterceptor};
use portcullis::{Chain, Handler, InstrumentationConfig, Request, Response, Server, SignalRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), portcullis::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = InstrumentationConfig::load(None)?;
    let tracer = TraceInterceptor::new(SpanManager::default(), config.redaction_policy());

    // Stands in for a real authorization interceptor.
    let deny_admin = from_fn(|req: Request, next| async move {
        if req.path().starts_with("/admin") {
            return Response::status(StatusCode::FORBIDDEN);
        }
        next.call(req).await
    });

    let mut chain = Chain::new();
    chain.add([tracer.into_interceptor(), deny_admin]);
    let app = chain.link(echo.into_boxed_handler());

    let shutdown = SignalRegistry::global().setup_signal_handler();
    Server::bind("0.0.0.0:3000".parse().expect("valid address"))
        .await?
        .serve(app, shutdown)
        .await
}

// Echoes method, path and body length.
async fn echo(mut req: Request) -> Response {
    use http_body_util::BodyExt;

    let len = match req.body_mut().collect().await {
        Ok(body) => body.to_bytes().len(),
        Err(_) => return Response::status(StatusCode::BAD_REQUEST),
    };
    Response::json(
        format!(r#"{{"method":"{}","path":"{}","body_len":{len}}}"#, req.method(), req.path()).into_bytes(),
    )
}
