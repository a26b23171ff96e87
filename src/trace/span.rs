//! Starting and finishing one span per inbound request.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{TraceContextExt, Tracer};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::debug;

/// Starts request spans on an injected tracer.
///
/// The tracer defaults to a no-op, so code can always start and tag spans
/// whether or not a backend is configured. Propagation defaults to W3C
/// Trace Context (`traceparent` / `tracestate`).
pub struct SpanManager<T = NoopTracer> {
    tracer: T,
    propagator: Box<dyn TextMapPropagator + Send + Sync>,
}

impl Default for SpanManager<NoopTracer> {
    fn default() -> Self {
        Self::new(NoopTracer::new())
    }
}

impl<T> SpanManager<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self { tracer, propagator: Box::new(TraceContextPropagator::new()) }
    }

    /// Replaces the propagator used to read upstream trace context.
    pub fn with_propagator(mut self, propagator: impl TextMapPropagator + Send + Sync + 'static) -> Self {
        self.propagator = Box::new(propagator);
        self
    }

    /// Starts the span for `req` and returns a context holding it.
    ///
    /// If the headers carry a valid upstream trace context the span is its
    /// child; otherwise it is a new root. Missing or malformed propagation
    /// headers are never an error.
    pub fn start_span<B>(&self, req: &http::Request<B>) -> Context {
        let name = span_name(req.method(), req.uri().path());

        let extracted = self
            .propagator
            .extract_with_context(&Context::new(), &HeaderExtractor(req.headers()));
        let parent = if extracted.span().span_context().is_valid() {
            extracted
        } else {
            debug!(span = %name, "no upstream trace context, starting root span");
            Context::new()
        };

        let span = self.tracer.start_with_context(name, &parent);
        parent.with_span(span)
    }

    /// Writes the trace context of `cx` into `headers`, for forwarding the
    /// trace to an upstream service.
    pub fn inject(&self, cx: &Context, headers: &mut HeaderMap) {
        self.propagator.inject_context(cx, &mut HeaderInjector(headers));
    }
}

/// `"<METHOD> <escaped-path>"`.
pub fn span_name(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

/// Ends the span held by a context when dropped.
///
/// Create it right after [`SpanManager::start_span`]. Whatever happens next,
/// a normal return, a short-circuit, a panic unwinding through the handler,
/// or the request future being dropped, the span is finished exactly once.
pub struct SpanGuard {
    cx: Context,
}

impl SpanGuard {
    pub fn new(cx: Context) -> Self {
        Self { cx }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            self.0.insert(name, value);
        }
    }
}
