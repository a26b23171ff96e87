//! The interceptor that opens, tags and closes one span per request.

use std::sync::Arc;

use opentelemetry::trace::{TraceContextExt, Tracer};
use opentelemetry::trace::noop::NoopTracer;

use crate::chain::{BoxedInterceptor, Interceptor};
use crate::config::RedactionPolicy;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::trace::hydrate::{hydrate_from_request, hydrate_from_response};
use crate::trace::span::{SpanGuard, SpanManager};

/// Interceptor that traces every request passing through it.
///
/// Add it first so it wraps everything else: the span then covers the whole
/// pipeline, and inner interceptors and the terminal handler can reach it via
/// [`RequestContext::span`](crate::RequestContext::span).
pub struct TraceInterceptor<T = NoopTracer> {
    spans: Arc<SpanManager<T>>,
    policy: Arc<RedactionPolicy>,
}

impl<T> TraceInterceptor<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    pub fn new(spans: SpanManager<T>, policy: RedactionPolicy) -> Self {
        Self { spans: Arc::new(spans), policy: Arc::new(policy) }
    }

    pub fn into_interceptor(self) -> BoxedInterceptor {
        Arc::new(self)
    }
}

impl<T> Interceptor for TraceInterceptor<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Traced {
            spans: Arc::clone(&self.spans),
            policy: Arc::clone(&self.policy),
            next,
        })
    }
}

struct Traced<T> {
    spans: Arc<SpanManager<T>>,
    policy: Arc<RedactionPolicy>,
    next: BoxedHandler,
}

impl<T> ErasedHandler for Traced<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn call(&self, mut req: Request) -> BoxFuture {
        let spans = Arc::clone(&self.spans);
        let policy = Arc::clone(&self.policy);
        let next = Arc::clone(&self.next);

        // The span starts on first poll, so a request future dropped before
        // it ever runs leaves no unfinished span behind.
        Box::pin(async move {
            let cx = spans.start_span(req.as_http());
            let _guard = SpanGuard::new(cx.clone());

            // Nothing to tag on a span that records nothing, and hydrating
            // would buffer both bodies.
            let recording = cx.span().is_recording();

            if recording {
                hydrate_from_request(Some(req.as_http_mut()), &cx, &policy).await;
            }
            req.context_mut().set_span(cx.clone());

            let mut res = next.call(req).await;
            if recording {
                hydrate_from_response(Some(res.as_http_mut()), &cx, &policy).await;
            }
            res
        })
    }
}
