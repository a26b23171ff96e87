//! Inbound request type and its request-scoped context.

use http::{Extensions, HeaderMap, Method, Uri};

use crate::body::Body;

/// An inbound HTTP request flowing through the interceptor chain.
///
/// Wraps the `http` request together with a [`RequestContext`]. Interceptors
/// thread values to each other and to the terminal handler through the
/// context, never through shared state.
pub struct Request {
    inner: http::Request<Body>,
    ctx: RequestContext,
}

impl Request {
    pub fn new(inner: http::Request<Body>) -> Self {
        Self { inner, ctx: RequestContext::default() }
    }

    pub fn from_parts(inner: http::Request<Body>, ctx: RequestContext) -> Self {
        Self { inner, ctx }
    }

    pub fn into_parts(self) -> (http::Request<Body>, RequestContext) {
        (self.inner, self.ctx)
    }

    pub fn method(&self) -> &Method { self.inner.method() }
    pub fn uri(&self) -> &Uri { self.inner.uri() }
    pub fn path(&self) -> &str { self.inner.uri().path() }
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }
    pub fn body_mut(&mut self) -> &mut Body { self.inner.body_mut() }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    pub fn context(&self) -> &RequestContext { &self.ctx }
    pub fn context_mut(&mut self) -> &mut RequestContext { &mut self.ctx }

    /// The underlying `http` request, for code that works on raw messages.
    pub fn as_http(&self) -> &http::Request<Body> { &self.inner }
    pub fn as_http_mut(&mut self) -> &mut http::Request<Body> { &mut self.inner }
}

impl From<http::Request<Body>> for Request {
    fn from(inner: http::Request<Body>) -> Self {
        Self::new(inner)
    }
}

/// Strongly-typed, request-scoped values.
///
/// Two kinds of slot:
/// - the trace span, set by the tracing interceptor, read with [`span`](Self::span)
/// - arbitrary typed values keyed by their type, via [`insert`](Self::insert)
///   and [`get`](Self::get)
///
/// ```rust
/// use portcullis::RequestContext;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct TenantId(u32);
///
/// let mut ctx = RequestContext::default();
/// ctx.insert(TenantId(7));
/// assert_eq!(ctx.get::<TenantId>(), Some(&TenantId(7)));
/// ```
#[derive(Default)]
pub struct RequestContext {
    span: Option<opentelemetry::Context>,
    values: Extensions,
}

impl RequestContext {
    /// The trace context holding this request's span, once one was started.
    pub fn span(&self) -> Option<&opentelemetry::Context> {
        self.span.as_ref()
    }

    pub fn set_span(&mut self, cx: opentelemetry::Context) {
        self.span = Some(cx);
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut::<T>()
    }
}
