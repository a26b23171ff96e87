//! Interceptor chains.
//!
//! An [`Interceptor`] takes the `next` handler and returns a new handler that
//! may run logic before and after delegating, or answer on its own without
//! delegating at all. A [`Chain`] is an ordered list of interceptors; linking
//! it with a terminal handler folds the list into one handler.
//!
//! Nesting follows append order, outer to inner:
//!
//! ```text
//! chain.add([a, b]).link(t)   ==   a.wrap(b.wrap(t))
//!
//! request  ──► a.before ──► b.before ──► t
//! response ◄── a.after  ◄── b.after  ◄──┘
//! ```
//!
//! Chains are assembled once at startup. Missing interceptors (`None`) are
//! skipped rather than reported, so an absent optional interceptor never
//! stops the gateway from starting.

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::IntoResponse;

/// Wraps a handler in another handler.
///
/// Implemented for every `Fn(BoxedHandler) -> BoxedHandler`. For the common
/// "do something around `next`" case, [`from_fn`] is shorter.
pub trait Interceptor {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Interceptor for F
where
    F: Fn(BoxedHandler) -> BoxedHandler,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// A type-erased interceptor as stored by a [`Chain`].
pub type BoxedInterceptor = Arc<dyn Interceptor + Send + Sync + 'static>;

/// An ordered, append-only list of interceptors.
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Vec<BoxedInterceptor>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends interceptors in order, skipping `None` entries.
    ///
    /// Accepts anything that converts into `Option<BoxedInterceptor>`, so
    /// both `[a, b]` and `[Some(a), None]` work.
    ///
    /// ```rust
    /// use portcullis::chain::{BoxedInterceptor, Chain};
    /// use portcullis::handler::BoxedHandler;
    /// use std::sync::Arc;
    ///
    /// let noop: BoxedInterceptor = Arc::new(|next: BoxedHandler| next);
    /// let mut chain = Chain::new();
    /// chain.add([Some(noop.clone()), None]).add([noop]);
    /// assert_eq!(chain.len(), 2);
    /// ```
    pub fn add<I>(&mut self, interceptors: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Option<BoxedInterceptor>>,
    {
        self.interceptors
            .extend(interceptors.into_iter().filter_map(Into::into));
        self
    }

    /// Number of stored interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Composes the chain around `terminal` and returns the outermost handler.
    ///
    /// An empty chain returns `terminal` itself.
    pub fn link(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| interceptor.wrap(next))
    }
}

/// [`Chain::link`] for callers that may hold no chain or no terminal handler.
///
/// Returns `None` when either is absent.
pub fn link(chain: Option<&Chain>, terminal: Option<BoxedHandler>) -> Option<BoxedHandler> {
    Some(chain?.link(terminal?))
}

/// Builds an interceptor from an async function of the request and the next
/// handler.
///
/// ```rust
/// use portcullis::chain::from_fn;
/// use portcullis::handler::ErasedHandler;
///
/// let timing = from_fn(|req, next| async move {
///     let started = std::time::Instant::now();
///     let res = next.call(req).await;
///     tracing::debug!(elapsed = ?started.elapsed(), "handled");
///     res
/// });
/// ```
pub fn from_fn<F, Fut, R>(f: F) -> BoxedInterceptor
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: BoxedHandler| -> BoxedHandler {
        Arc::new(FromFn { f: Arc::clone(&f), next })
    })
}

struct FromFn<F> {
    f: Arc<F>,
    next: BoxedHandler,
}

impl<F, Fut, R> ErasedHandler for FromFn<F>
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.f)(req, Arc::clone(&self.next));
        Box::pin(async move { fut.await.into_response() })
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("len", &self.len()).finish()
    }
}
