//! Per-request trace spans.
//!
//! [`SpanManager`] starts one span per inbound request, continuing an
//! upstream trace when the request carries one. The hydrators tag that span
//! from the request on the way in and from the response on the way out,
//! masking sensitive headers per the [`RedactionPolicy`](crate::RedactionPolicy).
//! [`TraceInterceptor`] wires both into an interceptor chain.

mod hydrate;
mod interceptor;
mod span;
pub mod tags;

pub use hydrate::{hydrate_from_request, hydrate_from_response, query_params, redacted_headers};
pub use interceptor::TraceInterceptor;
pub use span::{SpanGuard, SpanManager, span_name};
