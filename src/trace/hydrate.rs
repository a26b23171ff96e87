//! Tagging spans from HTTP requests and responses.
//!
//! Hydration is best-effort. Anything that cannot be captured (an unreadable
//! body, headers that fail to serialize) is tagged with [`tags::ERROR`] and
//! the request carries on untouched. Bodies are captured with
//! [`duplicate_body`](crate::duplicate_body), so whoever reads the message next still sees the
//! whole stream.

use std::borrow::Cow;
use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::HOST;
use http::HeaderMap;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::body::{self, Body, BodyReadError};
use crate::config::RedactionPolicy;
use crate::trace::tags;

/// Tags the span in `cx` from an inbound request.
///
/// Writes method, escaped path, host, body text, redacted headers and query
/// parameters. With no request, only [`tags::HTTP_REQUEST`] is written.
pub async fn hydrate_from_request(
    req: Option<&mut http::Request<Body>>,
    cx: &Context,
    policy: &RedactionPolicy,
) {
    let Some(req) = req else {
        cx.span().set_attribute(KeyValue::new(tags::HTTP_REQUEST, tags::NIL));
        return;
    };

    let captured = body::duplicate(req.body_mut()).await;

    let span = cx.span();
    span.set_attribute(KeyValue::new(tags::HTTP_REQUEST_METHOD, req.method().to_string()));
    span.set_attribute(KeyValue::new(tags::HTTP_REQUEST_URL_PATH, req.uri().path().to_owned()));
    span.set_attribute(KeyValue::new(tags::HTTP_REQUEST_URL_HOST, request_host(req)));
    span.set_attribute(body_tag(tags::HTTP_REQUEST_BODY, captured));
    span.set_attribute(marshaled(
        tags::HTTP_REQUEST_HEADERS,
        redacted_headers(req.headers(), policy),
    ));
    span.set_attribute(marshaled(
        tags::HTTP_REQUEST_URL_QUERY,
        query_params(req.uri().query()),
    ));
}

/// Tags the span in `cx` from an outbound response.
///
/// Writes body text, redacted headers and the status code. With no response,
/// only [`tags::HTTP_RESPONSE`] is written.
pub async fn hydrate_from_response(
    res: Option<&mut http::Response<Body>>,
    cx: &Context,
    policy: &RedactionPolicy,
) {
    let Some(res) = res else {
        cx.span().set_attribute(KeyValue::new(tags::HTTP_RESPONSE, tags::NIL));
        return;
    };

    let captured = body::duplicate(res.body_mut()).await;

    let span = cx.span();
    span.set_attribute(body_tag(tags::HTTP_RESPONSE_BODY, captured));
    span.set_attribute(marshaled(
        tags::HTTP_RESPONSE_HEADERS,
        redacted_headers(res.headers(), policy),
    ));
    span.set_attribute(KeyValue::new(
        tags::HTTP_RESPONSE_STATUS_CODE,
        i64::from(res.status().as_u16()),
    ));
}

/// Serializes `headers` as a JSON object of name to values, masking every
/// header the policy names.
///
/// A masked header collapses to a single value, the policy's mask.
pub fn redacted_headers(headers: &HeaderMap, policy: &RedactionPolicy) -> serde_json::Result<String> {
    let mut out: BTreeMap<&str, Vec<Cow<'_, str>>> = BTreeMap::new();
    for name in headers.keys() {
        let values = if policy.is_masked(name) {
            vec![Cow::Borrowed(policy.mask())]
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .collect()
        };
        out.insert(name.as_str(), values);
    }
    serde_json::to_string(&out)
}

/// Serializes a raw query string as a JSON object of key to values.
pub fn query_params(query: Option<&str>) -> serde_json::Result<String> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        out.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    serde_json::to_string(&out)
}

fn request_host<B>(req: &http::Request<B>) -> String {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default()
        .to_owned()
}

fn body_tag(key: &'static str, captured: Result<Bytes, BodyReadError>) -> KeyValue {
    match captured {
        Ok(bytes) => KeyValue::new(key, String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            warn!(tag = key, error = %err, "could not capture body for span");
            KeyValue::new(key, tags::ERROR)
        }
    }
}

fn marshaled(key: &'static str, json: serde_json::Result<String>) -> KeyValue {
    match json {
        Ok(json) => KeyValue::new(key, json),
        Err(err) => {
            debug!(tag = key, error = %err, "could not serialize span tag");
            KeyValue::new(key, tags::ERROR)
        }
    }
}
