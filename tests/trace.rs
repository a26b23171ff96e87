use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use opentelemetry::trace::{SpanId, TraceContextExt, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracer, SdkTracerProvider, SpanData};
use portcullis::chain::from_fn;
use portcullis::handler::ErasedHandler;
use portcullis::trace::{
    SpanGuard, SpanManager, TraceInterceptor, hydrate_from_request, hydrate_from_response, tags,
};
use portcullis::{Body, BoxError, Chain, Handler, RedactionPolicy, Request, Response, empty_body, full_body};

const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
const PARENT_ID: &str = "b7ad6b7169203331";

struct Harness {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
}

impl Harness {
    fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { exporter, provider }
    }

    fn spans(&self) -> SpanManager<SdkTracer> {
        SpanManager::new(self.provider.tracer("portcullis-test"))
    }

    fn finished(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap()
    }

    fn only_span(&self) -> SpanData {
        let mut spans = self.finished();
        assert_eq!(spans.len(), 1, "expected exactly one finished span");
        spans.remove(0)
    }
}

fn attr(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

fn policy() -> RedactionPolicy {
    RedactionPolicy::new("***", ["Authorization"])
}

fn get(uri: &str) -> http::Request<Body> {
    http::Request::builder().uri(uri).body(empty_body()).unwrap()
}

async fn explode(_req: Request) -> Response {
    panic!("handler blew up")
}

fn finish(cx: Context) {
    drop(SpanGuard::new(cx));
}

#[test]
fn request_without_propagation_headers_starts_a_root_span() {
    let h = Harness::new();
    finish(h.spans().start_span(&get("/keys/a%20b")));

    let span = h.only_span();
    assert_eq!(span.name, "GET /keys/a%20b");
    assert_eq!(span.parent_span_id, SpanId::INVALID);
}

#[test]
fn request_with_traceparent_continues_the_upstream_trace() {
    let h = Harness::new();
    let req = http::Request::builder()
        .method("POST")
        .uri("/bindings")
        .header("traceparent", format!("00-{TRACE_ID}-{PARENT_ID}-01"))
        .body(empty_body())
        .unwrap();
    finish(h.spans().start_span(&req));

    let span = h.only_span();
    assert_eq!(span.name, "POST /bindings");
    assert_eq!(span.span_context.trace_id().to_string(), TRACE_ID);
    assert_eq!(span.parent_span_id.to_string(), PARENT_ID);
}

#[test]
fn malformed_traceparent_downgrades_to_root() {
    let h = Harness::new();
    let req = http::Request::builder()
        .uri("/")
        .header("traceparent", "not-a-trace")
        .body(empty_body())
        .unwrap();
    finish(h.spans().start_span(&req));

    assert_eq!(h.only_span().parent_span_id, SpanId::INVALID);
}

#[test]
fn default_manager_is_a_no_op() {
    let cx = SpanManager::default().start_span(&get("/"));
    assert!(!cx.span().span_context().is_valid());
    finish(cx);
}

#[test]
fn injected_headers_carry_the_span() {
    let h = Harness::new();
    let spans = h.spans();
    let cx = spans.start_span(&get("/"));

    let mut headers = HeaderMap::new();
    spans.inject(&cx, &mut headers);

    let traceparent = headers["traceparent"].to_str().unwrap();
    let trace_id = cx.span().span_context().trace_id().to_string();
    assert!(traceparent.contains(&trace_id));
    finish(cx);
}

#[tokio::test]
async fn request_hydration_tags_and_restores_the_body() {
    let h = Harness::new();
    let mut req = http::Request::builder()
        .method("PUT")
        .uri("/apikeys/ci?team=core&team=infra")
        .header("host", "gateway.local")
        .header("authorization", "secret")
        .header("accept", "application/json")
        .body(full_body(r#"{"name":"ci"}"#))
        .unwrap();

    let cx = h.spans().start_span(&req);
    hydrate_from_request(Some(&mut req), &cx, &policy()).await;
    finish(cx);

    let body = req.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, r#"{"name":"ci"}"#);

    let span = h.only_span();
    assert_eq!(attr(&span, tags::HTTP_REQUEST_METHOD).unwrap(), "PUT");
    assert_eq!(attr(&span, tags::HTTP_REQUEST_URL_PATH).unwrap(), "/apikeys/ci");
    assert_eq!(attr(&span, tags::HTTP_REQUEST_URL_HOST).unwrap(), "gateway.local");
    assert_eq!(attr(&span, tags::HTTP_REQUEST_BODY).unwrap(), r#"{"name":"ci"}"#);
    assert_eq!(
        attr(&span, tags::HTTP_REQUEST_URL_QUERY).unwrap(),
        r#"{"team":["core","infra"]}"#
    );

    let headers = attr(&span, tags::HTTP_REQUEST_HEADERS).unwrap();
    assert!(headers.contains("***"));
    assert!(!headers.contains("secret"));
    assert!(headers.contains(r#""accept":["application/json"]"#));
}

#[tokio::test]
async fn absent_request_and_response_are_tagged_nil() {
    let h = Harness::new();
    let cx = h.spans().start_span(&get("/"));
    hydrate_from_request(None, &cx, &policy()).await;
    hydrate_from_response(None, &cx, &policy()).await;
    finish(cx);

    let span = h.only_span();
    assert_eq!(attr(&span, tags::HTTP_REQUEST).unwrap(), tags::NIL);
    assert_eq!(attr(&span, tags::HTTP_RESPONSE).unwrap(), tags::NIL);
    assert!(attr(&span, tags::HTTP_REQUEST_METHOD).is_none());
}

#[tokio::test]
async fn unreadable_body_is_tagged_error_and_replayed() {
    let h = Harness::new();
    let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
        Ok(Frame::data(Bytes::from_static(b"partial"))),
        Err("upstream hung up".into()),
    ];
    let mut req = http::Request::builder()
        .uri("/")
        .body(StreamBody::new(stream::iter(frames)).boxed_unsync())
        .unwrap();

    let cx = h.spans().start_span(&req);
    hydrate_from_request(Some(&mut req), &cx, &policy()).await;
    finish(cx);

    assert_eq!(attr(&h.only_span(), tags::HTTP_REQUEST_BODY).unwrap(), tags::ERROR);

    let body = req.body_mut();
    let first = body.frame().await.unwrap().unwrap();
    assert_eq!(first.into_data().unwrap(), "partial");
    assert!(body.frame().await.unwrap().is_err());
}

#[tokio::test]
async fn response_hydration_tags_status_body_and_headers() {
    let h = Harness::new();
    let mut res = Response::builder()
        .status(StatusCode::CREATED)
        .header("authorization", "secret")
        .header("location", "/apikeys/ci")
        .json(br#"{"id":"ci"}"#.to_vec())
        .into_inner();

    let cx = h.spans().start_span(&get("/"));
    hydrate_from_response(Some(&mut res), &cx, &policy()).await;
    finish(cx);

    let span = h.only_span();
    assert_eq!(attr(&span, tags::HTTP_RESPONSE_STATUS_CODE).unwrap(), "201");
    assert_eq!(attr(&span, tags::HTTP_RESPONSE_BODY).unwrap(), r#"{"id":"ci"}"#);
    let headers = attr(&span, tags::HTTP_RESPONSE_HEADERS).unwrap();
    assert!(headers.contains(r#""authorization":["***"]"#));
    assert!(headers.contains(r#""location":["/apikeys/ci"]"#));
    assert!(attr(&span, tags::HTTP_REQUEST_URL_QUERY).is_none());

    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, r#"{"id":"ci"}"#);
}

#[tokio::test]
async fn trace_interceptor_exposes_span_and_finishes_it_once() {
    let h = Harness::new();
    let tracing = TraceInterceptor::new(h.spans(), policy());

    let terminal = |mut req: Request| async move {
        let cx = req.context().span().cloned().expect("span in context");
        assert!(cx.span().span_context().is_valid());
        let body = req.body_mut().collect().await.unwrap().to_bytes();
        Response::text(String::from_utf8(body.to_vec()).unwrap())
    };

    let mut chain = Chain::new();
    chain.add([tracing.into_interceptor()]);
    let handler = chain.link(terminal.into_boxed_handler());

    let req = http::Request::builder()
        .method("POST")
        .uri("/echo")
        .body(full_body("ping"))
        .unwrap();
    let res = handler.call(Request::new(req)).await;

    let body = res.into_inner().into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "ping");

    let span = h.only_span();
    assert_eq!(span.name, "POST /echo");
    assert_eq!(attr(&span, tags::HTTP_REQUEST_BODY).unwrap(), "ping");
    assert_eq!(attr(&span, tags::HTTP_RESPONSE_BODY).unwrap(), "ping");
    assert_eq!(attr(&span, tags::HTTP_RESPONSE_STATUS_CODE).unwrap(), "200");
}

#[tokio::test]
async fn span_is_finished_when_inner_interceptor_short_circuits() {
    let h = Harness::new();
    let tracing = TraceInterceptor::new(h.spans(), policy());
    let deny = from_fn(|_req: Request, _next| async { Response::status(StatusCode::UNAUTHORIZED) });

    let mut chain = Chain::new();
    chain.add([tracing.into_interceptor(), deny]);
    let handler = chain.link((|_req: Request| async { "unreachable" }).into_boxed_handler());

    let res = handler.call(Request::new(get("/"))).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        attr(&h.only_span(), tags::HTTP_RESPONSE_STATUS_CODE).unwrap(),
        "401"
    );
}

#[tokio::test]
async fn span_is_finished_when_the_handler_panics() {
    let h = Harness::new();
    let tracing = TraceInterceptor::new(h.spans(), policy());

    let mut chain = Chain::new();
    chain.add([tracing.into_interceptor()]);
    let handler = chain.link(explode.into_boxed_handler());

    let joined = tokio::spawn({
        let handler = Arc::clone(&handler);
        async move { handler.call(Request::new(get("/boom"))).await }
    })
    .await;
    assert!(joined.unwrap_err().is_panic());

    let span = h.only_span();
    assert_eq!(span.name, "GET /boom");
    assert!(attr(&span, tags::HTTP_RESPONSE_STATUS_CODE).is_none());
}

#[tokio::test]
async fn non_recording_span_leaves_bodies_streaming() {
    let tracing = TraceInterceptor::new(SpanManager::default(), policy());

    // The response body only ends once `tx` is dropped.
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(1);
    let rx = std::sync::Mutex::new(Some(rx));
    let terminal = move |mut req: Request| {
        let rx = rx.lock().unwrap().take().expect("called once");
        async move {
            let body = req.body_mut().collect().await.unwrap().to_bytes();
            assert_eq!(body, "ping");
            let frames = stream::unfold(rx, |mut rx| async move {
                let chunk = rx.recv().await?;
                Some((Ok::<_, BoxError>(Frame::data(chunk)), rx))
            });
            Response::builder().body(StreamBody::new(frames).boxed_unsync())
        }
    };

    let mut chain = Chain::new();
    chain.add([tracing.into_interceptor()]);
    let handler = chain.link(terminal.into_boxed_handler());

    let req = http::Request::builder()
        .method("POST")
        .uri("/stream")
        .body(full_body("ping"))
        .unwrap();
    let res = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        handler.call(Request::new(req)),
    )
    .await
    .expect("response returned before its body finished");

    tx.send(Bytes::from_static(b"chunk")).await.unwrap();
    drop(tx);
    let body = res.into_inner().into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "chunk");
}
