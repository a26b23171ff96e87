//! Boxed HTTP bodies and non-destructive body capture.
//!
//! A body is a one-shot stream: once read, it is gone. Tracing wants to look
//! at the bytes, the handler behind it wants them too. [`duplicate`] drains
//! the stream once and puts a replay back in its place, so the next reader
//! sees an unconsumed body with exactly the original frames.
//!
//! ```text
//! original stream ──read once──► bytes ─┬─► returned for tagging
//!                                        └─► replay reinstated on the message
//! ```

use bytes::{Bytes, BytesMut};
use futures_util::stream;
use http::HeaderMap;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};

/// Error type carried inside a [`Body`] stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body type carried by every request and response in this crate.
///
/// `UnsyncBoxBody` rather than `BoxBody`: hyper's `Incoming` is `Send` but the
/// handler chain never shares a body across threads, so `Sync` is not needed.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// An empty body.
pub fn empty() -> Body {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

/// A body holding `bytes` in a single data frame.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn from_incoming(incoming: hyper::body::Incoming) -> Body {
    incoming.map_err(BoxError::from).boxed_unsync()
}

/// Returned by [`duplicate`] when the underlying stream fails mid-read.
#[derive(Debug, thiserror::Error)]
#[error("body read failed after {read} bytes: {message}")]
pub struct BodyReadError {
    /// Bytes successfully read before the failure.
    pub read: usize,
    pub message: String,
}

/// Reads `body` to the end and reinstates an unconsumed copy in its place.
///
/// On success the full data is returned and `body` replays the same data
/// frames (and trailers, if any).
///
/// On failure `body` replays whatever was read before the failure and then
/// yields the original error, so downstream readers fail the same way they
/// would have without the capture.
pub async fn duplicate(body: &mut Body) -> Result<Bytes, BodyReadError> {
    let mut original = std::mem::replace(body, empty());
    let mut data = BytesMut::new();
    let mut trailers: Option<HeaderMap> = None;

    while let Some(frame) = original.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                let read = data.len();
                let message = err.to_string();
                *body = replay(data.freeze(), trailers, Some(err));
                return Err(BodyReadError { read, message });
            }
        };
        match frame.into_data() {
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(frame) => {
                if let Ok(map) = frame.into_trailers() {
                    trailers.get_or_insert_with(HeaderMap::new).extend(map);
                }
            }
        }
    }

    let bytes = data.freeze();
    *body = replay(bytes.clone(), trailers, None);
    Ok(bytes)
}

fn replay(data: Bytes, trailers: Option<HeaderMap>, error: Option<BoxError>) -> Body {
    if trailers.is_none() && error.is_none() {
        // Keeps the exact size hint, which `StreamBody` cannot report.
        return full(data);
    }

    let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(3);
    if !data.is_empty() {
        frames.push(Ok(Frame::data(data)));
    }
    if let Some(map) = trailers {
        frames.push(Ok(Frame::trailers(map)));
    }
    if let Some(err) = error {
        frames.push(Err(err));
    }
    StreamBody::new(stream::iter(frames)).boxed_unsync()
}
