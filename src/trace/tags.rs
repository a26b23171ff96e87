//! Span tag keys and sentinel values written by the hydrators.

pub const HTTP_REQUEST: &str = "http.request";
pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const HTTP_REQUEST_URL_PATH: &str = "http.request.url.path";
pub const HTTP_REQUEST_URL_HOST: &str = "http.request.url.host";
pub const HTTP_REQUEST_URL_QUERY: &str = "http.request.url.query";
pub const HTTP_REQUEST_BODY: &str = "http.request.body";
pub const HTTP_REQUEST_HEADERS: &str = "http.request.headers";

pub const HTTP_RESPONSE: &str = "http.response";
pub const HTTP_RESPONSE_BODY: &str = "http.response.body";
pub const HTTP_RESPONSE_HEADERS: &str = "http.response.headers";
pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";

/// Value written in place of data that could not be captured.
pub const ERROR: &str = "error";

/// Value written when there was no request or response to read.
pub const NIL: &str = "nil";
