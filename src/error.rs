//! Unified error type.

/// The error type returned by portcullis' fallible setup operations.
///
/// Request-time problems never surface here: tracing failures degrade to
/// sentinel tags, and application errors are expressed as HTTP
/// [`Response`](crate::Response) values. This type covers startup: binding a
/// listener, accepting connections, loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
}
