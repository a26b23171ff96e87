//! Instrumentation settings and the header redaction policy.
//!
//! Settings are layered: built-in defaults, then an optional file (any format
//! the `config` crate understands, picked by extension), then environment
//! variables prefixed with `PORTCULLIS__`.
//!
//! ```text
//! PORTCULLIS__HEADER_MASK_VALUE=***
//! PORTCULLIS__MASK_HEADER_KEYS=authorization,x-api-key
//! ```

use std::path::Path;

use config::{Config, Environment, File};
use http::HeaderName;
use serde::Deserialize;
use tracing::warn;

use crate::error::Error;

const DEFAULT_MASK: &str = "omitted";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Replacement written in place of masked header values.
    pub header_mask_value: String,
    /// Header names whose values never reach a span.
    pub mask_header_keys: Vec<String>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            header_mask_value: DEFAULT_MASK.to_owned(),
            mask_header_keys: Vec::new(),
        }
    }
}

impl InstrumentationConfig {
    /// Loads settings from `path` (when given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("PORTCULLIS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mask_header_keys")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn redaction_policy(&self) -> RedactionPolicy {
        RedactionPolicy::new(&self.header_mask_value, &self.mask_header_keys)
    }
}

/// Which header values to hide from spans, and what to show instead.
///
/// Read-only once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    mask: String,
    keys: Vec<HeaderName>,
}

impl RedactionPolicy {
    /// Builds a policy. Keys that are not valid header names can never match
    /// a header and are dropped with a warning.
    pub fn new<I, S>(mask: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .filter_map(|key| {
                let key = key.as_ref();
                HeaderName::from_bytes(key.as_bytes())
                    .inspect_err(|_| warn!(key, "ignoring invalid header name in mask list"))
                    .ok()
            })
            .collect();
        Self { mask: mask.into(), keys }
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }

    pub fn keys(&self) -> &[HeaderName] {
        &self.keys
    }

    pub fn is_masked(&self, name: &HeaderName) -> bool {
        self.keys.contains(name)
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        InstrumentationConfig::default().redaction_policy()
    }
}
