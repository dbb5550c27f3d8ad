//! Stub response definitions and process-wide response defaults.

use crate::fields::FieldMap;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use tracing::warn;

pub(crate) const NO_STUB_BODY: &str = "No stub response found for the incoming request";

/// Resolves an encoding label ("UTF-8", "ISO-8859-1", ...) to an encoding.
pub(crate) fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    /// Text body, encoded with the response encoding at serialization time.
    Text(String),
    /// Raw bytes, written verbatim.
    Raw(Bytes),
}

/// One response definition within a stub rule.
///
/// A definition carries the status, headers, body and encoding to send back.
/// Definitions start out seeded from the engine defaults and are overridden
/// per field through the [`Stubbing`](crate::Stubbing) builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubResponse {
    status: u16,
    headers: FieldMap,
    body: Body,
    encoding: String,
}

impl StubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: FieldMap::new(),
            body: Body::Raw(Bytes::new()),
            encoding: "UTF-8".to_string(),
        }
    }

    pub(crate) fn from_defaults(defaults: &ResponseDefaults) -> Self {
        Self {
            status: defaults.status,
            headers: defaults.headers.clone(),
            body: Body::Raw(Bytes::new()),
            encoding: defaults.encoding.clone(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    /// Adds a header value, keeping existing values of the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Replaces the header case-insensitively.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set_ignore_case(name, value);
    }

    pub fn set_body(&mut self, text: impl Into<String>) {
        self.body = Body::Text(text.into());
    }

    pub fn set_raw_body(&mut self, bytes: impl Into<Bytes>) {
        self.body = Body::Raw(bytes.into());
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn set_encoding(&mut self, label: impl Into<String>) {
        self.encoding = label.into();
    }

    /// Serializes the body: text is encoded with the response encoding, raw
    /// bytes pass through verbatim. An unknown encoding label falls back to
    /// UTF-8 with a diagnostic.
    pub fn body_bytes(&self) -> Bytes {
        match &self.body {
            Body::Raw(bytes) => bytes.clone(),
            Body::Text(text) => {
                let encoding = encoding_for_label(&self.encoding).unwrap_or_else(|| {
                    warn!(label = %self.encoding, "unknown response encoding label, encoding body as UTF-8");
                    UTF_8
                });
                let (encoded, _, _) = encoding.encode(text);
                Bytes::from(encoded.into_owned())
            }
        }
    }
}

/// Process-wide response attributes, snapshotted by value into each stubbing
/// at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDefaults {
    pub status: u16,
    pub headers: FieldMap,
    pub encoding: String,
}

impl Default for ResponseDefaults {
    fn default() -> Self {
        Self {
            status: 200,
            headers: FieldMap::new(),
            encoding: "UTF-8".to_string(),
        }
    }
}

/// The fixed fallback returned when no rule matches an incoming request.
pub(crate) fn no_stub_response() -> StubResponse {
    let mut response = StubResponse::new(404);
    response.set_body(NO_STUB_BODY);
    response.set_encoding("UTF-8");
    response.set_header("Content-Type", "text/plain; charset=utf-8");
    response
}
