//! Immutable HTTP request value object.
//!
//! A [`StubRequest`] insulates the engine from whatever transport decoded the
//! bytes: the body is copied into an owned buffer at construction, headers are
//! re-keyed lower-case, and query/body parameters are derived once. After
//! `build()` the value never changes.

use crate::error::StubError;
use crate::fields::FieldMap;
use crate::response::encoding_for_label;
use bytes::Bytes;
use hyper::Uri;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use tracing::warn;

/// HTTP default when the transport reports no charset.
const DEFAULT_ENCODING: &str = "ISO-8859-1";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A decoded, immutable HTTP request.
#[derive(Debug, Clone)]
pub struct StubRequest {
    method: String,
    uri: Uri,
    headers: FieldMap,
    body: Bytes,
    parameters: FieldMap,
    encoding: String,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl StubRequest {
    pub fn builder() -> StubRequestBuilder {
        StubRequestBuilder::new()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    /// All headers, keyed lower-case.
    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    /// Values of one header, looked up case-insensitively.
    pub fn header_values(&self, name: &str) -> Option<&[String]> {
        self.headers.get_ignore_case(name)
    }

    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers.first_ignore_case(name)
    }

    /// A fresh view of the body bytes. The owned buffer is never handed out
    /// mutably, so repeated reads always see the same content.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    /// A fresh reader over the body bytes.
    pub fn body_reader(&self) -> impl Read {
        Cursor::new(self.body.clone())
    }

    /// The body decoded as text using the request encoding. Undecodable byte
    /// sequences become replacement characters; an unknown encoding label
    /// falls back to UTF-8 with a diagnostic.
    pub fn body_text(&self) -> String {
        let encoding = encoding_for_label(&self.encoding).unwrap_or_else(|| {
            warn!(label = %self.encoding, "unknown request encoding label, decoding body as UTF-8");
            encoding_rs::UTF_8
        });
        encoding.decode_without_bom_handling(&self.body).0.into_owned()
    }

    /// Query parameters merged with form body parameters (POST/PUT with a
    /// form-urlencoded content type only).
    pub fn parameters(&self) -> &FieldMap {
        &self.parameters
    }

    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name)
    }

    pub fn first_parameter(&self, name: &str) -> Option<&str> {
        self.parameters.first(name)
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

enum BodySource {
    Bytes(Bytes),
    Reader(Box<dyn Read>),
}

/// Builder for [`StubRequest`]. Used by transports and directly by tests.
pub struct StubRequestBuilder {
    method: String,
    uri: Uri,
    headers: FieldMap,
    body: BodySource,
    encoding: Option<String>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl StubRequestBuilder {
    fn new() -> Self {
        Self {
            method: "GET".to_string(),
            uri: Uri::from_static("/"),
            headers: FieldMap::new(),
            body: BodySource::Bytes(Bytes::new()),
            encoding: None,
            local_addr: None,
            remote_addr: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: FieldMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodySource::Bytes(body.into());
        self
    }

    /// Supplies the body as a stream; it is drained fully by `build()`.
    pub fn body_reader(mut self, reader: impl Read + 'static) -> Self {
        self.body = BodySource::Reader(Box::new(reader));
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Copies the body into an owned buffer, lower-cases header keys and
    /// derives the parameter map. Fails only when a body stream cannot be
    /// drained.
    pub fn build(self) -> Result<StubRequest, StubError> {
        let body = match self.body {
            BodySource::Bytes(bytes) => bytes,
            BodySource::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Bytes::from(buf)
            }
        };

        let headers = self.headers.lowercased();
        let encoding = self.encoding.unwrap_or_else(|| DEFAULT_ENCODING.to_string());

        let mut parameters = parse_params(
            self.uri.query().unwrap_or("").as_bytes(),
            &encoding,
        );
        if has_form_body(&self.method, &headers) {
            parameters.extend(&parse_params(&body, &encoding));
        }

        Ok(StubRequest {
            method: self.method,
            uri: self.uri,
            headers,
            body,
            parameters,
            encoding,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
        })
    }
}

fn has_form_body(method: &str, headers: &FieldMap) -> bool {
    let form_method =
        method.eq_ignore_ascii_case("POST") || method.eq_ignore_ascii_case("PUT");
    form_method
        && headers
            .first("content-type")
            .is_some_and(|ct| ct.contains(FORM_CONTENT_TYPE))
}

/// Parses `name=value&name2=value2` pairs. A pair whose name or value cannot
/// be percent-decoded is dropped with a diagnostic instead of failing the
/// whole request; tests rely on the surviving pairs. A name without `=` maps
/// to an empty value.
fn parse_params(raw: &[u8], encoding_label: &str) -> FieldMap {
    let mut params = FieldMap::new();
    if raw.is_empty() {
        return params;
    }

    let Some(encoding) = encoding_for_label(encoding_label) else {
        warn!(label = %encoding_label, "unknown request encoding label, skipping parameter parsing");
        return params;
    };

    for pair in raw.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.iter().position(|&b| b == b'=') {
            Some(idx) => (&pair[..idx], &pair[idx + 1..]),
            None => (pair, &pair[pair.len()..]),
        };
        match (
            decode_component(name, encoding),
            decode_component(value, encoding),
        ) {
            (Some(name), Some(value)) => params.append(name, value),
            _ => {
                warn!(
                    pair = %String::from_utf8_lossy(pair),
                    "dropping parameter pair with malformed percent-encoding"
                );
            }
        }
    }
    params
}

/// Decodes one form-urlencoded component: `+` means space, `%XX` is a byte,
/// and the resulting bytes are interpreted with the request encoding.
/// Returns `None` when a `%` is not followed by two hex digits.
fn decode_component(raw: &[u8], encoding: &'static encoding_rs::Encoding) -> Option<String> {
    if !percent_well_formed(raw) {
        return None;
    }
    let unplus: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    let bytes = urlencoding::decode_binary(&unplus);
    Some(encoding.decode_without_bom_handling(&bytes).0.into_owned())
}

fn percent_well_formed(raw: &[u8]) -> bool {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            if i + 2 >= raw.len() {
                return false;
            }
            if !(raw[i + 1].is_ascii_hexdigit() && raw[i + 2].is_ascii_hexdigit()) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}
