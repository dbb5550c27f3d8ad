//! Request matchers: composable predicates over a [`StubRequest`].
//!
//! A rule holds an ordered list of `Arc<dyn RequestMatcher>`; the rule matches
//! when every matcher accepts the request. Matchers are pure and side-effect
//! free, and each one can describe its expectation for mismatch diagnostics.

use crate::request::StubRequest;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// A boolean predicate over a request, plus a human-readable expectation.
pub trait RequestMatcher: Send + Sync {
    fn matches(&self, request: &StubRequest) -> bool;

    /// Describes what this matcher expects, e.g. `path equal to "/items"`.
    fn describe(&self) -> String;
}

/// Core string matching operation shared by the value-bearing matchers.
#[derive(Debug, Clone)]
pub enum ValueMatch {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Matches(Arc<Regex>),
}

impl ValueMatch {
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(value.into())
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(value.into())
    }

    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::StartsWith(value.into())
    }

    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::EndsWith(value.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches(Arc::new(Regex::new(pattern)?)))
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::Contains(expected) => value.contains(expected.as_str()),
            Self::StartsWith(expected) => value.starts_with(expected.as_str()),
            Self::EndsWith(expected) => value.ends_with(expected.as_str()),
            Self::Matches(regex) => regex.is_match(value),
        }
    }
}

impl fmt::Display for ValueMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => write!(f, "equal to {v:?}"),
            Self::Contains(v) => write!(f, "containing {v:?}"),
            Self::StartsWith(v) => write!(f, "starting with {v:?}"),
            Self::EndsWith(v) => write!(f, "ending with {v:?}"),
            Self::Matches(r) => write!(f, "matching /{}/", r.as_str()),
        }
    }
}

/// Matches the request method, ignoring ASCII case.
pub struct MethodMatcher {
    method: String,
}

impl RequestMatcher for MethodMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        request.method().eq_ignore_ascii_case(&self.method)
    }

    fn describe(&self) -> String {
        format!("method equal to {:?}", self.method)
    }
}

/// Matches the request path.
pub struct PathMatcher {
    expected: ValueMatch,
}

impl RequestMatcher for PathMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        self.expected.accepts(request.uri().path())
    }

    fn describe(&self) -> String {
        format!("path {}", self.expected)
    }
}

/// Matches one header. With no expected value the header only has to exist;
/// otherwise any of its values must satisfy the expectation.
pub struct HeaderMatcher {
    name: String,
    expected: Option<ValueMatch>,
}

impl RequestMatcher for HeaderMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        let values = request.header_values(&self.name);
        match &self.expected {
            None => values.is_some(),
            Some(expected) => values
                .is_some_and(|values| values.iter().any(|v| expected.accepts(v))),
        }
    }

    fn describe(&self) -> String {
        match &self.expected {
            None => format!("header {:?} present", self.name),
            Some(expected) => format!("header {:?} with value {}", self.name, expected),
        }
    }
}

/// Matches one request parameter (query string or form body).
pub struct ParamMatcher {
    name: String,
    expected: Option<ValueMatch>,
}

impl RequestMatcher for ParamMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        let values = request.parameter_values(&self.name);
        match &self.expected {
            None => values.is_some(),
            Some(expected) => values
                .is_some_and(|values| values.iter().any(|v| expected.accepts(v))),
        }
    }

    fn describe(&self) -> String {
        match &self.expected {
            None => format!("parameter {:?} present", self.name),
            Some(expected) => format!("parameter {:?} with value {}", self.name, expected),
        }
    }
}

/// Matches the request body decoded as text with the request encoding.
pub struct BodyMatcher {
    expected: ValueMatch,
}

impl RequestMatcher for BodyMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        self.expected.accepts(&request.body_text())
    }

    fn describe(&self) -> String {
        format!("body {}", self.expected)
    }
}

/// Adapter turning an arbitrary closure into a matcher.
pub struct FnMatcher {
    description: String,
    predicate: Box<dyn Fn(&StubRequest) -> bool + Send + Sync>,
}

impl RequestMatcher for FnMatcher {
    fn matches(&self, request: &StubRequest) -> bool {
        (self.predicate)(request)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

pub fn method(method: impl Into<String>) -> MethodMatcher {
    MethodMatcher {
        method: method.into(),
    }
}

pub fn path(path: impl Into<String>) -> PathMatcher {
    PathMatcher {
        expected: ValueMatch::equals(path),
    }
}

pub fn path_matching(expected: ValueMatch) -> PathMatcher {
    PathMatcher { expected }
}

pub fn header(name: impl Into<String>, expected: ValueMatch) -> HeaderMatcher {
    HeaderMatcher {
        name: name.into(),
        expected: Some(expected),
    }
}

pub fn header_exists(name: impl Into<String>) -> HeaderMatcher {
    HeaderMatcher {
        name: name.into(),
        expected: None,
    }
}

pub fn param(name: impl Into<String>, expected: ValueMatch) -> ParamMatcher {
    ParamMatcher {
        name: name.into(),
        expected: Some(expected),
    }
}

pub fn param_exists(name: impl Into<String>) -> ParamMatcher {
    ParamMatcher {
        name: name.into(),
        expected: None,
    }
}

pub fn body(text: impl Into<String>) -> BodyMatcher {
    BodyMatcher {
        expected: ValueMatch::equals(text),
    }
}

pub fn body_matching(expected: ValueMatch) -> BodyMatcher {
    BodyMatcher { expected }
}

pub fn request_matching(
    description: impl Into<String>,
    predicate: impl Fn(&StubRequest) -> bool + Send + Sync + 'static,
) -> FnMatcher {
    FnMatcher {
        description: description.into(),
        predicate: Box::new(predicate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StubRequest;

    fn request() -> StubRequest {
        StubRequest::builder()
            .method("POST")
            .uri("/api/items?kind=book".parse().unwrap())
            .header("X-Auth", "secret")
            .body("hello world")
            .encoding("UTF-8")
            .build()
            .unwrap()
    }

    #[test]
    fn method_matcher_ignores_case() {
        assert!(method("post").matches(&request()));
        assert!(!method("GET").matches(&request()));
    }

    #[test]
    fn path_matcher_variants() {
        let req = request();
        assert!(path("/api/items").matches(&req));
        assert!(!path("/api").matches(&req));
        assert!(path_matching(ValueMatch::starts_with("/api")).matches(&req));
        assert!(path_matching(ValueMatch::regex(r"^/api/\w+$").unwrap()).matches(&req));
    }

    #[test]
    fn header_matcher_is_case_insensitive_on_name() {
        let req = request();
        assert!(header("x-auth", ValueMatch::equals("secret")).matches(&req));
        assert!(header_exists("X-AUTH").matches(&req));
        assert!(!header_exists("x-missing").matches(&req));
        assert!(!header("x-auth", ValueMatch::equals("other")).matches(&req));
    }

    #[test]
    fn param_matcher_reads_query_parameters() {
        let req = request();
        assert!(param("kind", ValueMatch::equals("book")).matches(&req));
        assert!(param_exists("kind").matches(&req));
        assert!(!param("kind", ValueMatch::equals("toy")).matches(&req));
    }

    #[test]
    fn body_matcher_decodes_text() {
        let req = request();
        assert!(body("hello world").matches(&req));
        assert!(body_matching(ValueMatch::contains("world")).matches(&req));
    }

    #[test]
    fn fn_matcher_wraps_closures() {
        let m = request_matching("body longer than 5 bytes", |r| r.body().len() > 5);
        assert!(m.matches(&request()));
        assert_eq!(m.describe(), "body longer than 5 bytes");
    }

    #[test]
    fn describe_is_human_readable() {
        assert_eq!(
            header("x-auth", ValueMatch::contains("sec")).describe(),
            "header \"x-auth\" with value containing \"sec\""
        );
        assert_eq!(path("/a").describe(), "path equal to \"/a\"");
    }
}
