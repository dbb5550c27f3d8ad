//! Frozen stub rules: matcher set, response sequence and the serving cursor.

use crate::matchers::RequestMatcher;
use crate::request::StubRequest;
use crate::response::StubResponse;
use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An immutable stub rule produced by freezing a stubbing.
///
/// The only mutable piece is the response cursor: `next_response` advances it
/// atomically, so the rule can be shared across serving threads without a
/// lock.
pub struct StubRule {
    matchers: Vec<Arc<dyn RequestMatcher>>,
    responses: Vec<StubResponse>,
    cursor: AtomicUsize,
}

impl StubRule {
    /// The response sequence must be non-empty; the stubbing freeze
    /// guarantees it.
    pub(crate) fn new(
        matchers: Vec<Arc<dyn RequestMatcher>>,
        responses: Vec<StubResponse>,
    ) -> Self {
        debug_assert!(!responses.is_empty());
        Self {
            matchers,
            responses,
            cursor: AtomicUsize::new(0),
        }
    }

    /// True iff every matcher accepts the request. An empty matcher list
    /// matches everything.
    pub fn matched_by(&self, request: &StubRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }

    /// Returns the response at the cursor, advancing it unless the sequence
    /// is exhausted; after that the last response is returned indefinitely.
    ///
    /// The test-and-increment is a single atomic update: two concurrent
    /// callers can neither receive the same mid-sequence response nor push
    /// the cursor past the final index.
    pub fn next_response(&self) -> &StubResponse {
        let last = self.responses.len() - 1;
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                if cursor < last {
                    Some(cursor + 1)
                } else {
                    None
                }
            })
            .unwrap_or_else(|cursor| cursor);
        &self.responses[index]
    }

    /// Renders one line per matcher saying whether the request satisfies it.
    /// Independent of [`matched_by`](Self::matched_by) and safe on any
    /// request.
    pub fn describe_mismatch(&self, request: &StubRequest) -> String {
        if self.matchers.is_empty() {
            return "  (no matchers, matches any request)\n".to_string();
        }
        let mut out = String::new();
        for matcher in &self.matchers {
            let verdict = if matcher.matches(request) {
                "satisfied"
            } else {
                "NOT satisfied"
            };
            let _ = writeln!(out, "  {} => {}", matcher.describe(), verdict);
        }
        out
    }
}

impl fmt::Display for StubRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matchers.is_empty() {
            write!(f, "any request")?;
        } else {
            for (i, matcher) in self.matchers.iter().enumerate() {
                if i > 0 {
                    write!(f, " AND ")?;
                }
                write!(f, "{}", matcher.describe())?;
            }
        }
        write!(f, " -> {} response(s)", self.responses.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{self, ValueMatch};
    use crate::request::StubRequest;
    use crate::response::StubResponse;
    use std::sync::Mutex;

    fn rule_with_statuses(statuses: &[u16]) -> StubRule {
        StubRule::new(
            Vec::new(),
            statuses.iter().map(|&s| StubResponse::new(s)).collect(),
        )
    }

    fn any_request() -> StubRequest {
        StubRequest::builder().build().unwrap()
    }

    #[test]
    fn empty_matcher_list_matches_everything() {
        let rule = rule_with_statuses(&[200]);
        assert!(rule.matched_by(&any_request()));
    }

    #[test]
    fn all_matchers_must_accept() {
        let request = StubRequest::builder()
            .method("GET")
            .uri("/a".parse().unwrap())
            .build()
            .unwrap();
        let matching = StubRule::new(
            vec![
                Arc::new(matchers::method("GET")),
                Arc::new(matchers::path("/a")),
            ],
            vec![StubResponse::new(200)],
        );
        let mismatching = StubRule::new(
            vec![
                Arc::new(matchers::method("GET")),
                Arc::new(matchers::path("/b")),
            ],
            vec![StubResponse::new(200)],
        );
        assert!(matching.matched_by(&request));
        assert!(!mismatching.matched_by(&request));
    }

    #[test]
    fn responses_are_served_in_order_then_stick_on_last() {
        let rule = rule_with_statuses(&[200, 201, 202]);
        assert_eq!(rule.next_response().status(), 200);
        assert_eq!(rule.next_response().status(), 201);
        assert_eq!(rule.next_response().status(), 202);
        assert_eq!(rule.next_response().status(), 202);
        assert_eq!(rule.next_response().status(), 202);
    }

    #[test]
    fn concurrent_next_response_never_duplicates_mid_sequence() {
        let n = 8;
        let statuses: Vec<u16> = (0..n).map(|i| 200 + i as u16).collect();
        let rule = rule_with_statuses(&statuses);
        let seen = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..n {
                scope.spawn(|| {
                    let status = rule.next_response().status();
                    seen.lock().unwrap().push(status);
                });
            }
        });

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, statuses);
    }

    #[test]
    fn describe_mismatch_reports_each_matcher() {
        let rule = StubRule::new(
            vec![
                Arc::new(matchers::method("GET")),
                Arc::new(matchers::header("x-auth", ValueMatch::equals("secret"))),
            ],
            vec![StubResponse::new(200)],
        );
        let report = rule.describe_mismatch(&any_request());
        assert!(report.contains("method equal to \"GET\" => satisfied"));
        assert!(report.contains("header \"x-auth\" with value equal to \"secret\" => NOT satisfied"));
    }
}
