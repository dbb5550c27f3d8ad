//! The mutable, single-use builder for one stub rule.

use crate::matchers::RequestMatcher;
use crate::response::{ResponseDefaults, StubResponse};
use crate::rule::StubRule;
use parking_lot::Mutex;
use std::sync::Arc;

const CONSUMED: &str =
    "this stubbing has already been frozen into a rule; stubbings are single-use \
     and cannot be modified once the first request has been served";

struct StubbingState {
    matchers: Vec<Arc<dyn RequestMatcher>>,
    responses: Vec<StubResponse>,
    defaults: ResponseDefaults,
}

/// Builder handle describing one stub rule before the engine freezes.
///
/// Created by [`Mocker::on_request`](crate::Mocker::on_request). Matchers are
/// added with [`when`](Self::when); response definitions are opened with
/// [`respond`](Self::respond) and refined with the `with_*` methods. Every
/// definition starts from the snapshot of the engine defaults taken when the
/// stubbing was created.
///
/// # Panics
///
/// A stubbing is consumed exactly once when the engine freezes. Calling any
/// method afterwards is a programming error and panics.
#[derive(Clone)]
pub struct Stubbing {
    state: Arc<Mutex<Option<StubbingState>>>,
}

impl Stubbing {
    pub(crate) fn new(defaults: ResponseDefaults) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(StubbingState {
                matchers: Vec::new(),
                responses: Vec::new(),
                defaults,
            }))),
        }
    }

    /// Adds a matcher; the rule will match only requests accepted by every
    /// added matcher.
    pub fn when(&self, matcher: impl RequestMatcher + 'static) -> &Self {
        let mut guard = self.state.lock();
        let state = guard.as_mut().expect(CONSUMED);
        state.matchers.push(Arc::new(matcher));
        self
    }

    /// Opens the next response definition, seeded from the defaults snapshot.
    pub fn respond(&self) -> &Self {
        let mut guard = self.state.lock();
        let state = guard.as_mut().expect(CONSUMED);
        let response = StubResponse::from_defaults(&state.defaults);
        state.responses.push(response);
        self
    }

    pub fn with_status(&self, status: u16) -> &Self {
        self.with_current(|response| response.set_status(status));
        self
    }

    /// Adds a header to the current response definition, keeping any default
    /// headers of the same name.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let (name, value) = (name.into(), value.into());
        self.with_current(move |response| response.add_header(name, value));
        self
    }

    pub fn with_body(&self, text: impl Into<String>) -> &Self {
        let text = text.into();
        self.with_current(move |response| response.set_body(text));
        self
    }

    pub fn with_raw_body(&self, bytes: impl Into<bytes::Bytes>) -> &Self {
        let bytes = bytes.into();
        self.with_current(move |response| response.set_raw_body(bytes));
        self
    }

    pub fn with_encoding(&self, label: impl Into<String>) -> &Self {
        let label = label.into();
        self.with_current(move |response| response.set_encoding(label));
        self
    }

    /// Applies `f` to the current response definition, implicitly opening the
    /// first one when none exists yet.
    fn with_current(&self, f: impl FnOnce(&mut StubResponse)) {
        let mut guard = self.state.lock();
        let state = guard.as_mut().expect(CONSUMED);
        if state.responses.is_empty() {
            let response = StubResponse::from_defaults(&state.defaults);
            state.responses.push(response);
        }
        let current = state
            .responses
            .last_mut()
            .expect("a response definition was just ensured");
        f(current);
    }

    /// Consumes the stubbing into an immutable rule. The inner state is moved
    /// out, so later mutation through any surviving handle cannot reach the
    /// frozen rule. A stubbing without explicit response definitions freezes
    /// to a single all-defaults response.
    pub(crate) fn create_rule(&self) -> StubRule {
        let mut state = self.state.lock().take().expect(CONSUMED);
        if state.responses.is_empty() {
            state.responses.push(StubResponse::from_defaults(&state.defaults));
        }
        StubRule::new(state.matchers, state.responses)
    }
}
