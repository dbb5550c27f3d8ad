//! The rule engine: stub registration, one-time freeze, matching, recording
//! and transport lifecycle.

use crate::error::StubError;
use crate::fields::FieldMap;
use crate::matchers::RequestMatcher;
use crate::request::StubRequest;
use crate::response::{encoding_for_label, no_stub_response, ResponseDefaults, StubResponse};
use crate::rule::StubRule;
use crate::stubbing::Stubbing;
use crate::transport::{RequestObserver, StubResponseProvider, StubTransport};
use parking_lot::{Mutex, RwLock};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

const NOT_CONFIGURABLE: &str =
    "once the first http request has been served, no further stubbing is possible";

/// Pre-freeze configuration. Guarded by one mutex so stub registration and
/// the freeze itself are serialized against each other.
struct MockerConfig {
    stubbings: Vec<Stubbing>,
    defaults: ResponseDefaults,
    configurable: bool,
}

/// Engine state shared with the transport.
struct Engine {
    config: Mutex<MockerConfig>,
    /// Frozen rules, built exactly once on the first served request.
    rules: OnceLock<Vec<StubRule>>,
    recorded: RwLock<Vec<StubRequest>>,
}

impl Engine {
    fn check_configurable(&self) -> Result<(), StubError> {
        // For callers that only need the check; setters re-check under the
        // lock they already hold.
        if self.config.lock().configurable {
            Ok(())
        } else {
            Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()))
        }
    }

    /// Converts every stubbing into a rule, in registration order. Runs at
    /// most once; concurrent first requests all observe the same rule set.
    fn frozen_rules(&self) -> &[StubRule] {
        self.rules.get_or_init(|| {
            let mut config = self.config.lock();
            config.configurable = false;
            debug!(
                stubbings = config.stubbings.len(),
                "freezing stubbings into stub rules"
            );
            config.stubbings.iter().map(Stubbing::create_rule).collect()
        })
    }

    fn provide(&self, request: StubRequest) -> StubResponse {
        let rules = self.frozen_rules();

        self.recorded.write().push(request.clone());

        for rule in rules.iter().rev() {
            if rule.matched_by(&request) {
                debug!(rule = %rule, "applying stub rule");
                return rule.next_response().clone();
            }
        }

        let mut reason = String::from("no suitable rule found:\n");
        for rule in rules {
            let _ = writeln!(
                reason,
                "the rule '{rule}' cannot be applied, mismatch:\n{}",
                rule.describe_mismatch(&request)
            );
        }
        info!("{}", reason.trim_end());

        no_stub_response()
    }
}

impl StubResponseProvider for Engine {
    fn provide_stub_response(&self, request: StubRequest) -> StubResponse {
        self.provide(request)
    }
}

impl RequestObserver for Engine {
    fn record_request(&self, request: StubRequest) {
        self.recorded.write().push(request);
    }
}

struct Lifecycle {
    transport: Box<dyn StubTransport>,
    started: bool,
}

/// An HTTP stub server instance.
///
/// Stateful and thread-safe. One `Mocker` is one independent stub server;
/// create several for multiple simultaneous servers in one process.
///
/// Rules are registered through [`on_request`](Self::on_request) while the
/// engine is configurable. The first served request freezes the
/// configuration: rules must be fully known before any request is answered,
/// so rule order can never depend on request arrival timing. After the
/// freeze, registration and default setters fail with
/// [`StubError::Configuration`].
pub struct Mocker {
    engine: Arc<Engine>,
    lifecycle: Mutex<Lifecycle>,
}

impl Mocker {
    pub fn new(transport: impl StubTransport + 'static) -> Self {
        Self {
            engine: Arc::new(Engine {
                config: Mutex::new(MockerConfig {
                    stubbings: Vec::new(),
                    defaults: ResponseDefaults::default(),
                    configurable: true,
                }),
                rules: OnceLock::new(),
                recorded: RwLock::new(Vec::new()),
            }),
            lifecycle: Mutex::new(Lifecycle {
                transport: Box::new(transport),
                started: false,
            }),
        }
    }

    /// Registers a new stubbing and returns its builder handle, seeded with a
    /// snapshot of the current defaults.
    pub fn on_request(&self) -> Result<Stubbing, StubError> {
        let mut config = self.engine.config.lock();
        if !config.configurable {
            return Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()));
        }
        debug!("adding new stubbing");
        let stubbing = Stubbing::new(config.defaults.clone());
        config.stubbings.push(stubbing.clone());
        Ok(stubbing)
    }

    /// Default status for every stub response not overriding it.
    pub fn set_default_status(&self, status: u16) -> Result<(), StubError> {
        let mut config = self.engine.config.lock();
        if !config.configurable {
            return Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()));
        }
        config.defaults.status = status;
        Ok(())
    }

    /// Replaces the default headers added to every stub response.
    pub fn set_default_headers(&self, headers: FieldMap) -> Result<(), StubError> {
        let mut config = self.engine.config.lock();
        if !config.configurable {
            return Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()));
        }
        config.defaults.headers = headers;
        Ok(())
    }

    /// Adds one default header to every stub response.
    pub fn add_default_header(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StubError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StubError::Configuration(
                "header name cannot be empty".to_string(),
            ));
        }
        let mut config = self.engine.config.lock();
        if !config.configurable {
            return Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()));
        }
        config.defaults.headers.append(name, value.into());
        Ok(())
    }

    /// Default encoding label for every stub response; must resolve to a
    /// known encoding.
    pub fn set_default_encoding(&self, label: impl Into<String>) -> Result<(), StubError> {
        let label = label.into();
        if encoding_for_label(&label).is_none() {
            return Err(StubError::Configuration(format!(
                "unknown encoding label: {label:?}"
            )));
        }
        let mut config = self.engine.config.lock();
        if !config.configurable {
            return Err(StubError::Configuration(NOT_CONFIGURABLE.to_string()));
        }
        config.defaults.encoding = label;
        Ok(())
    }

    /// Whether stubbing is still permitted (no request served yet).
    pub fn is_configurable(&self) -> bool {
        self.engine.check_configurable().is_ok()
    }

    /// Freezes the configuration if needed, records the request and returns
    /// the matching rule's next response, or the fixed 404 fallback.
    ///
    /// Rules are evaluated in reverse registration order: the most recently
    /// defined matching rule wins.
    pub fn provide_stub_response_for(&self, request: StubRequest) -> StubResponse {
        self.engine.provide(request)
    }

    /// Records a request without producing a response (out-of-band
    /// visibility). Does not freeze the configuration.
    pub fn observe_request(&self, request: StubRequest) {
        self.engine.record_request(request);
    }

    /// A consistent snapshot of every request seen so far.
    pub fn recorded_requests(&self) -> Vec<StubRequest> {
        self.engine.recorded.read().clone()
    }

    /// How many recorded requests the matcher accepts.
    pub fn count_matching(&self, matcher: &dyn RequestMatcher) -> usize {
        self.engine
            .recorded
            .read()
            .iter()
            .filter(|request| matcher.matches(request))
            .count()
    }

    /// Starts the underlying transport, handing it the engine's injection
    /// points.
    pub fn start(&self) -> Result<(), StubError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.started {
            return Err(StubError::AlreadyStarted);
        }
        debug!("starting the underlying stub server");
        let provider: Arc<dyn StubResponseProvider> = self.engine.clone();
        let observer: Arc<dyn RequestObserver> = self.engine.clone();
        lifecycle
            .transport
            .start(provider, observer)
            .map_err(StubError::Startup)?;
        lifecycle.started = true;
        Ok(())
    }

    pub fn stop(&self) -> Result<(), StubError> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.started {
            return Err(StubError::NotStarted);
        }
        debug!("stopping the underlying stub server");
        lifecycle.transport.stop().map_err(StubError::Shutdown)?;
        lifecycle.started = false;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.lock().started
    }

    /// The transport's bound port; valid only once started.
    pub fn port(&self) -> Result<u16, StubError> {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.started {
            return Err(StubError::NotStarted);
        }
        lifecycle.transport.port().ok_or(StubError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{self, ValueMatch};
    use crate::response::NO_STUB_BODY;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Transport that does nothing; these tests drive the engine directly.
    struct NullTransport {
        running: bool,
        fail_start: bool,
    }

    impl NullTransport {
        fn new() -> Self {
            Self {
                running: false,
                fail_start: false,
            }
        }
    }

    impl StubTransport for NullTransport {
        fn start(
            &mut self,
            _provider: Arc<dyn StubResponseProvider>,
            _observer: Arc<dyn RequestObserver>,
        ) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("bind refused");
            }
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            self.running = false;
            Ok(())
        }

        fn port(&self) -> Option<u16> {
            self.running.then_some(42000)
        }
    }

    fn mocker() -> Mocker {
        Mocker::new(NullTransport::new())
    }

    fn get(path_and_query: &str) -> StubRequest {
        StubRequest::builder()
            .uri(path_and_query.parse().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn most_recently_defined_rule_wins() {
        let mocker = mocker();
        mocker
            .on_request()
            .unwrap()
            .when(matchers::path("/x"))
            .respond()
            .with_status(201);
        mocker
            .on_request()
            .unwrap()
            .when(matchers::path("/x"))
            .respond()
            .with_status(202);

        let response = mocker.provide_stub_response_for(get("/x"));
        assert_eq!(response.status(), 202);
    }

    #[test]
    fn fallback_response_when_nothing_matches() {
        let mocker = mocker();
        mocker
            .on_request()
            .unwrap()
            .when(matchers::path("/known"))
            .respond()
            .with_status(200);

        let response = mocker.provide_stub_response_for(get("/unknown"));
        assert_eq!(response.status(), 404);
        assert_eq!(&response.body_bytes()[..], NO_STUB_BODY.as_bytes());
        assert_eq!(
            response.headers().first_ignore_case("content-type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn serving_freezes_the_configuration() {
        let mocker = mocker();
        assert!(mocker.is_configurable());

        // Freezes even when no rule matches.
        let _ = mocker.provide_stub_response_for(get("/anything"));

        assert!(!mocker.is_configurable());
        assert!(matches!(
            mocker.on_request(),
            Err(StubError::Configuration(_))
        ));
        assert!(matches!(
            mocker.set_default_status(500),
            Err(StubError::Configuration(_))
        ));
        assert!(matches!(
            mocker.set_default_headers(FieldMap::new()),
            Err(StubError::Configuration(_))
        ));
        assert!(matches!(
            mocker.add_default_header("X", "1"),
            Err(StubError::Configuration(_))
        ));
        assert!(matches!(
            mocker.set_default_encoding("UTF-8"),
            Err(StubError::Configuration(_))
        ));
    }

    #[test]
    fn every_request_is_recorded_exactly_once() {
        let mocker = mocker();
        mocker.on_request().unwrap().respond().with_status(200);

        let _ = mocker.provide_stub_response_for(get("/a"));
        let _ = mocker.provide_stub_response_for(get("/b?x=1"));
        mocker.observe_request(get("/c"));

        let recorded = mocker.recorded_requests();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].uri().path(), "/a");
        assert_eq!(recorded[1].first_parameter("x"), Some("1"));
        assert_eq!(recorded[2].uri().path(), "/c");
    }

    #[test]
    fn observing_a_request_does_not_freeze_the_configuration() {
        let mocker = mocker();
        mocker.observe_request(get("/watched"));

        assert!(mocker.is_configurable());
        assert!(mocker.on_request().is_ok());
        assert_eq!(mocker.recorded_requests().len(), 1);
    }

    #[test]
    fn count_matching_filters_recorded_requests() {
        let mocker = mocker();
        let _ = mocker.provide_stub_response_for(get("/api/a"));
        let _ = mocker.provide_stub_response_for(get("/api/b"));
        let _ = mocker.provide_stub_response_for(get("/other"));

        let api = matchers::path_matching(ValueMatch::starts_with("/api"));
        assert_eq!(mocker.count_matching(&api), 2);
        assert_eq!(mocker.count_matching(&matchers::path("/other")), 1);
        assert_eq!(mocker.count_matching(&matchers::path("/none")), 0);
    }

    #[test]
    fn defaults_are_snapshotted_per_stubbing() {
        let mocker = mocker();
        mocker.set_default_status(200).unwrap();
        mocker.add_default_header("X", "Y").unwrap();

        let inherited = mocker.on_request().unwrap();
        let overridden = mocker.on_request().unwrap();
        overridden.respond().with_status(201);

        // Later default changes do not reach already-created stubbings.
        mocker.set_default_status(500).unwrap();
        let late = mocker.on_request().unwrap();
        late.when(matchers::path("/late"));
        overridden.when(matchers::path("/overridden"));
        inherited.when(matchers::path("/inherited"));

        let response = mocker.provide_stub_response_for(get("/inherited"));
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().first_ignore_case("x"), Some("Y"));

        let response = mocker.provide_stub_response_for(get("/overridden"));
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers().first_ignore_case("x"), Some("Y"));

        let response = mocker.provide_stub_response_for(get("/late"));
        assert_eq!(response.status(), 500);
    }

    #[test]
    fn invalid_defaults_are_rejected() {
        let mocker = mocker();
        assert!(matches!(
            mocker.add_default_header("", "v"),
            Err(StubError::Configuration(_))
        ));
        assert!(matches!(
            mocker.set_default_encoding("not-a-charset"),
            Err(StubError::Configuration(_))
        ));
        assert!(mocker.set_default_encoding("ISO-8859-1").is_ok());
    }

    #[test]
    fn concurrent_first_requests_freeze_once_and_cycle_responses() {
        let n = 8;
        let mocker = mocker();
        let stubbing = mocker.on_request().unwrap();
        for i in 0..n {
            stubbing.respond().with_status(200 + i as u16);
        }

        let statuses = parking_lot::Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..n {
                scope.spawn(|| {
                    let response = mocker.provide_stub_response_for(get("/"));
                    statuses.lock().push(response.status());
                });
            }
        });

        let mut statuses = statuses.into_inner();
        statuses.sort_unstable();
        let expected: Vec<u16> = (0..n).map(|i| 200 + i as u16).collect();
        assert_eq!(statuses, expected);
        assert_eq!(mocker.recorded_requests().len(), n);
        assert!(!mocker.is_configurable());
    }

    #[test]
    fn lifecycle_transitions_are_explicit() {
        let mocker = mocker();
        assert!(!mocker.is_started());
        assert!(matches!(mocker.port(), Err(StubError::NotStarted)));
        assert!(matches!(mocker.stop(), Err(StubError::NotStarted)));

        mocker.start().unwrap();
        assert!(mocker.is_started());
        assert_eq!(mocker.port().unwrap(), 42000);
        assert!(matches!(mocker.start(), Err(StubError::AlreadyStarted)));

        mocker.stop().unwrap();
        assert!(!mocker.is_started());
    }

    #[test]
    fn transport_start_failure_is_wrapped() {
        let mocker = Mocker::new(NullTransport {
            running: false,
            fail_start: true,
        });
        assert!(matches!(mocker.start(), Err(StubError::Startup(_))));
        assert!(!mocker.is_started());
    }

    #[test]
    fn transports_observe_engine_injection_points() {
        // The provider handed to the transport is the same engine the mocker
        // fronts: a call through it freezes and records like a direct call.
        struct CapturingTransport {
            saw_fallback: Arc<AtomicBool>,
        }
        impl StubTransport for CapturingTransport {
            fn start(
                &mut self,
                provider: Arc<dyn StubResponseProvider>,
                _observer: Arc<dyn RequestObserver>,
            ) -> anyhow::Result<()> {
                let request = StubRequest::builder().build().unwrap();
                let response = provider.provide_stub_response(request);
                self.saw_fallback
                    .store(response.status() == 404, Ordering::SeqCst);
                Ok(())
            }
            fn stop(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
            fn port(&self) -> Option<u16> {
                None
            }
        }

        let saw_fallback = Arc::new(AtomicBool::new(false));
        let mocker = Mocker::new(CapturingTransport {
            saw_fallback: saw_fallback.clone(),
        });
        mocker.start().unwrap();
        assert!(saw_fallback.load(Ordering::SeqCst));
        assert_eq!(mocker.recorded_requests().len(), 1);
        assert!(!mocker.is_configurable());
    }
}
