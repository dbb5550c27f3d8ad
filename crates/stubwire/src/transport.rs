//! Contracts between the rule engine and its transport.
//!
//! A transport owns sockets and HTTP decoding; the engine owns rules and
//! recording. At start the engine hands the transport its two injection
//! points: a provider that answers requests and an observer that records
//! without answering (for transports that only watch traffic).

use crate::request::StubRequest;
use crate::response::StubResponse;
use std::sync::Arc;

/// Answers a decoded request with the response to write back verbatim.
pub trait StubResponseProvider: Send + Sync {
    fn provide_stub_response(&self, request: StubRequest) -> StubResponse;
}

/// Records a decoded request with no response expected.
pub trait RequestObserver: Send + Sync {
    fn record_request(&self, request: StubRequest);
}

/// A listener that feeds decoded requests to the engine.
///
/// Lifecycle operations are fallible and never retried by the engine; their
/// failures are wrapped into a single library error kind regardless of the
/// transport implementation.
pub trait StubTransport: Send {
    /// Binds and starts serving. Every decoded request goes to `provider`
    /// and its response is written back unchanged.
    fn start(
        &mut self,
        provider: Arc<dyn StubResponseProvider>,
        observer: Arc<dyn RequestObserver>,
    ) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;

    /// The bound port; `Some` only while serving.
    fn port(&self) -> Option<u16>;
}
