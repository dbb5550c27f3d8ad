//! Stubwire is an in-process HTTP stub server for test suites: register
//! expected-request/response rules, point the code under test at the server,
//! and verify afterwards what was received.
//!
//! The crate splits into the rule engine ([`Mocker`]) and a transport; the
//! default transport ([`HttpStubServer`]) serves real HTTP/1 on a loopback
//! port, and any listener implementing [`StubTransport`] can replace it.
//!
//! Rules are registered while the engine is configurable; the first served
//! request freezes them. Rules are evaluated most-recently-defined first,
//! and a rule with several response definitions serves them in order,
//! sticking to the last one once exhausted.
//!
//! ```rust
//! use stubwire::{matchers, HttpStubServer, Mocker, StubRequest};
//!
//! # fn main() -> Result<(), stubwire::StubError> {
//! let mocker = Mocker::new(HttpStubServer::new());
//! mocker
//!     .on_request()?
//!     .when(matchers::method("GET"))
//!     .when(matchers::path("/hello"))
//!     .respond()
//!     .with_status(200)
//!     .with_body("hi");
//!
//! // A transport would normally decode this from the wire.
//! let request = StubRequest::builder()
//!     .method("GET")
//!     .uri("/hello".parse().unwrap())
//!     .build()?;
//! let response = mocker.provide_stub_response_for(request);
//! assert_eq!(response.status(), 200);
//!
//! // Unmatched requests get the fixed 404 fallback.
//! let other = StubRequest::builder().uri("/other".parse().unwrap()).build()?;
//! assert_eq!(mocker.provide_stub_response_for(other).status(), 404);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fields;
pub mod matchers;
pub mod mocker;
pub mod request;
pub mod response;
pub mod rule;
pub mod server;
pub mod stubbing;
pub mod transport;

pub use error::StubError;
pub use fields::FieldMap;
pub use matchers::{RequestMatcher, ValueMatch};
pub use mocker::Mocker;
pub use request::{StubRequest, StubRequestBuilder};
pub use response::StubResponse;
pub use rule::StubRule;
pub use server::HttpStubServer;
pub use stubbing::Stubbing;
pub use transport::{RequestObserver, StubResponseProvider, StubTransport};
