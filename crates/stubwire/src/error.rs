//! Library error surface.

/// Errors surfaced by the stub engine and its transport lifecycle.
///
/// There is no retry anywhere in this crate: every variant is a programming
/// or configuration error meant to fail fast in a test-authoring context.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// Mutating the engine after the first request has been served, or
    /// supplying invalid default values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The incoming request body could not be drained.
    #[error("failed to read the request body")]
    Io(#[from] std::io::Error),

    /// The underlying transport failed to start.
    #[error("stub http server start failure")]
    Startup(#[source] anyhow::Error),

    /// The underlying transport failed to stop.
    #[error("stub http server shutdown failure")]
    Shutdown(#[source] anyhow::Error),

    #[error("the stub http server has been started already")]
    AlreadyStarted,

    #[error("the stub http server hasn't been started yet")]
    NotStarted,
}
