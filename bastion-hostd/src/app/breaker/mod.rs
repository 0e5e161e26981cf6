pub mod boundary;
pub mod registry;

pub use boundary::{CallError, CallOptions, CallOutcome, ErrorBoundary, RetryConfig};
pub use registry::BreakerRegistry;

/// Breaker target for the backend connection as a whole.
pub const BACKEND_TARGET: &str = "backend";
