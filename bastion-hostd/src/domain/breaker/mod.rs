pub mod aggregate;
pub mod events;

pub use aggregate::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker, Permit};
pub use events::BreakerTransition;
