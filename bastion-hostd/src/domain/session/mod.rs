pub mod aggregate;
pub mod envelope;
pub mod value_object;

pub use aggregate::{SessionMetadata, SessionState, SessionSync};
pub use envelope::{EnvelopeError, PersistedSession};
pub use value_object::{InstanceId, SessionId};
