pub mod backend_port;

pub use backend_port::{BackendTransport, TransportError, TransportRequest};
