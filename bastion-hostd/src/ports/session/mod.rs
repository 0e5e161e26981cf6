pub mod store_port;

pub use store_port::{SessionStore, SessionStoreError};
