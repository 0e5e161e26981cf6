pub mod connection;
pub mod error;
pub mod handler;
pub mod queue;
pub mod service;

pub use connection::{spawn_connection_monitor, ConnectionState};
pub use error::{InvokeError, InvokeFailure, InvokeResponse};
pub use handler::{ChannelHandler, SystemHandler};
pub use queue::{spawn_queue_drainer, DrainerHandle, Enqueue, MessageQueue, QueueConfig};
pub use service::{InvokeOptions, InvokeService};
