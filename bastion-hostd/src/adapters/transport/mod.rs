pub mod http;

pub use http::HttpBackendTransport;
