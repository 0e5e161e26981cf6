pub mod boundary;
pub mod breaker;
pub mod session;
pub mod supervisor;
