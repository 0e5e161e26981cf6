pub mod boundary;
pub mod breaker;
pub mod invoke;
pub mod session;
pub mod supervisor;
pub mod terminal;
