pub mod boundary;
pub mod session;
pub mod supervisor;
pub mod terminal;
pub mod transport;
