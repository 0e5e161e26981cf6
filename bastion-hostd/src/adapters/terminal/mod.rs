pub mod shell;

pub use shell::ShellSpawner;
