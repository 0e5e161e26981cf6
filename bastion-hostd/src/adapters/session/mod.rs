pub mod repo_file;
pub mod repo_mem;

pub use repo_file::FileSessionStore;
pub use repo_mem::InMemorySessionStore;
