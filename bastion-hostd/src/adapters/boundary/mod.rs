pub mod whitelist_file;

pub use whitelist_file::load_whitelist;
