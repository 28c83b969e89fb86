pub mod base_dir;
pub mod client;
pub mod endpoint;
