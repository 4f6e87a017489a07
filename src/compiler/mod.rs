pub mod core;
pub mod loader;
