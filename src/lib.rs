pub mod comms;
pub mod gateway;
pub mod security;
pub mod tools;
pub mod transport;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
