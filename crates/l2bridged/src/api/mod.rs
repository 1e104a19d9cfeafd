//! Remote network driver plugin API.

pub mod server;
pub mod types;
