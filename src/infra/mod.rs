//! Infrastructure adapters and runtime bootstrap.

pub mod assets;
pub mod error;
pub mod http;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
