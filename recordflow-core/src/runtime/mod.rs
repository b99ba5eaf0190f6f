//! Async runtime management
//!
//! Dedicated Tokio runtime for loader workers and shutdown signalling.

pub mod executor;
pub mod shutdown;

pub use executor::{LoaderRuntime, RuntimeConfig};
pub use shutdown::ShutdownSignal;
