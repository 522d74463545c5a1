//! Line-delimited JSON transport between a host and the worker.

pub mod client;
pub mod protocol;
pub mod server;

pub use protocol::{LoadingStatus, WorkerEvent, WorkerMessage, WorkerRequest};
