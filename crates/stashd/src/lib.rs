//! Stash: a content addressed file server with admission control.
//!
//! Files are stored by the hash of their bytes (see the `cas` crate) and
//! served over a small JSON RPC surface. Upload and Download share one
//! bounded concurrency pool, List has another; requests that find their pool
//! full are rejected straight away rather than queued.

pub mod admission;
pub mod client;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod service;
pub mod telemetry;

pub use admission::{
    AdmissionController, AdmissionError, AdmissionPermit, ConcurrencySnapshot, OperationClass,
};
pub use client::{ClientError, StashClient};
pub use error::RpcError;
pub use protocol::Operation;
pub use rpc::{router, RpcState};
pub use service::FileService;
