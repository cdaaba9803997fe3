//! # Tallygrid client core
//!
//! Client-side request multiplexer for the Tallygrid replicated transaction
//! ledger. The cluster accepts exactly one request per client at a time, so
//! sustained throughput comes from coalescing: packets submitted from any
//! number of application threads are merged into cluster-sized batches,
//! dispatched one at a time, and the batched reply is carved back up so each
//! submitter observes exactly its own result slice.
//!
//! The crate exposes two surfaces over one core:
//!
//! - [`Client`], a typed Rust API whose request methods return futures
//!   completed by the client's internal reactor thread;
//! - a stable C ABI in [`ffi`] (`tg_client_init` and friends) for the
//!   per-language bindings, built on opaque client and packet handles.
//!
//! ## Architecture
//!
//! One dedicated reactor thread owns all protocol, batching, dispatch, and
//! completion work. Producer threads only touch lock-free structures: the
//! packet pool's free list, the submission queue, and the reactor's wake
//! signal. Submitted packets flow through validation into either an
//! immediate dispatch (when the wire is idle) or the pending queue, where
//! same-operation packets coalesce up to the protocol's body-size cap.
//!
//! ```text
//! producers -> submission queue -> (signal) -> reactor -> batcher
//!     -> pending queue -> dispatcher -> cluster -> demultiplexer
//!     -> per-packet completion
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tallygrid_client as tg;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = tg::Client::new(0, "127.0.0.1:3001", tg::ClientConfig::default())?;
//!
//! let accounts = [
//!     tg::Account { id: tg::id(), ledger: 1, code: 1, ..Default::default() },
//!     tg::Account { id: tg::id(), ledger: 1, code: 1, ..Default::default() },
//! ];
//!
//! let pending = client.create_accounts(&accounts)?;
//! let results = futures::executor::block_on(pending)?;
//! // Create replies are sparse: an empty result set means every event
//! // succeeded.
//! assert!(results.is_empty());
//! client.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(target_endian = "big")]
compile_error!("tallygrid-client shares wire-format structs with the protocol and requires a little-endian host");

mod batch;
mod client;
mod config;
mod context;
mod demux;
mod error;
mod id;
mod metrics;
mod operation;
mod packet;
mod pool;
mod queue;
mod reactor;
mod types;

pub mod ffi;
pub mod protocol;
pub mod testing;

pub use client::Client;
pub use config::{
    parse_addresses, ClientConfig, CONCURRENCY_MAX, CONCURRENCY_MIN, DEFAULT_PORT, REPLICAS_MAX,
};
pub use error::{AcquireError, InitError, InitResult, PacketStatus};
pub use id::id;
pub use metrics::MetricsSnapshot;
pub use operation::Operation;
pub use types::{
    Account, AccountBalance, AccountFilter, AccountFilterFlags, AccountFlags, CreateAccountResult,
    CreateAccountsResult, CreateTransferResult, CreateTransfersResult, EventResult, QueryFilter,
    QueryFilterFlags, Reserved, Transfer, TransferFlags,
};

/// Re-exports of the types most applications need.
pub mod prelude {
    pub use crate::{
        id, Account, AccountFilter, AccountFlags, Client, ClientConfig, PacketStatus, QueryFilter,
        Transfer, TransferFlags,
    };
}
