//! # R2P2 - Request/Response Pair Protocol
//!
//! This crate implements the core engine of R2P2 (ATC 2019), a datagram
//! request/response RPC protocol for microsecond-scale datacenter services.
//!
//! ## Features
//!
//! - **Datagram-native RPC**: one request/response exchange per pair, no
//!   connection state beyond the exchange itself
//! - **Fragmentation with in-order reassembly**: large messages split into
//!   packets with explicit first/last markers; any gap or reorder fails the
//!   request
//! - **ACK handshake for multi-packet requests**: a small head packet goes
//!   out first, the remainder follows the server's acknowledgement
//! - **Shared-nothing workers**: every pool, registry, and timer is owned by
//!   one per-thread `Worker`; no locks anywhere
//! - **Pluggable transport**: raw sockets, kernel bypass, or an in-process
//!   harness behind the `Transport` trait
//!
//! ## Usage
//!
//! ```ignore
//! use r2p2::{ClientCtx, Config, HostTuple, Policy, Worker};
//!
//! let mut worker = Worker::new(transport, Config::default());
//!
//! // Server side: deliver requests, respond when ready
//! worker.set_recv_cb(|handle, iov| {
//!     // Record handle and payload; call worker.send_response(handle, ..)
//!     // after the upcall returns.
//! });
//!
//! // Client side
//! let ctx = ClientCtx::new(server, Policy::LB_ROUTE)
//!     .timeout_us(5_000)
//!     .on_success(|handle, iov| println!("reply: {} slices", iov.len()))
//!     .on_error(|code| eprintln!("failed: {code}"))
//!     .on_timeout(|| eprintln!("timed out"));
//! let handle = worker.send_request(&[b"ping"], ctx)?;
//!
//! // Event loop: feed inbound datagrams and drive timers
//! worker.handle_incoming_pck(&datagram, source, local, None);
//! worker.poll_timers(now_us);
//! ```
//!
//! ## Architecture
//!
//! The crate is organized as follows:
//!
//! - [`packet`]: Wire header codec and protocol constants
//! - [`buffer`]: Packet buffer pool (`PktBuf`, `BufPool`)
//! - [`msg`]: Message chains, fragmentation, payload gathering
//! - [`pair`]: Client/server pair records and handles
//! - [`timing`]: Timing wheel for request timeouts
//! - [`transport`]: The datagram transport seam
//! - [`config`]: Worker configuration
//! - [`worker`]: The per-thread engine (`Worker`)
//!
//! ## References
//!
//! - [R2P2: Making RPCs first-class datacenter citizens (ATC 2019)](https://www.usenix.org/conference/atc19/presentation/kogias-r2p2)

pub mod buffer;
pub mod config;
pub mod error;
pub mod msg;
pub mod packet;
pub mod pair;
pub mod timing;
pub mod transport;
pub mod worker;

// Re-export main types
pub use buffer::{BufPool, PktBuf};
pub use config::Config;
pub use error::{Error, Result};
pub use msg::Msg;
pub use packet::{
    Hdr, HdrFlags, MsgType, Policy, HDR_SIZE, MAGIC, MAX_MSG_SIZE, MAX_PACKETS, MIN_PAYLOAD_SIZE,
    PAYLOAD_SIZE,
};
pub use pair::{ClientCtx, ClientHandle, ClientState, ServerHandle};
pub use timing::{TimerEntry, TimingWheel};
pub use transport::{Flow, HostTuple, Transport};
pub use worker::{RecvCb, Worker};
