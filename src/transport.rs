//! The datagram transport seam.
//!
//! The engine is transport-agnostic: raw sockets, kernel bypass, or an
//! in-process harness all sit behind the `Transport` trait. The engine hands
//! the transport fully-formed packets and receives inbound datagrams through
//! `Worker::handle_incoming_pck`.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

/// An IPv4 endpoint: one side of a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTuple {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl HostTuple {
    pub const UNSPECIFIED: HostTuple = HostTuple {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for HostTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for HostTuple {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<HostTuple> for SocketAddrV4 {
    fn from(host: HostTuple) -> Self {
        SocketAddrV4::new(host.ip, host.port)
    }
}

/// Per-request transport resources, acquired before the first send.
///
/// `local` is the endpoint responses will arrive on; it is the demux key for
/// routing them back to the originating pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub id: u64,
    pub local: HostTuple,
}

/// Contract the datagram substrate presents to the engine.
pub trait Transport {
    /// Acquire transport resources for one outbound request.
    fn open_flow(&mut self, dest: &HostTuple) -> io::Result<Flow>;

    /// Release resources acquired by `open_flow`.
    fn close_flow(&mut self, id: u64);

    /// Transmit a chain of packets to `dest`, one datagram each.
    ///
    /// `flow` is present for client-side sends and absent for server-side
    /// sends (ACKs and responses), which go out on the shared endpoint.
    fn send(
        &mut self,
        pkts: &mut dyn Iterator<Item = &[u8]>,
        dest: &HostTuple,
        flow: Option<u64>,
    ) -> io::Result<()>;

    /// Called after a response has been handed to the transport, so the
    /// router can be told the request finished.
    fn router_notify(&mut self) {}

    /// NIC transmit timestamp of the last packet sent on `flow`, in
    /// nanoseconds, when the hardware supports it.
    fn tx_timestamp(&mut self, _flow: u64) -> Option<u64> {
        None
    }
}
