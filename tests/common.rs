//! Common test utilities for R2P2 integration tests.

#![allow(dead_code)]

use std::io;
use std::net::Ipv4Addr;

use r2p2::{Flow, HostTuple, Transport, Worker};

/// One datagram captured on its way out of a worker.
pub struct SentPacket {
    pub bytes: Vec<u8>,
    pub dest: HostTuple,
    pub flow: Option<u64>,
}

/// In-process transport that records outbound datagrams instead of sending
/// them. Client flows get fresh local ports; server-side sends (ACKs,
/// responses) go out on the shared `addr` endpoint.
pub struct MockTransport {
    pub addr: HostTuple,
    pub sent: Vec<SentPacket>,
    pub flows: Vec<(u64, HostTuple)>,
    pub open_flows: usize,
    pub fail_open: bool,
    pub notifications: usize,
    pub hw_tx_timestamp: Option<u64>,
    next_id: u64,
    next_port: u16,
}

impl MockTransport {
    pub fn new(addr: HostTuple) -> Self {
        Self {
            addr,
            sent: Vec::new(),
            flows: Vec::new(),
            open_flows: 0,
            fail_open: false,
            notifications: 0,
            hw_tx_timestamp: None,
            next_id: 0,
            next_port: 40_000,
        }
    }

    pub fn take_sent(&mut self) -> Vec<SentPacket> {
        std::mem::take(&mut self.sent)
    }

    /// Local endpoint of a flow, or the shared endpoint for server sends.
    pub fn flow_local(&self, id: u64) -> HostTuple {
        self.flows
            .iter()
            .find(|(flow_id, _)| *flow_id == id)
            .map(|(_, local)| *local)
            .unwrap_or(self.addr)
    }
}

impl Transport for MockTransport {
    fn open_flow(&mut self, _dest: &HostTuple) -> io::Result<Flow> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "no socket"));
        }
        self.next_id += 1;
        self.next_port += 1;
        let flow = Flow {
            id: self.next_id,
            local: HostTuple::new(self.addr.ip, self.next_port),
        };
        self.flows.push((flow.id, flow.local));
        self.open_flows += 1;
        Ok(flow)
    }

    fn close_flow(&mut self, _id: u64) {
        self.open_flows -= 1;
    }

    fn send(
        &mut self,
        pkts: &mut dyn Iterator<Item = &[u8]>,
        dest: &HostTuple,
        flow: Option<u64>,
    ) -> io::Result<()> {
        for pkt in pkts {
            self.sent.push(SentPacket {
                bytes: pkt.to_vec(),
                dest: *dest,
                flow,
            });
        }
        Ok(())
    }

    fn router_notify(&mut self) {
        self.notifications += 1;
    }

    fn tx_timestamp(&mut self, _flow: u64) -> Option<u64> {
        self.hw_tx_timestamp
    }
}

pub fn host(ip: [u8; 4], port: u16) -> HostTuple {
    HostTuple::new(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]), port)
}

/// Captured datagram ready for delivery: bytes, destination, source.
pub type Wire = (Vec<u8>, HostTuple, HostTuple);

/// Drain a worker's outbound datagrams, resolving each packet's source
/// endpoint the way the network would see it.
pub fn take_wire(worker: &mut Worker<MockTransport>) -> Vec<Wire> {
    let sent = worker.transport_mut().take_sent();
    let transport = worker.transport();
    sent.into_iter()
        .map(|pkt| {
            let source = pkt
                .flow
                .map(|id| transport.flow_local(id))
                .unwrap_or(transport.addr);
            (pkt.bytes, pkt.dest, source)
        })
        .collect()
}

/// Deliver captured datagrams to a worker, in order.
pub fn deliver(worker: &mut Worker<MockTransport>, wire: &[Wire]) {
    for (bytes, dest, source) in wire {
        worker.handle_incoming_pck(bytes, *source, *dest, None);
    }
}

/// Shuttle datagrams between two workers until both go quiet.
pub fn pump(a: &mut Worker<MockTransport>, b: &mut Worker<MockTransport>) {
    loop {
        let wire_a = take_wire(a);
        let wire_b = take_wire(b);
        if wire_a.is_empty() && wire_b.is_empty() {
            break;
        }
        deliver(b, &wire_a);
        deliver(a, &wire_b);
    }
}
