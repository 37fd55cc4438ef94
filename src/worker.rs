//! The per-thread protocol engine.
//!
//! A `Worker` multiplexes outbound requests and inbound requests over one
//! datagram transport. It owns every piece of per-thread state: the pair
//! pools, the pending registries, the packet buffer pool, and the timing
//! wheel. Workers share nothing; each thread runs its own instance and all
//! methods run to completion.
//!
//! Inbound dispatch is two-way: packets whose type is addressed to a client
//! pair (responses, ACKs) go to the client state machine, everything else to
//! the server state machine.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::buffer::BufPool;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::msg;
use crate::packet::{Hdr, MsgType, Policy, BUF_CAPACITY, HDR_SIZE};
use crate::pair::{
    ClientCtx, ClientHandle, ClientPair, ClientState, Pool, ServerHandle, ServerPair,
};
use crate::timing::{TimerEntry, TimingWheel};
use crate::transport::{HostTuple, Transport};

/// Server-side receive callback: the reassembled request, one payload slice
/// per packet. The handle stays valid until `send_response`.
pub type RecvCb = Box<dyn FnMut(ServerHandle, &[&[u8]])>;

/// One per-thread instance of the R2P2 engine.
pub struct Worker<T: Transport> {
    transport: T,
    config: Config,
    client_pairs: Pool<ClientPair>,
    server_pairs: Pool<ServerPair>,
    pending_clients: Vec<usize>,
    pending_servers: Vec<usize>,
    bufs: BufPool,
    wheel: TimingWheel,
    expired_scratch: Vec<TimerEntry>,
    recv_cb: Option<RecvCb>,
    rng: SmallRng,
}

impl<T: Transport> Worker<T> {
    /// Create a worker: pre-allocate the pools and seed the request-id RNG.
    pub fn new(transport: T, config: Config) -> Self {
        let bufs = BufPool::new(config.packet_buffers);
        let mut wheel = TimingWheel::new(config.wheel_slots, config.wheel_slot_us);
        wheel.init(0);

        Self {
            transport,
            client_pairs: Pool::with_capacity(config.client_pairs),
            server_pairs: Pool::with_capacity(config.server_pairs),
            pending_clients: Vec::new(),
            pending_servers: Vec::new(),
            bufs,
            wheel,
            expired_scratch: Vec::new(),
            recv_cb: None,
            rng: SmallRng::from_os_rng(),
            config,
        }
    }

    /// Install the server-side receive callback.
    pub fn set_recv_cb<F>(&mut self, f: F)
    where
        F: FnMut(ServerHandle, &[&[u8]]) + 'static,
    {
        self.recv_cb = Some(Box::new(f));
    }

    /// Send a request to `ctx.destination`.
    ///
    /// Only the head packet is transmitted now; for a multi-packet request
    /// the remainder is held back until the server acknowledges the head.
    /// The timer, if `ctx` asks for one, is armed against the worker clock
    /// driven by [`poll_timers`](Self::poll_timers).
    pub fn send_request(&mut self, iov: &[&[u8]], ctx: ClientCtx) -> Result<ClientHandle> {
        let destination = ctx.destination;
        let policy = ctx.routing_policy;
        let timeout_us = ctx.timeout_us;

        if self.client_pairs.available() == 0 {
            return Err(Error::PairPoolExhausted);
        }

        let flow = self.transport.open_flow(&destination).map_err(Error::Io)?;

        let rid: u16 = self.rng.random();
        let request = match msg::prepare_msg(&mut self.bufs, iov, MsgType::Request, policy, rid) {
            Ok(request) => request,
            Err(e) => {
                self.transport.close_flow(flow.id);
                return Err(e);
            }
        };

        let mut cp = ClientPair::new(ctx);
        cp.state = if request.bufs.len() == 1 {
            ClientState::WaitResponse
        } else {
            ClientState::WaitAck
        };
        cp.request = request;
        // Responses come back to the flow's local endpoint; record it as the
        // demux key.
        cp.request.sender = flow.local;
        cp.flow = Some(flow);

        let slot = match self.client_pairs.alloc(cp) {
            Ok(slot) => slot,
            Err(mut cp) => {
                cp.request.recycle(&mut self.bufs);
                if let Some(flow) = cp.flow.take() {
                    self.transport.close_flow(flow.id);
                }
                return Err(Error::PairPoolExhausted);
            }
        };
        self.pending_clients.push(slot);

        {
            let Self {
                client_pairs,
                transport,
                ..
            } = self;
            if let Some(cp) = client_pairs.get(slot) {
                let flow_id = cp.flow.map(|f| f.id);
                let mut head = cp.request.bufs.iter().take(1).map(|b| b.as_slice());
                if let Err(e) = transport.send(&mut head, &destination, flow_id) {
                    warn!(rid, "sending request head failed: {e}");
                }
            }
        }

        if let Some(us) = timeout_us {
            let entry = TimerEntry {
                pair: slot,
                rid,
                expires_at: self.wheel.current_ts() + us,
            };
            let wheel_slot = self.wheel.insert(entry);
            if let Some(cp) = self.client_pairs.get_mut(slot) {
                cp.timer_slot = wheel_slot;
            }
        }

        Ok(ClientHandle(slot))
    }

    /// Send the response for a delivered request and release its pair.
    pub fn send_response(&mut self, handle: ServerHandle, iov: &[&[u8]]) -> Result<()> {
        let slot = handle.0;
        let (dest, rid) = match self.server_pairs.get(slot) {
            Some(sp) => (sp.request.sender, sp.request.req_id),
            None => return Err(Error::InvalidHandle),
        };

        let mut reply = msg::prepare_msg(
            &mut self.bufs,
            iov,
            MsgType::Response,
            Policy::FIXED_ROUTE,
            rid,
        )?;

        {
            let mut pkts = reply.packets();
            if let Err(e) = self.transport.send(&mut pkts, &dest, None) {
                warn!(rid, "sending response failed: {e}");
            }
        }
        self.transport.router_notify();
        reply.recycle(&mut self.bufs);

        self.pending_servers.retain(|&s| s != slot);
        Self::release_server_pair(&mut self.server_pairs, &mut self.bufs, slot);
        Ok(())
    }

    /// Release a client pair once the application is done with its reply.
    ///
    /// Safe to call on an already-released handle.
    pub fn recv_resp_done(&mut self, handle: ClientHandle) {
        let slot = handle.0;
        self.pending_clients.retain(|&s| s != slot);
        let Self {
            client_pairs,
            bufs,
            transport,
            wheel,
            ..
        } = self;
        Self::release_client_pair(client_pairs, bufs, transport, wheel, slot);
    }

    /// Transport upcall for one inbound datagram.
    ///
    /// `local_host` is the endpoint the datagram arrived on; `rx_ts` is the
    /// NIC receive timestamp in nanoseconds when the hardware provides one.
    pub fn handle_incoming_pck(
        &mut self,
        pkt: &[u8],
        source: HostTuple,
        local_host: HostTuple,
        rx_ts: Option<u64>,
    ) {
        if pkt.len() < HDR_SIZE {
            warn!(len = pkt.len(), "runt datagram dropped");
            return;
        }
        // A datagram longer than one packet buffer cannot have come from a
        // peer with matching protocol constants.
        if pkt.len() > BUF_CAPACITY {
            warn!(len = pkt.len(), "oversized datagram dropped");
            return;
        }
        let hdr = match Hdr::from_bytes(pkt) {
            Ok(hdr) => hdr,
            Err(e) => {
                warn!("malformed packet dropped: {e}");
                return;
            }
        };

        if hdr.is_response() {
            self.handle_response(pkt, &hdr, source, local_host, rx_ts);
        } else {
            self.handle_request(pkt, &hdr, source);
        }
    }

    /// Advance the worker clock and fire expired request timers.
    pub fn poll_timers(&mut self, now_us: u64) {
        let mut expired = std::mem::take(&mut self.expired_scratch);
        expired.clear();
        self.wheel.advance_into(now_us, &mut expired);
        for entry in expired.drain(..) {
            self.timer_triggered(entry);
        }
        self.expired_scratch = expired;
    }

    /// Number of client pairs that may still receive packets.
    pub fn pending_clients(&self) -> usize {
        self.pending_clients.len()
    }

    /// Number of server pairs whose reassembly is incomplete.
    pub fn pending_servers(&self) -> usize {
        self.pending_servers.len()
    }

    /// Free client pair slots.
    pub fn free_client_pairs(&self) -> usize {
        self.client_pairs.available()
    }

    /// Free server pair slots.
    pub fn free_server_pairs(&self) -> usize {
        self.server_pairs.available()
    }

    /// Free packet buffers.
    pub fn free_buffers(&self) -> usize {
        self.bufs.available()
    }

    /// NIC receive and transmit timestamps of a completed exchange, while
    /// its handle is still live.
    pub fn reply_timestamps(&self, handle: ClientHandle) -> Option<(Option<u64>, Option<u64>)> {
        self.client_pairs
            .get(handle.0)
            .map(|cp| (cp.rx_timestamp, cp.tx_timestamp))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn handle_response(
        &mut self,
        pkt: &[u8],
        hdr: &Hdr,
        source: HostTuple,
        local_host: HostTuple,
        rx_ts: Option<u64>,
    ) {
        let Some(slot) = self.find_pending_client(hdr.rid, &local_host) else {
            trace!(rid = hdr.rid, "response for unknown pair dropped");
            return;
        };

        let Self {
            transport,
            client_pairs,
            pending_clients,
            bufs,
            wheel,
            ..
        } = self;
        let Some(cp) = client_pairs.get_mut(slot) else {
            return;
        };

        if let Some(ts) = rx_ts {
            if cp.rx_timestamp.is_none_or(|cur| ts > cur) {
                cp.rx_timestamp = Some(ts);
            }
        }
        cp.reply.sender = source;

        match cp.state {
            ClientState::WaitAck => {
                // The ACK body is the literal "ACK"; nothing worth keeping.
                debug_assert_eq!(pkt.len(), HDR_SIZE + 3);
                let flow_id = cp.flow.map(|f| f.id);
                let mut rest = cp.request.bufs.iter().skip(1).map(|b| b.as_slice());
                if let Err(e) = transport.send(&mut rest, &source, flow_id) {
                    warn!(rid = hdr.rid, "sending request remainder failed: {e}");
                }
                cp.state = ClientState::WaitResponse;
            }
            ClientState::WaitResponse => {
                let Some(mut buf) = bufs.alloc() else {
                    warn!("packet buffer pool empty, response packet dropped");
                    return;
                };
                buf.copy_from(pkt);
                cp.reply.add_payload(buf);

                let in_order = if hdr.is_first() {
                    cp.reply_expected_packets = hdr.p_order as u16;
                    cp.reply_received_packets = 1;
                    true
                } else {
                    let expected = cp.reply_received_packets;
                    cp.reply_received_packets += 1;
                    hdr.p_order as u16 == expected
                };

                if !in_order {
                    warn!(
                        rid = hdr.rid,
                        p_order = hdr.p_order,
                        "out-of-order response fragment"
                    );
                    Self::fail_client_pair(
                        client_pairs,
                        pending_clients,
                        bufs,
                        transport,
                        wheel,
                        slot,
                    );
                    return;
                }

                if !hdr.is_last() {
                    return;
                }

                if let Some(wheel_slot) = cp.timer_slot.take() {
                    wheel.cancel_fast(wheel_slot, slot, cp.request.req_id);
                }

                if cp.reply_received_packets != cp.reply_expected_packets {
                    warn!(
                        rid = hdr.rid,
                        got = cp.reply_received_packets,
                        expected = cp.reply_expected_packets,
                        "response packet count mismatch"
                    );
                    Self::fail_client_pair(
                        client_pairs,
                        pending_clients,
                        bufs,
                        transport,
                        wheel,
                        slot,
                    );
                    return;
                }

                // The receive timestamp of the last packet may predate the
                // NIC's transmit record; fetch the transmit side lazily.
                if cp.rx_timestamp.is_some() && cp.tx_timestamp.is_none() {
                    if let Some(flow) = cp.flow {
                        cp.tx_timestamp = transport.tx_timestamp(flow.id);
                    }
                }

                // Off the pending list before delivery: a late duplicate must
                // not reach a completed pair. The slot itself lives until
                // recv_resp_done.
                pending_clients.retain(|&s| s != slot);
                if let Some(cb) = cp.ctx.success_cb.take() {
                    let slices = msg::payload_slices(&cp.reply);
                    cb(ClientHandle(slot), &slices);
                }
            }
        }
    }

    fn handle_request(&mut self, pkt: &[u8], hdr: &Hdr, source: HostTuple) {
        let rid = hdr.rid;

        let slot = if hdr.is_first() {
            if let Some(stale) = self.find_pending_server(rid, &source) {
                warn!(rid, source = %source, "duplicate first packet, evicting stale pair");
                self.pending_servers.retain(|&s| s != stale);
                Self::release_server_pair(&mut self.server_pairs, &mut self.bufs, stale);
            }

            let mut sp = ServerPair::new(source, rid);
            sp.request_expected_packets = hdr.p_order as u16;
            sp.request_received_packets = 1;
            let slot = match self.server_pairs.alloc(sp) {
                Ok(slot) => slot,
                Err(_) => {
                    warn!(rid, "server pair pool empty, request dropped");
                    return;
                }
            };

            if !hdr.is_last() {
                self.pending_servers.push(slot);
                self.send_ack(rid, &source);
            }
            slot
        } else {
            let Some(slot) = self.find_pending_server(rid, &source) else {
                warn!(rid, "fragment for unknown request dropped");
                return;
            };
            let in_order = match self.server_pairs.get_mut(slot) {
                Some(sp) => {
                    let expected = sp.request_received_packets;
                    sp.request_received_packets += 1;
                    hdr.p_order as u16 == expected
                }
                None => return,
            };
            if !in_order {
                warn!(rid, p_order = hdr.p_order, "out-of-order request fragment");
                self.pending_servers.retain(|&s| s != slot);
                Self::release_server_pair(&mut self.server_pairs, &mut self.bufs, slot);
                return;
            }
            slot
        };

        let Self {
            server_pairs,
            pending_servers,
            bufs,
            recv_cb,
            ..
        } = self;
        let Some(sp) = server_pairs.get_mut(slot) else {
            return;
        };

        let Some(mut buf) = bufs.alloc() else {
            warn!(rid, "packet buffer pool empty, request dropped");
            pending_servers.retain(|&s| s != slot);
            Self::release_server_pair(server_pairs, bufs, slot);
            return;
        };
        buf.copy_from(pkt);
        sp.request.add_payload(buf);

        if !hdr.is_last() {
            return;
        }

        if sp.request_received_packets != sp.request_expected_packets {
            warn!(
                rid,
                got = sp.request_received_packets,
                expected = sp.request_expected_packets,
                "request packet count mismatch"
            );
            pending_servers.retain(|&s| s != slot);
            Self::release_server_pair(server_pairs, bufs, slot);
            return;
        }

        // Reassembly complete: off the pending list, up to the application.
        // The slot lives until send_response.
        pending_servers.retain(|&s| s != slot);
        match recv_cb {
            Some(cb) => {
                let slices = msg::payload_slices(&sp.request);
                cb(ServerHandle(slot), &slices);
            }
            None => {
                warn!(rid, "no receive callback installed, request dropped");
                Self::release_server_pair(server_pairs, bufs, slot);
            }
        }
    }

    /// Acknowledge the head of a multi-packet request so the client releases
    /// the remainder.
    fn send_ack(&mut self, rid: u16, dest: &HostTuple) {
        let mut ack = match msg::prepare_msg(
            &mut self.bufs,
            &[b"ACK"],
            MsgType::Ack,
            Policy::FIXED_ROUTE,
            rid,
        ) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(rid, "assembling ack failed: {e}");
                return;
            }
        };

        {
            let mut pkts = ack.packets();
            if let Err(e) = self.transport.send(&mut pkts, dest, None) {
                warn!(rid, "sending ack failed: {e}");
            }
        }
        ack.recycle(&mut self.bufs);
    }

    fn timer_triggered(&mut self, entry: TimerEntry) {
        let timeout_cb = {
            let Some(cp) = self.client_pairs.get_mut(entry.pair) else {
                return;
            };
            if cp.request.req_id != entry.rid {
                // Slot reused by a newer request since the timer was armed
                return;
            }
            if cp.timer_slot.is_none() {
                return;
            }
            cp.timer_slot = None;
            cp.ctx.timeout_cb.take()
        };

        debug!(rid = entry.rid, "request timed out");
        self.pending_clients.retain(|&s| s != entry.pair);
        {
            let Self {
                client_pairs,
                bufs,
                transport,
                wheel,
                ..
            } = self;
            Self::release_client_pair(client_pairs, bufs, transport, wheel, entry.pair);
        }
        if let Some(cb) = timeout_cb {
            cb();
        }
    }

    fn find_pending_client(&self, rid: u16, local_host: &HostTuple) -> Option<usize> {
        // TODO: key on the peer ip as well; flows sharing a local port
        // collapse onto whichever pair the scan meets first
        self.pending_clients.iter().copied().find(|&slot| {
            self.client_pairs.get(slot).is_some_and(|cp| {
                cp.request.sender.port == local_host.port && cp.request.req_id == rid
            })
        })
    }

    fn find_pending_server(&self, rid: u16, sender: &HostTuple) -> Option<usize> {
        self.pending_servers.iter().copied().find(|&slot| {
            self.server_pairs
                .get(slot)
                .is_some_and(|sp| sp.request.sender == *sender && sp.request.req_id == rid)
        })
    }

    /// Invoke the error callback of a failed pair and release it.
    fn fail_client_pair(
        client_pairs: &mut Pool<ClientPair>,
        pending_clients: &mut Vec<usize>,
        bufs: &mut BufPool,
        transport: &mut T,
        wheel: &mut TimingWheel,
        slot: usize,
    ) {
        let error_cb = client_pairs
            .get_mut(slot)
            .and_then(|cp| cp.ctx.error_cb.take());
        pending_clients.retain(|&s| s != slot);
        Self::release_client_pair(client_pairs, bufs, transport, wheel, slot);
        if let Some(cb) = error_cb {
            cb(-1);
        }
    }

    /// Recycle a client pair: buffers back to the pool, timer disarmed,
    /// transport resources closed.
    fn release_client_pair(
        client_pairs: &mut Pool<ClientPair>,
        bufs: &mut BufPool,
        transport: &mut T,
        wheel: &mut TimingWheel,
        slot: usize,
    ) {
        if let Some(mut cp) = client_pairs.free(slot) {
            if let Some(wheel_slot) = cp.timer_slot.take() {
                wheel.cancel_fast(wheel_slot, slot, cp.request.req_id);
            }
            cp.request.recycle(bufs);
            cp.reply.recycle(bufs);
            if let Some(flow) = cp.flow.take() {
                transport.close_flow(flow.id);
            }
        }
    }

    /// Recycle a server pair and its request chain.
    fn release_server_pair(server_pairs: &mut Pool<ServerPair>, bufs: &mut BufPool, slot: usize) {
        if let Some(mut sp) = server_pairs.free(slot) {
            sp.request.recycle(bufs);
        }
    }
}

impl<T: Transport> Drop for Worker<T> {
    fn drop(&mut self) {
        for slot in 0..self.client_pairs.capacity() {
            if let Some(cp) = self.client_pairs.get_mut(slot) {
                if let Some(flow) = cp.flow.take() {
                    self.transport.close_flow(flow.id);
                }
            }
        }
    }
}
