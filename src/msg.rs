//! Message assembly and disassembly.
//!
//! Outbound: a payload vector is split across packet buffers, each prefixed
//! with a wire header; the first packet of a multi-packet message is kept
//! small so the ACK handshake can start early. Inbound: a reassembled chain
//! is exposed to the application as one payload slice per packet, zero-copy.

use crate::buffer::{BufPool, PktBuf};
use crate::error::{Error, Result};
use crate::packet::{
    self, Hdr, HdrFlags, MsgType, Policy, HDR_SIZE, MAX_MSG_SIZE, MAX_PACKETS, MIN_PAYLOAD_SIZE,
    PAYLOAD_SIZE,
};
use crate::transport::HostTuple;

/// A chain of packet buffers carrying one logical request or response.
#[derive(Debug)]
pub struct Msg {
    /// The chain; index 0 is the head, the final element the tail.
    pub bufs: Vec<PktBuf>,
    /// Peer the chain came from, or the local endpoint it was sent from.
    pub sender: HostTuple,
    pub req_id: u16,
}

impl Msg {
    pub(crate) fn new(req_id: u16) -> Self {
        Self {
            bufs: Vec::new(),
            sender: HostTuple::UNSPECIFIED,
            req_id,
        }
    }

    /// Append one packet to the tail of the chain.
    pub(crate) fn add_payload(&mut self, buf: PktBuf) {
        self.bufs.push(buf);
    }

    /// Return every buffer of the chain to the pool.
    pub(crate) fn recycle(&mut self, pool: &mut BufPool) {
        for buf in self.bufs.drain(..) {
            pool.free(buf);
        }
    }

    /// Iterate the serialized packets of the chain, head to tail.
    pub(crate) fn packets(&self) -> impl Iterator<Item = &[u8]> {
        self.bufs.iter().map(|b| b.as_slice())
    }
}

/// Split a payload vector into a header-prefixed packet chain.
///
/// The first packet of a multi-packet message carries at most
/// `MIN_PAYLOAD_SIZE` bytes; every other packet up to `PAYLOAD_SIZE`. After
/// the copy loop the head header is patched with the FIRST flag and the
/// total packet count, the tail with the LAST flag. A zero-length payload
/// still produces one header-only packet.
pub(crate) fn prepare_msg(
    pool: &mut BufPool,
    iov: &[&[u8]],
    msg_type: MsgType,
    policy: Policy,
    req_id: u16,
) -> Result<Msg> {
    let total: usize = iov.iter().map(|frag| frag.len()).sum();
    if total > MAX_MSG_SIZE {
        return Err(Error::MsgTooLarge {
            size: total,
            max: MAX_MSG_SIZE,
        });
    }

    let single_packet = total <= PAYLOAD_SIZE;
    let n_pkts = if single_packet {
        1
    } else {
        1 + (total - MIN_PAYLOAD_SIZE).div_ceil(PAYLOAD_SIZE)
    };
    debug_assert!(n_pkts <= MAX_PACKETS);

    let mut msg = Msg::new(req_id);
    let mut iov_idx = 0;
    let mut frag_off = 0;

    for pkt_idx in 0..n_pkts {
        let Some(mut buf) = pool.alloc() else {
            msg.recycle(pool);
            return Err(Error::BufPoolExhausted);
        };

        Hdr::new(msg_type, policy, req_id, pkt_idx as u8).write_to(buf.bytes_mut());

        let cap = if pkt_idx == 0 && !single_packet {
            MIN_PAYLOAD_SIZE
        } else {
            PAYLOAD_SIZE
        };
        let mut pos = HDR_SIZE;
        let mut room = cap;

        // Copy in order, crossing fragment boundaries as capacity fills.
        while room > 0 && iov_idx < iov.len() {
            let frag = iov[iov_idx];
            let tocopy = room.min(frag.len() - frag_off);
            buf.bytes_mut()[pos..pos + tocopy].copy_from_slice(&frag[frag_off..frag_off + tocopy]);
            pos += tocopy;
            room -= tocopy;
            frag_off += tocopy;
            if frag_off == frag.len() {
                iov_idx += 1;
                frag_off = 0;
            }
        }

        buf.set_len(pos);
        msg.add_payload(buf);
    }

    if let Some(head) = msg.bufs.first_mut() {
        packet::set_flag(head.bytes_mut(), HdrFlags::FIRST);
        packet::set_p_order(head.bytes_mut(), n_pkts as u8);
    }
    if let Some(tail) = msg.bufs.last_mut() {
        packet::set_flag(tail.bytes_mut(), HdrFlags::LAST);
    }

    Ok(msg)
}

/// Gather the payload of a reassembled chain, one slice per packet.
pub(crate) fn payload_slices(msg: &Msg) -> Vec<&[u8]> {
    debug_assert!(msg.bufs.len() <= MAX_PACKETS);
    msg.bufs.iter().map(|b| b.payload()).collect()
}
