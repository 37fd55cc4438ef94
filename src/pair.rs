//! Request/response pair records and the fixed object pools they live in.
//!
//! A client pair tracks one outbound request from `send_request` until the
//! application releases the reply; a server pair tracks one inbound request
//! from its first packet until the response is sent. Pools are fixed-size;
//! slot occupancy doubles as the liveness flag for handles and timers.

use crate::msg::Msg;
use crate::packet::Policy;
use crate::transport::{Flow, HostTuple};

/// Handle to a live client pair, passed to the success callback and back to
/// `recv_resp_done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub(crate) usize);

/// Handle to a live server pair, passed to the receive callback and back to
/// `send_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(pub(crate) usize);

/// Client pair state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Head packet sent; waiting for the server's ACK before sending the
    /// remainder of a multi-packet request.
    WaitAck,
    /// Waiting for response packets.
    WaitResponse,
}

/// Callback invoked with the reassembled reply, one payload slice per packet.
pub type SuccessCb = Box<dyn FnOnce(ClientHandle, &[&[u8]])>;
/// Callback invoked when reassembly of the reply fails.
pub type ErrorCb = Box<dyn FnOnce(i32)>;
/// Callback invoked when the request timer fires before the reply completes.
pub type TimeoutCb = Box<dyn FnOnce()>;

/// Application context for one outbound request.
///
/// Each callback fires at most once; exactly one of success, error, or
/// timeout completes the request. Application state travels in the closure
/// captures.
pub struct ClientCtx {
    pub destination: HostTuple,
    pub routing_policy: Policy,
    /// Timeout armed when the request is sent. `None` leaves the request
    /// without a timer.
    pub timeout_us: Option<u64>,
    pub(crate) success_cb: Option<SuccessCb>,
    pub(crate) error_cb: Option<ErrorCb>,
    pub(crate) timeout_cb: Option<TimeoutCb>,
}

impl ClientCtx {
    pub fn new(destination: HostTuple, routing_policy: Policy) -> Self {
        Self {
            destination,
            routing_policy,
            timeout_us: None,
            success_cb: None,
            error_cb: None,
            timeout_cb: None,
        }
    }

    /// Arm a timeout of `us` microseconds when the request is sent.
    pub fn timeout_us(mut self, us: u64) -> Self {
        self.timeout_us = Some(us);
        self
    }

    /// Set the callback for a completed reply.
    pub fn on_success(mut self, f: impl FnOnce(ClientHandle, &[&[u8]]) + 'static) -> Self {
        self.success_cb = Some(Box::new(f));
        self
    }

    /// Set the callback for a failed reply.
    pub fn on_error(mut self, f: impl FnOnce(i32) + 'static) -> Self {
        self.error_cb = Some(Box::new(f));
        self
    }

    /// Set the callback for a timed-out request.
    pub fn on_timeout(mut self, f: impl FnOnce() + 'static) -> Self {
        self.timeout_cb = Some(Box::new(f));
        self
    }
}

/// State of one outbound request.
pub(crate) struct ClientPair {
    pub request: Msg,
    pub reply: Msg,
    pub state: ClientState,
    pub reply_expected_packets: u16,
    pub reply_received_packets: u16,
    pub ctx: ClientCtx,
    /// Transport resources for this request; closed when the pair is freed.
    pub flow: Option<Flow>,
    /// Wheel slot of the armed timer, `None` once disarmed or fired.
    pub timer_slot: Option<usize>,
    pub rx_timestamp: Option<u64>,
    pub tx_timestamp: Option<u64>,
}

impl ClientPair {
    pub fn new(ctx: ClientCtx) -> Self {
        Self {
            request: Msg::new(0),
            reply: Msg::new(0),
            state: ClientState::WaitResponse,
            reply_expected_packets: 0,
            reply_received_packets: 0,
            ctx,
            flow: None,
            timer_slot: None,
            rx_timestamp: None,
            tx_timestamp: None,
        }
    }
}

/// State of one inbound request.
pub(crate) struct ServerPair {
    pub request: Msg,
    pub request_expected_packets: u16,
    pub request_received_packets: u16,
}

impl ServerPair {
    pub fn new(sender: HostTuple, req_id: u16) -> Self {
        let mut request = Msg::new(req_id);
        request.sender = sender;
        Self {
            request,
            request_expected_packets: 0,
            request_received_packets: 0,
        }
    }
}

/// Fixed-capacity object pool with a free-index stack.
///
/// `alloc` hands back the value on failure so the caller can roll back.
pub(crate) struct Pool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn alloc(&mut self, value: T) -> Result<usize, T> {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(value);
                Ok(idx)
            }
            None => Err(value),
        }
    }

    /// Take the value out of a slot, returning it to the free stack.
    pub fn free(&mut self, idx: usize) -> Option<T> {
        let value = self.slots.get_mut(idx)?.take();
        if value.is_some() {
            self.free.push(idx);
        }
        value
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
