//! Configuration types for the R2P2 engine.

/// Per-worker engine configuration.
///
/// Pools are fixed-size: the application sizes them for its peak in-flight
/// concurrency. Protocol constants (payload sizes, header layout) live in
/// [`crate::packet`] because they must match between peers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client pair pool capacity (in-flight outbound requests).
    /// Default: 1024
    pub client_pairs: usize,
    /// Server pair pool capacity (in-flight inbound requests).
    /// Default: 1024
    pub server_pairs: usize,
    /// Packet buffer pool capacity.
    /// Default: 4096
    pub packet_buffers: usize,
    /// Number of timing wheel slots.
    /// Default: 256
    pub wheel_slots: usize,
    /// Duration of one timing wheel slot in microseconds.
    /// Default: 100
    pub wheel_slot_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_pairs: 1024,
            server_pairs: 1024,
            packet_buffers: 4096,
            wheel_slots: 256,
            wheel_slot_us: 100,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client pair pool capacity.
    pub fn with_client_pairs(mut self, client_pairs: usize) -> Self {
        self.client_pairs = client_pairs;
        self
    }

    /// Set the server pair pool capacity.
    pub fn with_server_pairs(mut self, server_pairs: usize) -> Self {
        self.server_pairs = server_pairs;
        self
    }

    /// Set the packet buffer pool capacity.
    pub fn with_packet_buffers(mut self, packet_buffers: usize) -> Self {
        self.packet_buffers = packet_buffers;
        self
    }

    /// Set the timing wheel geometry.
    pub fn with_wheel(mut self, slots: usize, slot_us: u64) -> Self {
        self.wheel_slots = slots;
        self.wheel_slot_us = slot_us;
        self
    }
}
