//! Hub configuration

/// Default capacity of each subscriber's outbound buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default capacity of the control loop's command queue
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Broadcast hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages buffered per subscriber before it is considered too slow
    /// and evicted
    pub subscriber_buffer: usize,

    /// Register/unregister/send requests queued ahead of the control loop
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl HubConfig {
    /// Set the per-subscriber buffer capacity (minimum 1)
    pub fn subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity.max(1);
        self
    }

    /// Set the command queue capacity (minimum 1)
    pub fn command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }
}
