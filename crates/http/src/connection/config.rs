use std::time::Duration;

/// Per-connection settings shared by the server and client sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Inactivity after which the connection is torn down.
    /// `None` disables the idle timer.
    pub idle_timeout: Option<Duration>,
    /// Initial capacity of the read buffer.
    pub read_buffer: usize,
    /// Bytes an unread inbound body may buffer before reading pauses.
    pub body_high_water: usize,
    /// Whether connections may be reused for several messages.
    pub keep_alive: bool,
    /// Messages allowed in flight on one connection before reading stops.
    pub max_pipelined: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(5)),
            read_buffer: 8 * 1024,
            body_high_water: 64 * 1024,
            keep_alive: true,
            max_pipelined: 16,
        }
    }
}

impl ConnectionConfig {
    /// Set the idle timeout; `None` or zero disables it.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    #[must_use]
    pub fn read_buffer(mut self, capacity: usize) -> Self {
        self.read_buffer = capacity;
        self
    }

    /// Set the buffered bytes that pause reading an unread body.
    #[must_use]
    pub fn body_high_water(mut self, bytes: usize) -> Self {
        self.body_high_water = bytes;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set how many messages may be in flight at once, at least one.
    #[must_use]
    pub fn max_pipelined(mut self, max: usize) -> Self {
        self.max_pipelined = max.max(1);
        self
    }
}
