//! Init-time tuning constants for the sockets core.
//!
//! Configuration is a plain struct, not a parsed file: the core has no
//! opinion on where values come from, it only needs them fixed before
//! [`crate::sockets::Sockets::initialize`] is called.

/// The hard ceiling enforced by [`crate::uri::split_uri`] regardless of
/// [`SocketsConfig::uri_max_len`].
pub const URI_HARD_MAX_LEN: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct SocketsConfig {
    /// Size of the slot table, including the reserved invalid index 0.
    pub max_sockets: usize,
    /// Per-listener cap on simultaneously alive accepted connections.
    pub max_socket_connections: usize,
    /// Lower bound on a single allocated read buffer.
    pub min_read_buffer: usize,
    /// Upper bound on a single allocated read buffer (and on one `read`).
    pub max_buffer: usize,
    /// Soft URI length limit; never looser than [`URI_HARD_MAX_LEN`].
    pub uri_max_len: usize,
}

impl Default for SocketsConfig {
    fn default() -> SocketsConfig {
        SocketsConfig {
            max_sockets: 128,
            max_socket_connections: 32,
            min_read_buffer: 1024,
            max_buffer: 64 * 1024,
            uri_max_len: URI_HARD_MAX_LEN,
        }
    }
}

impl SocketsConfig {
    /// The effective URI length limit passed to [`crate::uri::split_uri_with_max_len`]:
    /// never looser than [`URI_HARD_MAX_LEN`].
    pub fn effective_uri_max_len(&self) -> usize {
        self.uri_max_len.min(URI_HARD_MAX_LEN)
    }
}
