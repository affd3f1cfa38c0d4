use std::net::SocketAddr;

/// Service settings, resolved once at startup from CLI flags and
/// environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Shared secret for the access gate. Required unless
    /// `skip_token_auth` is set; a missing secret while auth is
    /// required fails every request closed.
    pub internal_api_token: Option<String>,
    pub skip_token_auth: bool,
    /// When set, terminal runs older than this many seconds are
    /// evicted by a background sweep. Off by default.
    pub evict_terminal_after_secs: Option<u64>,
}

impl Settings {
    pub fn auth_required(&self) -> bool {
        !self.skip_token_auth
    }
}
