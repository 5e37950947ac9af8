//! Server configuration for `QVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `QVAULT_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// AC servers eligible to endorse server-scoped operations, in
    /// declaration order.
    pub ac_servers: Vec<String>,
    /// Default endorsement threshold. `None` requires every configured
    /// server.
    pub ac_required: Option<usize>,
    /// Bootstrapped verification keys as `(server, base64url public key)`
    /// pairs. Invalid keys are rejected at verification time, not here.
    pub ac_keys: Vec<(String, String)>,
    /// Bound on a single token verification, covering key resolution.
    pub verify_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `QVAULT_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8311`)
    /// - `QVAULT_LOG_LEVEL` — log filter (default: `info`)
    /// - `QVAULT_AC_SERVERS` — comma-separated AC server identifiers
    /// - `QVAULT_AC_REQUIRED` — endorsement threshold (default: all servers)
    /// - `QVAULT_AC_KEYS` — comma-separated `server=base64url-key` pairs
    /// - `QVAULT_VERIFY_TIMEOUT_MS` — per-token verification bound (default: `5000`)
    #[must_use]
    pub fn from_env() -> Self {
        // Priority: QVAULT_BIND_ADDR > PORT > default 127.0.0.1:8311
        let bind_addr = if let Ok(addr) = std::env::var("QVAULT_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8311)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8311);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8311))
        };

        let log_level = std::env::var("QVAULT_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let ac_servers = std::env::var("QVAULT_AC_SERVERS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let ac_required = std::env::var("QVAULT_AC_REQUIRED")
            .ok()
            .and_then(|v| v.parse().ok());

        let ac_keys = std::env::var("QVAULT_AC_KEYS")
            .map(|v| {
                v.split(',')
                    .filter_map(|pair| {
                        let (server, key) = pair.trim().split_once('=')?;
                        if server.is_empty() || key.is_empty() {
                            return None;
                        }
                        Some((server.to_owned(), key.to_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let verify_timeout = std::env::var("QVAULT_VERIFY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(5), Duration::from_millis);

        Self {
            bind_addr,
            log_level,
            ac_servers,
            ac_required,
            ac_keys,
            verify_timeout,
        }
    }
}
