//! Server configuration from environment variables.

use std::net::SocketAddr;

/// Runtime configuration.
///
/// Environment variables:
/// - `QUERYSYNC_BIND`: socket address to listen on (default: "0.0.0.0:8080")
/// - `QUERYSYNC_SERVE_CACHED`: serve the cached result on duplicate subscribes
///   instead of re-executing (default: "true"; "false" restores the legacy
///   re-execute behavior)
/// - `QUERYSYNC_REQUIRE_TOKEN`: reject connections without a token
///   (default: "false")
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub serve_cached: bool,
    pub require_token: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let bind = std::env::var("QUERYSYNC_BIND")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        Config {
            bind,
            serve_cached: env_flag("QUERYSYNC_SERVE_CACHED", true),
            require_token: env_flag("QUERYSYNC_REQUIRE_TOKEN", false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            serve_cached: true,
            require_token: false,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
