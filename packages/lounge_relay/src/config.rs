use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure, with CLI flags layered on top by main:
//
//   config.toml:     [server]
//                    port = 3001
//
//   env var:         LOUNGE_SERVER__PORT=3001   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Listener tunables (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// The one origin allowed to open channels. Unset disables the check
    /// (useful for tests and CLI clients that send no Origin header).
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: Option<String>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

/// Fan-out tunables (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// Broadcast backlog per room before slow connections start lagging.
    #[serde(default = "default_room_channel_capacity")]
    pub room_channel_capacity: usize,
    /// Outbound queue per connection.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            room_channel_capacity: default_room_channel_capacity(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_allowed_origin() -> Option<String> {
    Some("http://localhost:3000".to_string())
}
fn default_room_channel_capacity() -> usize {
    256
}
fn default_outbound_buffer() -> usize {
    100
}

/// Build a figment that layers: defaults → config.toml → LOUNGE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `LOUNGE_SERVER__PORT=4001`  →  `server.port = 4001`
///   `LOUNGE_RELAY__OUTBOUND_BUFFER=200`  →  `relay.outbound_buffer = 200`
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("LOUNGE_").split("__"))
}

/// Resolved relay configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origin: Option<String>,
    pub room_channel_capacity: usize,
    pub outbound_buffer: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            allowed_origin: fc.server.allowed_origin.clone(),
            room_channel_capacity: fc.relay.room_channel_capacity,
            outbound_buffer: fc.relay.outbound_buffer,
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
