use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 6667;

#[derive(Serialize, Deserialize, Clone)]
pub struct Server {
    /// Used as the source prefix on generated messages.
    pub server_name: String,
    pub listen_address: String,
    pub listen_port: u16,
    /// Listen backlog hint. The OS default applies where the runtime
    /// cannot pass it through.
    pub backlog: u32,
    /// Send-retry budget per queued line.
    pub max_retries: u32,
}

/// Outbound server link established at startup.
#[derive(Serialize, Deserialize, Clone)]
pub struct PeerLink {
    pub host: String,
    pub port: u16,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Tick {
    /// Sleep between reactor ticks, in milliseconds.
    pub tick_ms: u64,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct IrcConfig {
    pub server: Server,
    #[serde(default)]
    pub peer_links: Vec<PeerLink>,
    pub tick: Tick,
}

impl Default for IrcConfig {
    fn default() -> IrcConfig {
        IrcConfig {
            server: Server {
                server_name: "ironircd".to_string(),
                listen_address: "127.0.0.1".to_string(),
                listen_port: DEFAULT_PORT,
                backlog: 20,
                max_retries: 3,
            },
            peer_links: Vec::new(),
            tick: Tick { tick_ms: 10 },
        }
    }
}

impl IrcConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> IrcConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }
}
