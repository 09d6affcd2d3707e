use anyhow::anyhow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

pub const DEFAULT_STUN_PORT: u16 = 3478;
pub(crate) const DEFAULT_KEEPALIVE_START_S: u64 = 180;
pub(crate) const DEFAULT_KEEPALIVE_MIN_S: u64 = 20;

/// Placeholder entry in `stun_servers` that expands to the built-in list.
pub const DEFAULT_SERVERS_KEYWORD: &str = "default";

pub const DEFAULT_PRIMARY_STUN_SERVERS: &[&str] = &["stun.syncthing.net:3478"];
pub const DEFAULT_SECONDARY_STUN_SERVERS: &[&str] = &[
    "stun.callwithus.com:3478",
    "stun.counterpath.com:3478",
    "stun.counterpath.net:3478",
    "stun.ekiga.net:3478",
    "stun.hitv.com:3478",
    "stun.ideasip.com:3478",
    "stun.internetcalls.com:3478",
    "stun.miwifi.com:3478",
    "stun.schlund.de:3478",
    "stun.sipgate.net:10000",
    "stun.sipgate.net:3478",
    "stun.voip.aebc.com:3478",
    "stun.voiparound.com:3478",
    "stun.voipbuster.com:3478",
    "stun.voipstunt.com:3478",
    "stun.xten.com:3478",
];

/// Live view of the STUN settings.
///
/// The service calls these on every decision instead of caching them, so an
/// implementation backed by mutable configuration takes effect without a restart.
pub trait StunOptions: Send + Sync {
    fn is_stun_disabled(&self) -> bool;
    /// Servers to try, in order, each as `host:port`.
    fn stun_servers(&self) -> Vec<String>;
    fn stun_keepalive_start_s(&self) -> u64;
    fn stun_keepalive_min_s(&self) -> u64;
}

impl<T: StunOptions + ?Sized> StunOptions for Arc<T> {
    fn is_stun_disabled(&self) -> bool {
        (**self).is_stun_disabled()
    }
    fn stun_servers(&self) -> Vec<String> {
        (**self).stun_servers()
    }
    fn stun_keepalive_start_s(&self) -> u64 {
        (**self).stun_keepalive_start_s()
    }
    fn stun_keepalive_min_s(&self) -> u64 {
        (**self).stun_keepalive_min_s()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StunConfig {
    pub nat_enabled: bool,
    pub stun_servers: Vec<String>,
    pub stun_keepalive_start_s: u64,
    pub stun_keepalive_min_s: u64,
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            nat_enabled: true,
            stun_servers: vec![DEFAULT_SERVERS_KEYWORD.to_string()],
            stun_keepalive_start_s: DEFAULT_KEEPALIVE_START_S,
            stun_keepalive_min_s: DEFAULT_KEEPALIVE_MIN_S,
        }
    }
}

impl StunConfig {
    pub fn empty() -> Self {
        Self::default()
    }
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_stun_disabled() {
            return Ok(());
        }
        if self.stun_keepalive_start_s < self.stun_keepalive_min_s {
            return Err(anyhow!(
                "stun_keepalive_start_s ({}) cannot be below stun_keepalive_min_s ({})",
                self.stun_keepalive_start_s,
                self.stun_keepalive_min_s
            ));
        }
        if self.stun_servers().is_empty() {
            return Err(anyhow!("stun_servers cannot be empty"));
        }
        Ok(())
    }
    pub fn set_nat_enabled(mut self, nat_enabled: bool) -> Self {
        self.nat_enabled = nat_enabled;
        self
    }
    pub fn set_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }
    pub fn set_stun_keepalive_start_s(mut self, stun_keepalive_start_s: u64) -> Self {
        self.stun_keepalive_start_s = stun_keepalive_start_s;
        self
    }
    pub fn set_stun_keepalive_min_s(mut self, stun_keepalive_min_s: u64) -> Self {
        self.stun_keepalive_min_s = stun_keepalive_min_s;
        self
    }
}

impl StunOptions for StunConfig {
    /// A zero keep-alive interval means "off", never a tight loop.
    fn is_stun_disabled(&self) -> bool {
        !self.nat_enabled || self.stun_keepalive_start_s < 1 || self.stun_keepalive_min_s < 1
    }
    fn stun_servers(&self) -> Vec<String> {
        let mut servers = Vec::with_capacity(self.stun_servers.len());
        for server in &self.stun_servers {
            let server = server.trim();
            if server.is_empty() {
                continue;
            }
            if server == DEFAULT_SERVERS_KEYWORD {
                servers.extend(
                    DEFAULT_PRIMARY_STUN_SERVERS
                        .iter()
                        .chain(DEFAULT_SECONDARY_STUN_SERVERS)
                        .map(|v| v.to_string()),
                );
                continue;
            }
            servers.push(with_default_port(server));
        }
        servers
    }
    fn stun_keepalive_start_s(&self) -> u64 {
        self.stun_keepalive_start_s
    }
    fn stun_keepalive_min_s(&self) -> u64 {
        self.stun_keepalive_min_s
    }
}

fn with_default_port(server: &str) -> String {
    if server.parse::<SocketAddr>().is_ok() {
        return server.to_string();
    }
    if let Ok(ip) = server.parse::<Ipv6Addr>() {
        return format!("[{ip}]:{DEFAULT_STUN_PORT}");
    }
    if server.ends_with(']') || !server.contains(':') {
        return format!("{server}:{DEFAULT_STUN_PORT}");
    }
    server.to_string()
}

/// A [`StunConfig`] that can be changed while a service is reading it.
#[derive(Clone, Default)]
pub struct SharedStunConfig {
    inner: Arc<RwLock<StunConfig>>,
}

impl SharedStunConfig {
    pub fn new(config: StunConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }
    pub fn load(&self) -> StunConfig {
        self.inner.read().clone()
    }
    pub fn update<F: FnOnce(&mut StunConfig)>(&self, f: F) {
        f(&mut *self.inner.write())
    }
    pub fn replace(&self, config: StunConfig) -> StunConfig {
        std::mem::replace(&mut *self.inner.write(), config)
    }
}

impl From<StunConfig> for SharedStunConfig {
    fn from(value: StunConfig) -> Self {
        SharedStunConfig::new(value)
    }
}

impl StunOptions for SharedStunConfig {
    fn is_stun_disabled(&self) -> bool {
        self.inner.read().is_stun_disabled()
    }
    fn stun_servers(&self) -> Vec<String> {
        self.inner.read().stun_servers()
    }
    fn stun_keepalive_start_s(&self) -> u64 {
        self.inner.read().stun_keepalive_start_s
    }
    fn stun_keepalive_min_s(&self) -> u64 {
        self.inner.read().stun_keepalive_min_s
    }
}
