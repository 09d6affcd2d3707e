//! The NAT coordinator.
//!
//! One [`Service`] runs per socket. It walks the configured STUN servers until one
//! gives a usable classification, keeps the mapping alive through that server while
//! the NAT is punchable, and reports every change of NAT type or external address to
//! its [`Subscriber`].
//!
//! ```text
//! Idle -> Discovering(server) -> KeepAlive(server)  (punchable)
//!                             -> retry wait         (not punchable)
//! ```
//!
//! A pass over the server list ends early only when the NAT is not punchable; after
//! a pass the service waits [`STUN_RETRY_INTERVAL`] before starting again. Shutdown
//! is observed at every await point and leaves the published state cleared.

use crate::config::StunOptions;
use crate::error::{Error, Result};
use crate::subscriber::Subscriber;
use async_shutdown::ShutdownManager;
use natkeep_core::nat::{are_different, Host, NatType};
use natkeep_core::stun::{Discovery, StunClient};
use natkeep_core::write_tracker::WriteTracker;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use status::NatStatus;

mod keepalive;
mod status;
#[cfg(test)]
mod tests;

pub(crate) const INITIAL_DELAY: Duration = Duration::from_millis(1);
pub(crate) const DISABLED_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between passes over the server list
pub const STUN_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct Service<C> {
    name: String,
    options: Arc<dyn StunOptions>,
    subscriber: Arc<dyn Subscriber>,
    client: C,
    write_tracker: Option<WriteTracker>,
    status: NatStatus,

    nat_type: NatType,
    addr: Option<Host>,
}

impl<C: StunClient> Service<C> {
    /// `local_addr` is the address of the socket `client` sends through; it only
    /// names the service in logs.
    pub fn new(
        options: Arc<dyn StunOptions>,
        subscriber: Arc<dyn Subscriber>,
        client: C,
        local_addr: Option<SocketAddr>,
    ) -> Service<C> {
        let name = match local_addr {
            Some(addr) => format!("Stun@udp://{addr}"),
            None => "Stun@unknown".to_string(),
        };
        Self {
            name,
            options,
            subscriber,
            client,
            write_tracker: None,
            status: NatStatus::default(),
            nat_type: NatType::Unknown,
            addr: None,
        }
    }
    /// Let writes on the shared socket postpone keep-alives.
    pub fn with_write_tracker(mut self, write_tracker: WriteTracker) -> Self {
        self.write_tracker.replace(write_tracker);
        self
    }
    pub fn status(&self) -> NatStatus {
        self.status.clone()
    }

    /// Run until `shutdown` is triggered, then clear the published state.
    pub async fn serve(mut self, shutdown: ShutdownManager<()>) {
        if let Err(e) = self.run(&shutdown).await {
            log::debug!("{} stopping: {e}", self.name);
        }
        self.set_nat_type(NatType::Unknown);
        self.set_external_address(None, "");
    }

    async fn run(&mut self, shutdown: &ShutdownManager<()>) -> Result<()> {
        let mut wait = INITIAL_DELAY;
        'serve: loop {
            sleep(shutdown, wait).await?;

            if self.options.is_stun_disabled() {
                self.reset();
                wait = DISABLED_POLL_INTERVAL;
                continue;
            }

            log::debug!("Starting stun for {}", self.name);

            for server in self.options.stun_servers() {
                // Blocks for as long as the keep-alive through this server holds up.
                match self.run_stun_for_server(shutdown, &server).await {
                    Err(Error::Shutdown) => return Err(Error::Shutdown),
                    Err(Error::NotPunchable(_)) => break,
                    Err(e) => {
                        log::debug!("{} stun via {server} ended: {e}", self.name);
                    }
                    Ok(()) => {}
                }

                if shutdown.is_shutdown_triggered() {
                    return Err(Error::Shutdown);
                }

                if self.options.is_stun_disabled() {
                    log::info!("{} STUN disabled", self.name);
                    self.reset();
                    wait = Duration::ZERO;
                    continue 'serve;
                }
            }

            // Every server failed or the NAT is not punchable.
            wait = STUN_RETRY_INTERVAL;
        }
    }

    async fn run_stun_for_server(
        &mut self,
        shutdown: &ShutdownManager<()>,
        server: &str,
    ) -> Result<()> {
        log::debug!("Running stun for {} via {server}", self.name);

        // One address per server for the whole discovery and keep-alive.
        let addr = match cancellable(shutdown, resolve(server)).await? {
            Ok(addr) => addr,
            Err(e) => {
                log::debug!("{} stun addr resolution on {server}: {e}", self.name);
                return Err(e);
            }
        };
        self.client.set_server_addr(addr);

        let Discovery { nat_type, external } =
            match cancellable(shutdown, self.client.discover()).await? {
                Ok(discovery) => discovery,
                Err(e) => {
                    log::debug!("{} stun discovery on {server}: {e:?}", self.name);
                    return Err(e.into());
                }
            };
        let Some(external) = external else {
            log::debug!(
                "{} stun discovery on {server} resulted in no address",
                self.name
            );
            return Err(Error::NoAddress(server.to_string()));
        };

        if !nat_type.is_reliable() {
            log::debug!(
                "{} stun discovery on {server} resolved to {nat_type}",
                self.name
            );
            return Err(Error::BadResult {
                server: server.to_string(),
                nat_type,
            });
        }

        self.set_nat_type(nat_type);
        log::debug!("{} detected NAT type: {nat_type} via {server}", self.name);
        self.set_external_address(Some(external.clone()), server);

        if !nat_type.is_punchable() {
            log::debug!("{} cannot punch {nat_type}, skipping", self.name);
            return Err(Error::NotPunchable(nat_type));
        }

        self.stun_keepalive(shutdown, server, Some(external)).await
    }

    fn reset(&mut self) {
        self.set_nat_type(NatType::Unknown);
        self.set_external_address(None, "");
    }

    fn set_nat_type(&mut self, nat_type: NatType) {
        let changed = nat_type != self.nat_type;
        self.nat_type = nat_type;
        self.status.store_nat_type(nat_type);
        if changed {
            log::info!("{} NAT type changed to {nat_type}", self.name);
            self.subscriber.on_nat_type_changed(nat_type);
        }
    }

    fn set_external_address(&mut self, addr: Option<Host>, via: &str) {
        let changed = are_different(self.addr.as_ref(), addr.as_ref());
        self.addr = addr;
        self.status.store_external_address(self.addr.clone());
        if changed {
            match self.addr.as_ref() {
                Some(addr) => {
                    log::info!("{} resolved external address {addr} (via {via})", self.name)
                }
                None => log::debug!("{} external address cleared", self.name),
            }
            self.subscriber
                .on_external_address_changed(self.addr.as_ref(), via);
        }
    }
}

impl<C> fmt::Display for Service<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Spawn [`Service::serve`] on the current tokio runtime.
pub fn start_task<C: StunClient + 'static>(
    service: Service<C>,
    shutdown: ShutdownManager<()>,
) -> JoinHandle<()> {
    tokio::spawn(service.serve(shutdown))
}

async fn resolve(server: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(server)
        .await
        .map_err(|source| Error::Resolve {
            server: server.to_string(),
            source,
        })?;
    addrs
        .next()
        .ok_or_else(|| Error::Unresolved(server.to_string()))
}

async fn cancellable<F: Future>(shutdown: &ShutdownManager<()>, future: F) -> Result<F::Output> {
    shutdown
        .wrap_cancel(future)
        .await
        .map_err(|()| Error::Shutdown)
}

async fn sleep(shutdown: &ShutdownManager<()>, duration: Duration) -> Result<()> {
    cancellable(shutdown, tokio::time::sleep(duration)).await
}
