use super::{cancellable, sleep, Service};
use crate::error::{Error, Result};
use async_shutdown::ShutdownManager;
use natkeep_core::nat::{are_different, Host};
use natkeep_core::stun::StunClient;
use std::time::Duration;
use tokio::time::Instant;

impl<C: StunClient> Service<C> {
    /// Keep the mapping learned from `server` alive until something goes wrong.
    ///
    /// The interval starts at the configured start value and is halved whenever the
    /// external port moves under the same IP. Once halving goes below the configured
    /// minimum this gives up.
    ///
    /// Always returns an error; the caller decides whether to try the next server.
    pub(super) async fn stun_keepalive(
        &mut self,
        shutdown: &ShutdownManager<()>,
        server: &str,
        mut external: Option<Host>,
    ) -> Result<()> {
        let mut next_sleep = Duration::from_secs(self.options.stun_keepalive_start_s());

        log::debug!(
            "{} starting stun keepalive via {server}, next sleep {next_sleep:?}",
            self.name
        );

        let mut our_last_write: Option<Instant> = None;
        loop {
            if are_different(self.addr.as_ref(), external.as_ref()) {
                if let (Some(old), Some(new)) = (self.addr.as_ref(), external.as_ref()) {
                    if old.ip() == new.ip() {
                        next_sleep /= 2;
                        log::debug!(
                            "{} stun port change ({old} to {new}), next sleep {next_sleep:?}",
                            self.name
                        );
                    }
                }

                self.set_external_address(external.clone(), server);

                let min_sleep = self.min_sleep();
                if next_sleep < min_sleep {
                    log::debug!(
                        "{} keepalive aborting, sleep below min: {next_sleep:?} < {min_sleep:?}",
                        self.name
                    );
                    return Err(Error::KeepaliveTooLow(min_sleep));
                }
            }

            let min_sleep = self.min_sleep();
            if next_sleep < min_sleep {
                next_sleep = min_sleep;
            }

            let sleep_for = self.time_until_keepalive(our_last_write, next_sleep);
            log::debug!("{} stun sleeping for {sleep_for:?}", self.name);
            if let Err(e) = sleep(shutdown, sleep_for).await {
                log::debug!("{} stopping, aborting stun", self.name);
                return Err(e);
            }

            loop {
                if self.options.is_stun_disabled() {
                    log::debug!("{} disabled, aborting stun", self.name);
                    return Err(Error::Disabled);
                }
                // Other traffic on the socket refreshed the mapping while we slept.
                let Some(wait) = self.deferred_by_traffic(next_sleep) else {
                    break;
                };
                log::debug!("{} socket busy, postponing keepalive by {wait:?}", self.name);
                sleep(shutdown, wait).await?;
            }

            log::debug!("{} stun keepalive", self.name);

            external = match cancellable(shutdown, self.client.keepalive()).await? {
                Ok(external) => external,
                Err(e) => {
                    log::debug!("{} stun keepalive on {server}: {e:?}", self.name);
                    return Err(e.into());
                }
            };
            our_last_write = Some(Instant::now());
        }
    }

    fn min_sleep(&self) -> Duration {
        Duration::from_secs(self.options.stun_keepalive_min_s())
    }

    /// Fire `interval` after the latest write, or a full `interval` from now if that
    /// moment has already passed.
    pub(super) fn time_until_keepalive(
        &self,
        our_last_write: Option<Instant>,
        interval: Duration,
    ) -> Duration {
        let tracked = self.write_tracker.as_ref().and_then(|v| v.last_write());
        let last_write = match (our_last_write, tracked) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        match last_write.and_then(|v| v.checked_add(interval)) {
            Some(deadline) => {
                let until = deadline.saturating_duration_since(Instant::now());
                if until.is_zero() {
                    interval
                } else {
                    until
                }
            }
            None => interval,
        }
    }

    pub(super) fn deferred_by_traffic(&self, interval: Duration) -> Option<Duration> {
        let last_write = self.write_tracker.as_ref()?.last_write()?;
        let until = last_write
            .checked_add(interval)?
            .saturating_duration_since(Instant::now());
        (!until.is_zero()).then_some(until)
    }
}
