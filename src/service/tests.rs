use super::*;
use crate::config::{SharedStunConfig, StunConfig};
use async_trait::async_trait;
use natkeep_core::error::Error as StunError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

const S1: &str = "127.0.0.1:1001";
const S2: &str = "127.0.0.1:1002";

enum Reply<T> {
    Ok(T),
    Fail,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Call {
    Discover(SocketAddr, Instant),
    Keepalive(SocketAddr, Instant),
}

impl Call {
    fn at(&self) -> Instant {
        match self {
            Call::Discover(_, at) | Call::Keepalive(_, at) => *at,
        }
    }
}

#[derive(Default)]
struct Script {
    discover: HashMap<SocketAddr, VecDeque<Reply<Discovery>>>,
    keepalive: VecDeque<Reply<Option<Host>>>,
}

/// Replays scripted answers. Unscripted discoveries fail, unscripted keep-alives hang.
struct FakeClient {
    server: Option<SocketAddr>,
    script: Arc<Mutex<Script>>,
    calls: UnboundedSender<Call>,
}

impl FakeClient {
    fn new() -> (FakeClient, UnboundedReceiver<Call>) {
        let (calls, receiver) = unbounded_channel();
        let client = FakeClient {
            server: None,
            script: Default::default(),
            calls,
        };
        (client, receiver)
    }
    fn discover(self, server: &str, reply: Reply<Discovery>) -> Self {
        self.script
            .lock()
            .discover
            .entry(server.parse().unwrap())
            .or_default()
            .push_back(reply);
        self
    }
    fn keepalive(self, reply: Reply<Option<Host>>) -> Self {
        self.script.lock().keepalive.push_back(reply);
        self
    }
}

#[async_trait]
impl StunClient for FakeClient {
    fn set_server_addr(&mut self, addr: SocketAddr) {
        self.server.replace(addr);
    }
    async fn discover(&mut self) -> natkeep_core::error::Result<Discovery> {
        let server = self.server.unwrap();
        _ = self.calls.send(Call::Discover(server, Instant::now()));
        let reply = self
            .script
            .lock()
            .discover
            .get_mut(&server)
            .and_then(|v| v.pop_front())
            .unwrap_or(Reply::Fail);
        match reply {
            Reply::Ok(discovery) => Ok(discovery),
            Reply::Fail => Err(StunError::Timeout),
            Reply::Hang => std::future::pending().await,
        }
    }
    async fn keepalive(&mut self) -> natkeep_core::error::Result<Option<Host>> {
        let server = self.server.unwrap();
        _ = self.calls.send(Call::Keepalive(server, Instant::now()));
        let reply = self.script.lock().keepalive.pop_front().unwrap_or(Reply::Hang);
        match reply {
            Reply::Ok(external) => Ok(external),
            Reply::Fail => Err(StunError::Timeout),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    NatType(NatType),
    Address(Option<Host>, String),
}

struct Recorder(UnboundedSender<Event>);

impl Subscriber for Recorder {
    fn on_nat_type_changed(&self, nat_type: NatType) {
        _ = self.0.send(Event::NatType(nat_type));
    }
    fn on_external_address_changed(&self, address: Option<&Host>, via: &str) {
        _ = self.0.send(Event::Address(address.cloned(), via.to_string()));
    }
}

fn recorder() -> (Arc<Recorder>, UnboundedReceiver<Event>) {
    let (sender, receiver) = unbounded_channel();
    (Arc::new(Recorder(sender)), receiver)
}

fn config(servers: &[&str]) -> StunConfig {
    StunConfig::empty()
        .set_stun_servers(servers.iter().map(|v| v.to_string()).collect())
        .set_stun_keepalive_start_s(8)
        .set_stun_keepalive_min_s(3)
}

fn host(port: u16) -> Host {
    Host::new(SocketAddr::new([203, 0, 113, 5].into(), port))
}

fn addr(server: &str) -> SocketAddr {
    server.parse().unwrap()
}

fn found(nat_type: NatType, port: u16) -> Reply<Discovery> {
    Reply::Ok(Discovery::new(nat_type, Some(host(port))))
}

fn address(port: u16, via: &str) -> Event {
    Event::Address(Some(host(port)), via.to_string())
}

async fn stop(shutdown: &ShutdownManager<()>, handle: JoinHandle<()>) {
    _ = shutdown.trigger_shutdown(());
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fails_over_to_next_server_and_keeps_alive() {
    _ = env_logger::builder().is_test(true).try_init();
    let (client, mut calls) = FakeClient::new();
    let client = client
        .discover(S1, found(NatType::Blocked, 5000))
        .discover(S2, found(NatType::Full, 5000))
        .keepalive(Reply::Ok(Some(host(5000))));
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1, S2])), subscriber, client, None);
    let status = service.status();
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S2));
    assert_eq!(status.nat_type(), NatType::Full);
    assert_eq!(status.external_address(), Some(host(5000)));

    let first = calls.recv().await.unwrap();
    assert!(matches!(first, Call::Discover(server, _) if server == addr(S1)));
    let discover = calls.recv().await.unwrap();
    assert!(matches!(discover, Call::Discover(server, _) if server == addr(S2)));
    let keepalive = calls.recv().await.unwrap();
    assert!(matches!(keepalive, Call::Keepalive(server, _) if server == addr(S2)));
    assert_eq!(keepalive.at() - discover.at(), Duration::from_secs(8));
    let next = calls.recv().await.unwrap();
    assert!(matches!(next, Call::Keepalive(..)));
    assert_eq!(next.at() - keepalive.at(), Duration::from_secs(8));

    stop(&shutdown, handle).await;
    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Unknown));
    assert_eq!(
        events.recv().await.unwrap(),
        Event::Address(None, String::new())
    );
    assert_eq!(status.nat_type_label(), "unknown");
    assert!(status.external_address().is_none());
}

#[tokio::test(start_paused = true)]
async fn not_punchable_ends_the_pass() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S1, found(NatType::Symmetric, 5000));
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1, S2])), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(
        events.recv().await.unwrap(),
        Event::NatType(NatType::Symmetric)
    );
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));

    let first = calls.recv().await.unwrap();
    let retry = calls.recv().await.unwrap();
    assert!(matches!(retry, Call::Discover(server, _) if server == addr(S1)));
    assert_eq!(retry.at() - first.at(), STUN_RETRY_INTERVAL);

    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn port_flapping_halves_interval_then_gives_up() {
    let (client, mut calls) = FakeClient::new();
    let client = client
        .discover(S1, found(NatType::PortRestricted, 5000))
        .keepalive(Reply::Ok(Some(host(5001))))
        .keepalive(Reply::Ok(Some(host(5002))));
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1, S2])), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(
        events.recv().await.unwrap(),
        Event::NatType(NatType::PortRestricted)
    );
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));
    assert_eq!(events.recv().await.unwrap(), address(5001, S1));
    assert_eq!(events.recv().await.unwrap(), address(5002, S1));

    let discover = calls.recv().await.unwrap();
    let first = calls.recv().await.unwrap();
    assert!(matches!(first, Call::Keepalive(..)));
    assert_eq!(first.at() - discover.at(), Duration::from_secs(8));
    let second = calls.recv().await.unwrap();
    assert!(matches!(second, Call::Keepalive(..)));
    assert_eq!(second.at() - first.at(), Duration::from_secs(4));

    // halving again would drop below the 3s floor, so S2 gets its turn
    let next = calls.recv().await.unwrap();
    assert!(matches!(next, Call::Discover(server, _) if server == addr(S2)));
    assert_eq!(next.at(), second.at());
    let retry = calls.recv().await.unwrap();
    assert!(matches!(retry, Call::Discover(server, _) if server == addr(S1)));
    assert_eq!(retry.at() - next.at(), STUN_RETRY_INTERVAL);

    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn disabling_resets_and_enabling_rediscovers() {
    let (client, mut calls) = FakeClient::new();
    let client = client
        .discover(S1, found(NatType::Full, 5000))
        .discover(S1, found(NatType::Full, 6000));
    let (subscriber, mut events) = recorder();
    let shared = SharedStunConfig::new(config(&[S1, S2]));
    let service = Service::new(Arc::new(shared.clone()), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));
    shared.update(|config| config.nat_enabled = false);

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Unknown));
    assert_eq!(
        events.recv().await.unwrap(),
        Event::Address(None, String::new())
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    shared.update(|config| config.nat_enabled = true);

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(6000, S1));

    // the keep-alive in flight when disabled never fired
    let first = calls.recv().await.unwrap();
    let second = calls.recv().await.unwrap();
    assert!(matches!(first, Call::Discover(..)));
    assert!(matches!(second, Call::Discover(..)));
    assert!(second.at() - first.at() <= Duration::from_secs(8 + 30 + 1));

    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn disabled_service_stays_silent() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S1, found(NatType::Full, 5000));
    let (subscriber, mut events) = recorder();
    let config = config(&[S1]).set_nat_enabled(false);
    let service = Service::new(Arc::new(config), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    tokio::time::sleep(Duration::from_secs(600)).await;
    stop(&shutdown, handle).await;
    assert!(events.try_recv().is_err());
    assert!(calls.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_discovery() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S1, Reply::Hang);
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1])), subscriber, client, None);
    let status = service.status();
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert!(matches!(calls.recv().await.unwrap(), Call::Discover(..)));
    stop(&shutdown, handle).await;
    assert_eq!(status.nat_type(), NatType::Unknown);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unresolvable_server_is_skipped() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S2, found(NatType::Restricted, 5000));
    let (subscriber, mut events) = recorder();
    let service = Service::new(
        Arc::new(config(&["127.0.0.1:notaport", S2])),
        subscriber,
        client,
        None,
    );
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(
        events.recv().await.unwrap(),
        Event::NatType(NatType::Restricted)
    );
    assert_eq!(events.recv().await.unwrap(), address(5000, S2));
    assert!(matches!(calls.recv().await.unwrap(), Call::Discover(server, _) if server == addr(S2)));
    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn missing_address_tries_next_server() {
    let (client, mut calls) = FakeClient::new();
    let client = client
        .discover(S1, Reply::Ok(Discovery::new(NatType::Full, None)))
        .discover(S2, found(NatType::Full, 5000));
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1, S2])), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S2));
    assert!(matches!(calls.recv().await.unwrap(), Call::Discover(server, _) if server == addr(S1)));
    assert!(matches!(calls.recv().await.unwrap(), Call::Discover(server, _) if server == addr(S2)));
    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn traffic_postpones_keepalive() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S1, found(NatType::Full, 5000));
    let (subscriber, mut events) = recorder();
    let tracker = WriteTracker::new();
    let service = Service::new(Arc::new(config(&[S1])), subscriber, client, None)
        .with_write_tracker(tracker.clone());
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));
    tokio::time::sleep(Duration::from_secs(6)).await;
    tracker.record_write();

    let discover = calls.recv().await.unwrap();
    let keepalive = calls.recv().await.unwrap();
    assert!(matches!(keepalive, Call::Keepalive(..)));
    assert_eq!(keepalive.at() - discover.at(), Duration::from_secs(6 + 8));
    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn disable_is_observed_while_traffic_flows() {
    let (client, mut calls) = FakeClient::new();
    let client = client.discover(S1, found(NatType::Full, 5000));
    let (subscriber, mut events) = recorder();
    let shared = SharedStunConfig::new(config(&[S1]));
    let tracker = WriteTracker::new();
    let service = Service::new(Arc::new(shared.clone()), subscriber, client, None)
        .with_write_tracker(tracker.clone());
    let status = service.status();
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));
    shared.update(|config| config.nat_enabled = false);
    let traffic = tokio::spawn(async move {
        loop {
            tracker.record_write();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(Event::NatType(NatType::Unknown)));
    assert_eq!(
        events.recv().await.unwrap(),
        Event::Address(None, String::new())
    );
    assert_eq!(status.nat_type(), NatType::Unknown);
    assert!(matches!(calls.recv().await.unwrap(), Call::Discover(..)));
    assert!(calls.try_recv().is_err());

    traffic.abort();
    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_failure_moves_to_next_server() {
    let (client, mut calls) = FakeClient::new();
    let client = client
        .discover(S1, found(NatType::Full, 5000))
        .keepalive(Reply::Fail);
    let (subscriber, mut events) = recorder();
    let service = Service::new(Arc::new(config(&[S1, S2])), subscriber, client, None);
    let shutdown = ShutdownManager::new();
    let handle = start_task(service, shutdown.clone());

    assert_eq!(events.recv().await.unwrap(), Event::NatType(NatType::Full));
    assert_eq!(events.recv().await.unwrap(), address(5000, S1));

    let discover = calls.recv().await.unwrap();
    let keepalive = calls.recv().await.unwrap();
    assert!(matches!(keepalive, Call::Keepalive(server, _) if server == addr(S1)));
    assert_eq!(keepalive.at() - discover.at(), Duration::from_secs(8));
    let next = calls.recv().await.unwrap();
    assert!(matches!(next, Call::Discover(server, _) if server == addr(S2)));
    assert_eq!(next.at(), keepalive.at());
    let retry = calls.recv().await.unwrap();
    assert!(matches!(retry, Call::Discover(server, _) if server == addr(S1)));
    assert_eq!(retry.at() - next.at(), STUN_RETRY_INTERVAL);

    stop(&shutdown, handle).await;
}

#[tokio::test(start_paused = true)]
async fn huge_interval_does_not_overflow() {
    let (client, _calls) = FakeClient::new();
    let (subscriber, _events) = recorder();
    let tracker = WriteTracker::new();
    let service = Service::new(Arc::new(config(&[S1])), subscriber, client, None)
        .with_write_tracker(tracker.clone());
    let huge = Duration::from_secs(u64::MAX);

    assert_eq!(service.time_until_keepalive(None, huge), huge);
    tracker.record_write();
    assert_eq!(service.time_until_keepalive(Some(Instant::now()), huge), huge);
    assert_eq!(service.deferred_by_traffic(huge), None);
    assert_eq!(
        service.deferred_by_traffic(Duration::from_secs(8)),
        Some(Duration::from_secs(8))
    );
}

#[test]
fn notifies_only_on_change() {
    let (client, _calls) = FakeClient::new();
    let (subscriber, mut events) = recorder();
    let mut service = Service::new(Arc::new(config(&[S1])), subscriber, client, None);

    service.set_nat_type(NatType::Unknown);
    assert!(events.try_recv().is_err());
    service.set_nat_type(NatType::Full);
    service.set_nat_type(NatType::Full);
    assert_eq!(events.try_recv().unwrap(), Event::NatType(NatType::Full));
    assert!(events.try_recv().is_err());

    service.set_external_address(Some(host(5000)), S1);
    service.set_external_address(Some(host(5000)), S2);
    assert_eq!(events.try_recv().unwrap(), address(5000, S1));
    assert!(events.try_recv().is_err());
    service.set_external_address(Some(host(5001)), S2);
    assert_eq!(events.try_recv().unwrap(), address(5001, S2));
    assert_eq!(service.status().external_address(), Some(host(5001)));
}

#[test]
fn display_name() {
    let (client, _calls) = FakeClient::new();
    let (subscriber, _events) = recorder();
    let service = Service::new(
        Arc::new(config(&[S1])),
        subscriber.clone(),
        client,
        Some("0.0.0.0:22000".parse().unwrap()),
    );
    assert_eq!(service.to_string(), "Stun@udp://0.0.0.0:22000");
    let (client, _calls) = FakeClient::new();
    let service = Service::new(Arc::new(config(&[S1])), subscriber, client, None);
    assert_eq!(service.to_string(), "Stun@unknown");
}
