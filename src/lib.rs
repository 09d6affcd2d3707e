//! # natkeep - NAT discovery and mapping keep-alive
//!
//! `natkeep` runs one [`Service`] per UDP socket. The service classifies the NAT in
//! front of the socket by asking STUN servers in turn, publishes the external address
//! it learns, and keeps the NAT mapping open with periodic binding requests for as
//! long as the NAT allows hole punching.
//!
//! The STUN exchange itself is left to a [`StunClient`]; the shared-socket plumbing
//! lives in [`natkeep_core`].
//!
//! ```rust,no_run
//! use async_shutdown::ShutdownManager;
//! use natkeep::{start_task, Host, NatType, Service, StunClient, StunConfig, Subscriber};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl Subscriber for Log {
//!     fn on_nat_type_changed(&self, nat_type: NatType) {
//!         println!("nat type: {nat_type}");
//!     }
//!     fn on_external_address_changed(&self, address: Option<&Host>, via: &str) {
//!         println!("external address: {address:?} via {via}");
//!     }
//! }
//!
//! async fn run<C: StunClient + 'static>(client: C) {
//!     let shutdown = ShutdownManager::new();
//!     let service = Service::new(Arc::new(StunConfig::default()), Arc::new(Log), client, None);
//!     let status = service.status();
//!     let handle = start_task(service, shutdown.clone());
//!     // ...
//!     println!("{}", status.nat_type_label());
//!     _ = shutdown.trigger_shutdown(());
//!     _ = handle.await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod subscriber;

pub use config::{SharedStunConfig, StunConfig, StunOptions};
pub use natkeep_core;
pub use natkeep_core::demux::{AppConn, FilteredSocket, StunConn};
pub use natkeep_core::nat::{are_different, Host, NatType};
pub use natkeep_core::stun::{Discovery, StunClient};
pub use natkeep_core::write_tracker::WriteTracker;
pub use service::{start_task, NatStatus, Service, STUN_RETRY_INTERVAL};
pub use subscriber::Subscriber;
