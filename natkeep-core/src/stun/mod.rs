//! The boundary to a STUN client library.
//!
//! The coordinator never speaks the STUN wire format itself. It drives whatever
//! implements [`StunClient`], usually a client bound to the [`StunConn`](crate::demux::StunConn)
//! half of a [`FilteredSocket`](crate::demux::FilteredSocket).

use crate::error::Result;
use crate::nat::{Host, NatType};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Outcome of a NAT discovery run against one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub nat_type: NatType,
    /// The mapped address, if the server reported one
    pub external: Option<Host>,
}

impl Discovery {
    pub fn new(nat_type: NatType, external: Option<Host>) -> Self {
        Self { nat_type, external }
    }
}

#[async_trait]
pub trait StunClient: Send {
    /// Point subsequent requests at an already resolved server.
    fn set_server_addr(&mut self, addr: SocketAddr);
    /// Run the NAT classification tests against the current server.
    async fn discover(&mut self) -> Result<Discovery>;
    /// Send a binding request to refresh the mapping and report the address seen.
    async fn keepalive(&mut self) -> Result<Option<Host>>;
}

#[async_trait]
impl<C: StunClient + ?Sized> StunClient for Box<C> {
    fn set_server_addr(&mut self, addr: SocketAddr) {
        (**self).set_server_addr(addr)
    }
    async fn discover(&mut self) -> Result<Discovery> {
        (**self).discover().await
    }
    async fn keepalive(&mut self) -> Result<Option<Host>> {
        (**self).keepalive().await
    }
}
