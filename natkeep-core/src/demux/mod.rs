//! One UDP socket, two logical connections.
//!
//! [`FilteredSocket`] owns the receive side of a socket and splits incoming datagrams
//! between a [`StunConn`], which a STUN client binds to, and an [`AppConn`] for
//! everything else. Routing is decided by [`StunFilter::claim_incoming`], and every
//! request leaving through the [`StunConn`] is recorded first so its response finds
//! its way back.
//!
//! ```rust,no_run
//! use async_shutdown::ShutdownManager;
//! use natkeep_core::demux::FilteredSocket;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let shutdown = ShutdownManager::<()>::new();
//! let socket = FilteredSocket::bind("0.0.0.0:22000".parse()?)?;
//! let (stun_conn, mut app_conn) = socket.split(&shutdown);
//! // hand `stun_conn` to the STUN client
//! # drop(stun_conn);
//! while let Ok((buf, addr)) = app_conn.recv_from().await {
//!     println!("{} bytes of payload from {addr}", buf.len());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::filter::StunFilter;
use crate::write_tracker::WriteTracker;
use async_shutdown::ShutdownManager;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
const MAX_DATAGRAM_SIZE: usize = 65535;

type Datagram = (BytesMut, SocketAddr);

pub struct FilteredSocket {
    socket: Arc<UdpSocket>,
    filter: Arc<StunFilter>,
    write_tracker: WriteTracker,
    queue_capacity: usize,
}

impl FilteredSocket {
    pub fn new(socket: UdpSocket) -> FilteredSocket {
        Self {
            socket: Arc::new(socket),
            filter: Arc::new(StunFilter::new()),
            write_tracker: WriteTracker::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
    pub fn bind(addr: SocketAddr) -> anyhow::Result<FilteredSocket> {
        Ok(Self::new(crate::socket::bind_udp(addr)?))
    }
    /// Datagrams buffered per side before new ones are dropped.
    pub fn set_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
    pub fn filter(&self) -> Arc<StunFilter> {
        self.filter.clone()
    }
    pub fn write_tracker(&self) -> WriteTracker {
        self.write_tracker.clone()
    }

    /// Start the receive loop and hand out both halves.
    ///
    /// The loop ends when `shutdown` is triggered, when the socket fails, or when both
    /// halves have been dropped.
    pub fn split(self, shutdown: &ShutdownManager<()>) -> (StunConn, AppConn) {
        let (stun_sender, stun_receiver) = tokio::sync::mpsc::channel(self.queue_capacity);
        let (app_sender, app_receiver) = tokio::sync::mpsc::channel(self.queue_capacity);
        let local_addr = self.socket.local_addr().ok();
        let fut = shutdown.wrap_cancel(recv_loop(
            self.socket.clone(),
            self.filter.clone(),
            stun_sender,
            app_sender,
        ));
        tokio::spawn(async move {
            if fut.await.is_err() {
                log::debug!("recv shutdown signal: filtered socket {local_addr:?} is closed");
            }
        });
        let stun_conn = StunConn {
            socket: self.socket.clone(),
            filter: self.filter,
            write_tracker: self.write_tracker.clone(),
            receiver: stun_receiver,
        };
        let app_conn = AppConn {
            socket: self.socket,
            write_tracker: self.write_tracker,
            receiver: app_receiver,
        };
        (stun_conn, app_conn)
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    filter: Arc<StunFilter>,
    stun_sender: Sender<Datagram>,
    app_sender: Sender<Datagram>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(rs) => rs,
            Err(e) => {
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
                ) {
                    continue;
                }
                log::warn!("filtered socket recv_from {e:?}");
                return;
            }
        };
        let packet = &buf[..len];
        let (sender, side) = if filter.claim_incoming(packet, addr) {
            (&stun_sender, "stun")
        } else {
            (&app_sender, "app")
        };
        match sender.try_send((BytesMut::from(packet), addr)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("{side} queue full, dropping {len} bytes from {addr}");
            }
            Err(TrySendError::Closed(_)) => {
                if stun_sender.is_closed() && app_sender.is_closed() {
                    return;
                }
            }
        }
    }
}

/// The STUN half of a [`FilteredSocket`].
pub struct StunConn {
    socket: Arc<UdpSocket>,
    filter: Arc<StunFilter>,
    write_tracker: WriteTracker,
    receiver: Receiver<Datagram>,
}

impl StunConn {
    /// Send a STUN request and route its response back here.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not a STUN message.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.filter.record_outgoing(buf, addr);
        let len = self.socket.send_to(buf, addr).await?;
        self.write_tracker.record_write();
        Ok(len)
    }
    pub async fn recv_from(&mut self) -> Result<Datagram> {
        self.receiver.recv().await.ok_or(Error::ChannelClosed)
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// The application half of a [`FilteredSocket`].
pub struct AppConn {
    socket: Arc<UdpSocket>,
    write_tracker: WriteTracker,
    receiver: Receiver<Datagram>,
}

impl AppConn {
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        let len = self.socket.send_to(buf, addr).await?;
        self.write_tracker.record_write();
        Ok(len)
    }
    pub async fn recv_from(&mut self) -> Result<Datagram> {
        self.receiver.recv().await.ok_or(Error::ChannelClosed)
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
