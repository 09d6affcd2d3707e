//! Classification of datagrams arriving on a socket shared by STUN and payload traffic.
//!
//! STUN requests are recognised by shape, but a response is only claimed for the STUN
//! path when its transaction id matches a request we sent within [`TRANSACTION_TTL`].
//! Anything else belongs to the application.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// STUN magic cookie (RFC 5389)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;
/// Fixed STUN header length
pub const HEADER_LEN: usize = 20;
pub const TRANSACTION_ID_LEN: usize = 12;
/// How long a sent transaction keeps its response routed to the STUN path
pub const TRANSACTION_TTL: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransactionId([u8; TRANSACTION_ID_LEN]);

impl TransactionId {
    /// Reads the id out of a datagram that passed [`is_stun_payload`].
    fn from_payload(buf: &[u8]) -> TransactionId {
        let mut id = [0; TRANSACTION_ID_LEN];
        id.copy_from_slice(&buf[8..HEADER_LEN]);
        TransactionId(id)
    }
    pub fn as_bytes(&self) -> &[u8; TRANSACTION_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Structural check: header length, two zero leading bits and the magic cookie.
pub fn is_stun_payload(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN
        && buf[0] & 0xC0 == 0
        && u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) == MAGIC_COOKIE
}

#[derive(Default)]
pub struct StunFilter {
    ids: Mutex<HashMap<TransactionId, Instant>>,
}

impl StunFilter {
    pub fn new() -> StunFilter {
        StunFilter::default()
    }

    /// Remember the transaction of a STUN datagram about to be sent.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not a STUN payload; the caller routed the wrong packet.
    pub fn record_outgoing(&self, buf: &[u8], addr: SocketAddr) {
        assert!(
            is_stun_payload(buf),
            "recording a non-stun datagram for {addr}"
        );
        let id = TransactionId::from_payload(buf);
        let now = Instant::now();
        let mut ids = self.ids.lock();
        ids.insert(id, now + TRANSACTION_TTL);
        Self::purge(&mut ids, now);
        log::trace!("stun transaction {id:?} to {addr}");
    }

    /// True when `buf` answers a transaction recorded within the TTL.
    pub fn claim_incoming(&self, buf: &[u8], addr: SocketAddr) -> bool {
        if !is_stun_payload(buf) {
            return false;
        }
        let id = TransactionId::from_payload(buf);
        let now = Instant::now();
        let mut ids = self.ids.lock();
        Self::purge(&mut ids, now);
        let claimed = ids.contains_key(&id);
        if !claimed {
            log::trace!("unknown stun transaction {id:?} from {addr}");
        }
        claimed
    }

    /// Number of transactions still awaiting a response.
    pub fn outstanding(&self) -> usize {
        let mut ids = self.ids.lock();
        Self::purge(&mut ids, Instant::now());
        ids.len()
    }

    fn purge(ids: &mut HashMap<TransactionId, Instant>, now: Instant) {
        ids.retain(|_, deadline| *deadline > now);
    }
}
