//! # natkeep-core - Shared-socket building blocks for NAT traversal
//!
//! `natkeep-core` provides the pieces that sit directly on a UDP socket used both for
//! STUN and for application payload. It is the engine underneath the `natkeep`
//! coordinator service.
//!
//! ## Features
//!
//! - **NAT Classification**: [`nat::NatType`] and the punchability rules
//! - **Packet Filtering**: [`filter::StunFilter`] tells STUN responses apart from payload
//! - **Demultiplexing**: [`demux::FilteredSocket`] splits one socket into a STUN half and
//!   an application half
//! - **Write Tracking**: [`write_tracker::WriteTracker`] lets keep-alives yield to real traffic
//! - **STUN Client Boundary**: [`stun::StunClient`] is the contract a STUN library fulfils
//!
//! ## Packet Classification
//!
//! ```rust
//! use natkeep_core::filter::{is_stun_payload, StunFilter, MAGIC_COOKIE};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut request = vec![0x00, 0x01, 0x00, 0x00];
//! request.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
//! request.extend_from_slice(&[7; 12]);
//! assert!(is_stun_payload(&request));
//!
//! let server = "192.0.2.1:3478".parse().unwrap();
//! let filter = StunFilter::new();
//! filter.record_outgoing(&request, server);
//!
//! let mut response = request.clone();
//! response[0] = 0x01;
//! assert!(filter.claim_incoming(&response, server));
//! assert!(!filter.claim_incoming(b"not stun at all, just payload", server));
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! [`filter::StunFilter`] and [`write_tracker::WriteTracker`] are shared between the
//! sending and receiving tasks of a socket; their locks are never held across I/O.

pub mod demux;
pub mod error;
pub mod filter;
pub mod nat;
pub mod socket;
pub mod stun;
pub mod write_tracker;
