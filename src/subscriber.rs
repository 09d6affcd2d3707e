use natkeep_core::nat::{Host, NatType};

/// Receives NAT changes observed by a [`Service`](crate::Service).
///
/// Callbacks run on the service task; they fire only when the value actually
/// changes and should return quickly.
pub trait Subscriber: Send + Sync {
    fn on_nat_type_changed(&self, nat_type: NatType);
    /// `via` names the STUN server that reported the address, empty when cleared.
    fn on_external_address_changed(&self, address: Option<&Host>, via: &str);
}
