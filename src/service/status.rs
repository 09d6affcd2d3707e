use natkeep_core::nat::{Host, NatType};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Default)]
struct StatusInner {
    nat_type: NatType,
    external_address: Option<Host>,
}

/// Read-only snapshot of what a running service has learned.
///
/// The service task is the only writer.
#[derive(Clone, Default)]
pub struct NatStatus {
    inner: Arc<RwLock<StatusInner>>,
}

impl NatStatus {
    pub fn nat_type(&self) -> NatType {
        self.inner.read().nat_type
    }
    pub fn external_address(&self) -> Option<Host> {
        self.inner.read().external_address.clone()
    }
    /// `"unknown"` until a usable classification exists.
    pub fn nat_type_label(&self) -> String {
        match self.nat_type() {
            NatType::Unknown | NatType::Error => "unknown".to_string(),
            nat_type => nat_type.to_string(),
        }
    }
    pub(crate) fn store_nat_type(&self, nat_type: NatType) {
        self.inner.write().nat_type = nat_type;
    }
    pub(crate) fn store_external_address(&self, address: Option<Host>) {
        self.inner.write().external_address = address;
    }
}
