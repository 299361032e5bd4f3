//! Ambient NAT type state.

use std::fmt;
use std::sync::{Arc, RwLock};

/// The kind of NAT this node sits behind, as far as detection has
/// determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NatType {
    /// Detection has not run or was inconclusive.
    #[default]
    Unknown,
    /// Any NAT whose port mapping is stable across destinations.
    Other,
    /// A NAT that assigns a fresh external port per destination. Peers
    /// cannot rely on the advertised port, which drives the endpoint
    /// repair path and disables bootstrap-off-existing probes.
    Symmetric,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Unknown => "unknown",
            NatType::Other => "other",
            NatType::Symmetric => "symmetric",
        };
        f.write_str(s)
    }
}

/// Shared handle to the node-wide NAT type.
///
/// Cloned into every transport; the only writer is the NAT-detection path
/// run during bootstrap.
#[derive(Debug, Clone, Default)]
pub struct NatState(Arc<RwLock<NatType>>);

impl NatState {
    /// A fresh handle starting at [`NatType::Unknown`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current NAT type.
    #[must_use]
    pub fn get(&self) -> NatType {
        *self.0.read().expect("nat state lock poisoned")
    }

    /// Record a detection result.
    pub fn set(&self, nat_type: NatType) {
        *self.0.write().expect("nat state lock poisoned") = nat_type;
    }
}
