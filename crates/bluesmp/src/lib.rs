//! bluesmp - Bluetooth Security Manager Protocol pairing engine
//!
//! This library implements the host side of the Bluetooth Security Manager:
//! LE legacy and Secure Connections pairing, key distribution and LE key
//! derivation over the BR/EDR Security Manager channel.
//!
//! The engine is transport agnostic. L2CAP and the controller are reached
//! through [`smp::SmpTransport`]; received PDUs and link events are fed to
//! [`SmpManager`], which reports back through a registered callback.

pub mod error;
pub mod gap;
pub mod l2cap;
pub mod smp;

// Re-export common types for convenience
pub use error::HciError;
pub use gap::{Address, AddressType, BdAddr};
pub use l2cap::{L2capError, L2CAP_SMP_BR_CID, L2CAP_SMP_CID};
pub use smp::{
    AuthReq, IoCapability, KeyDist, KeyStore, MemoryKeyStore, PairingFeatures, Reason,
    SecurityLevel, SmpConfig, SmpError, SmpEvent, SmpManager, SmpResult, SmpTransport,
};
