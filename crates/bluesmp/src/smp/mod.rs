//! Security Manager Protocol (SMP) implementation
//!
//! This module implements the Bluetooth Security Manager Protocol, which is responsible for:
//! - Pairing devices over LE, legacy and Secure Connections
//! - Generating and distributing encryption keys
//! - Deriving LE keys from a bonded BR/EDR link
//!
//! [`SmpManager`] owns one pairing attempt at a time. PDUs, controller
//! events and application replies go in; PDUs out go through an
//! [`SmpTransport`], and everything the application must act on comes back
//! through the registered callback.

mod actions;
mod association;
mod br;
mod codec;
mod config;
mod constants;
mod control;
mod crypto;
mod keys;
mod manager;
mod state;
mod timer;
mod transport;
mod types;
mod validate;

// Re-export public API
pub use self::association::{select_association_model, AssociationInputs};
pub use self::codec::{build_command, build_pairing_failed, Command};
pub use self::config::SmpConfig;
pub use self::constants::*;
pub use self::control::{ControlBlock, PairFlags, Pending};
pub use self::crypto::{
    aes_cipher_msg_auth_code, aes_cmac, aes_encrypt, ah, c1, compute_dhkey, f4, f5, f6, g2,
    generate_p256_keypair, h6, mask_key, passkey_to_128, public_key_from_private, resolve_rpa, s1,
    PublicKey, H6_KEY_ID_BRLE, H6_KEY_ID_LEBR, H6_KEY_ID_TMP1, H6_KEY_ID_TMP2,
};
pub use self::keys::*;
pub use self::manager::SmpManager;
pub use self::state::{BrEvent, BrState, Event, Fsm, LeState};
pub use self::timer::{ResponseTimer, DEFAULT_RESPONSE_TIMEOUT};
pub use self::transport::SmpTransport;
pub use self::types::*;
pub use self::validate::{command_size, has_invalid_parameters};
