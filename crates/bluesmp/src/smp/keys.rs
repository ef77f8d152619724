//! Key management for Security Manager Protocol
//!
//! Keys produced by a successful bonding are handed to a [`KeyStore`]. The
//! manager reads them back to re-encrypt a bonded link and to answer the
//! controller's long term key requests.

use super::crypto::resolve_rpa;
use super::types::*;
use crate::gap::{Address, BdAddr};
use std::collections::HashMap;
use std::sync::RwLock;

/// Long Term Key (LTK) information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTermKey {
    /// Key value
    pub key: [u8; 16],
    /// EDIV (Encrypted Diversifier)
    pub ediv: u16,
    /// RAND (Random number)
    pub rand: [u8; 8],
    /// Negotiated encryption key size
    pub key_size: u8,
    /// Whether this key was generated with Secure Connections pairing
    pub secure_connections: bool,
    /// Authentication level
    pub authenticated: bool,
}

impl LongTermKey {
    /// Create a new legacy Long Term Key
    pub fn new(key: [u8; 16], ediv: u16, rand: [u8; 8], key_size: u8, authenticated: bool) -> Self {
        Self {
            key,
            ediv,
            rand,
            key_size,
            secure_connections: false,
            authenticated,
        }
    }

    /// Create an LTK for Secure Connections; EDIV and Rand are zero.
    pub fn new_secure_connections(key: [u8; 16], key_size: u8, authenticated: bool) -> Self {
        Self {
            key,
            ediv: 0,
            rand: [0; 8],
            key_size,
            secure_connections: true,
            authenticated,
        }
    }

    /// Get the security level provided by this key
    pub fn security_level(&self) -> SecurityLevel {
        if self.secure_connections && self.authenticated {
            SecurityLevel::SecureConnections
        } else if self.authenticated {
            SecurityLevel::EncryptionWithAuthentication
        } else {
            SecurityLevel::EncryptionOnly
        }
    }

    /// Whether a long term key request with these values selects this key.
    pub fn matches(&self, ediv: u16, rand: &[u8; 8]) -> bool {
        self.ediv == ediv && &self.rand == rand
    }
}

/// Identity Resolving Key (IRK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityResolvingKey {
    /// Key value
    pub key: [u8; 16],
    /// Identity address
    pub identity_address: Address,
}

impl IdentityResolvingKey {
    pub fn new(key: [u8; 16], identity_address: Address) -> Self {
        Self {
            key,
            identity_address,
        }
    }

    /// Whether `addr` is a resolvable private address generated from this
    /// key.
    pub fn resolves(&self, addr: &BdAddr) -> bool {
        resolve_rpa(&self.key, &addr.bytes)
    }
}

/// Connection Signature Resolving Key (CSRK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSignatureResolvingKey {
    /// Key value
    pub key: [u8; 16],
    /// Counter for signed data
    pub sign_counter: u32,
    /// Authentication level
    pub authenticated: bool,
}

impl ConnectionSignatureResolvingKey {
    pub fn new(key: [u8; 16], authenticated: bool) -> Self {
        Self {
            key,
            sign_counter: 0,
            authenticated,
        }
    }

    /// Increment the signing counter
    pub fn increment_counter(&mut self) -> u32 {
        self.sign_counter = self.sign_counter.wrapping_add(1);
        self.sign_counter
    }
}

/// Keys bonded with one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceKeys {
    /// LTK used when we act as central: the peer's distributed key, or the
    /// Secure Connections key
    pub ltk: Option<LongTermKey>,
    /// LTK we distributed; answers long term key requests as peripheral
    pub local_ltk: Option<LongTermKey>,
    /// Peer Identity Resolving Key and identity address
    pub irk: Option<IdentityResolvingKey>,
    /// CSRK we distributed
    pub local_csrk: Option<ConnectionSignatureResolvingKey>,
    /// CSRK the peer distributed
    pub remote_csrk: Option<ConnectionSignatureResolvingKey>,
    /// Link key derived for BR/EDR
    pub link_key: Option<[u8; 16]>,
}

impl DeviceKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the security level based on stored keys
    pub fn security_level(&self) -> SecurityLevel {
        self.ltk
            .or(self.local_ltk)
            .map(|ltk| ltk.security_level())
            .unwrap_or(SecurityLevel::None)
    }

    /// Check if any keys are stored
    pub fn has_keys(&self) -> bool {
        self.ltk.is_some()
            || self.local_ltk.is_some()
            || self.irk.is_some()
            || self.local_csrk.is_some()
            || self.remote_csrk.is_some()
            || self.link_key.is_some()
    }

    /// Key to answer a long term key request with.
    pub fn ltk_for_request(&self, ediv: u16, rand: &[u8; 8]) -> Option<&LongTermKey> {
        if let Some(ltk) = self.local_ltk.as_ref().filter(|ltk| ltk.matches(ediv, rand)) {
            return Some(ltk);
        }
        self.ltk
            .as_ref()
            .filter(|ltk| ltk.secure_connections && ltk.matches(ediv, rand))
    }
}

/// Key Store trait for persistent storage of security keys
pub trait KeyStore {
    /// Save keys for a device
    fn save_keys(&mut self, address: &BdAddr, keys: &DeviceKeys) -> SmpResult<()>;

    /// Load keys for a device
    fn load_keys(&self, address: &BdAddr) -> SmpResult<Option<DeviceKeys>>;

    /// Delete keys for a device
    fn delete_keys(&mut self, address: &BdAddr) -> SmpResult<()>;

    /// Find the bonded device whose IRK resolves `random_address`
    fn resolve_identity(&self, random_address: &BdAddr) -> SmpResult<Option<BdAddr>>;

    /// Get all paired devices
    fn get_paired_devices(&self) -> SmpResult<Vec<BdAddr>>;
}

/// SMP Key Store handle
pub type KeyStoreHandle = Box<dyn KeyStore + Send>;

/// In-memory implementation of KeyStore
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    /// Device key storage
    keys: RwLock<HashMap<BdAddr, DeviceKeys>>,
}

impl MemoryKeyStore {
    /// Create a new empty in-memory key store
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned<E>(_: E) -> SmpError {
    SmpError::KeyStore("key store lock poisoned".into())
}

impl KeyStore for MemoryKeyStore {
    fn save_keys(&mut self, address: &BdAddr, keys: &DeviceKeys) -> SmpResult<()> {
        let mut store = self.keys.write().map_err(poisoned)?;
        store.insert(*address, *keys);
        Ok(())
    }

    fn load_keys(&self, address: &BdAddr) -> SmpResult<Option<DeviceKeys>> {
        let store = self.keys.read().map_err(poisoned)?;
        Ok(store.get(address).copied())
    }

    fn delete_keys(&mut self, address: &BdAddr) -> SmpResult<()> {
        let mut store = self.keys.write().map_err(poisoned)?;
        store.remove(address);
        Ok(())
    }

    fn resolve_identity(&self, random_address: &BdAddr) -> SmpResult<Option<BdAddr>> {
        let store = self.keys.read().map_err(poisoned)?;
        let found = store.iter().find_map(|(addr, keys)| {
            keys.irk
                .filter(|irk| irk.resolves(random_address))
                .map(|_| *addr)
        });
        Ok(found)
    }

    fn get_paired_devices(&self) -> SmpResult<Vec<BdAddr>> {
        let store = self.keys.read().map_err(poisoned)?;
        let devices = store.keys().cloned().collect();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smp::crypto::ah;

    #[test]
    fn test_security_level_from_ltk() {
        let legacy = LongTermKey::new([1; 16], 0x1234, [2; 8], 16, false);
        assert_eq!(legacy.security_level(), SecurityLevel::EncryptionOnly);

        let sc = LongTermKey::new_secure_connections([3; 16], 16, true);
        assert_eq!(sc.security_level(), SecurityLevel::SecureConnections);

        let sc_jw = LongTermKey::new_secure_connections([3; 16], 16, false);
        assert_eq!(sc_jw.security_level(), SecurityLevel::EncryptionOnly);
    }

    #[test]
    fn test_ltk_request_lookup() {
        let mut keys = DeviceKeys::new();
        assert_eq!(keys.security_level(), SecurityLevel::None);

        keys.local_ltk = Some(LongTermKey::new([7; 16], 0xbeef, [9; 8], 16, true));
        assert!(keys.ltk_for_request(0xbeef, &[9; 8]).is_some());
        assert!(keys.ltk_for_request(0xbeef, &[0; 8]).is_none());

        keys.ltk = Some(LongTermKey::new_secure_connections([5; 16], 16, true));
        assert_eq!(keys.ltk_for_request(0, &[0; 8]).map(|k| k.key), Some([5; 16]));
    }

    #[test]
    fn test_memory_store_roundtrip_and_delete() {
        let mut store = MemoryKeyStore::new();
        let addr = BdAddr::new([1, 2, 3, 4, 5, 6]);
        let mut keys = DeviceKeys::new();
        keys.link_key = Some([0x11; 16]);

        store.save_keys(&addr, &keys).unwrap();
        assert_eq!(store.load_keys(&addr).unwrap(), Some(keys));
        assert_eq!(store.get_paired_devices().unwrap(), vec![addr]);

        store.delete_keys(&addr).unwrap();
        assert_eq!(store.load_keys(&addr).unwrap(), None);
    }

    #[test]
    fn test_resolve_identity_with_irk() {
        let irk = [0x42u8; 16];
        let identity = Address::public([0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5]);
        let mut keys = DeviceKeys::new();
        keys.irk = Some(IdentityResolvingKey::new(irk, identity));

        let mut store = MemoryKeyStore::new();
        store.save_keys(&identity.addr, &keys).unwrap();

        let prand = [0x11, 0x22, 0x53];
        let hash = ah(&irk, &prand);
        let rpa = BdAddr::new([hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]]);
        assert_eq!(store.resolve_identity(&rpa).unwrap(), Some(identity.addr));

        let other = BdAddr::new([0, 0, 0, 0x11, 0x22, 0x53]);
        assert_eq!(store.resolve_identity(&other).unwrap(), None);
    }
}
