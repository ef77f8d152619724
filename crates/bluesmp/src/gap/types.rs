use crate::gap::constants::*;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl AddressType {
    /// Whether the address is a random (non-public) address.
    ///
    /// Identity variants collapse onto their base type, which is what the
    /// SMP key generation functions consume.
    pub fn is_random(&self) -> bool {
        matches!(self, AddressType::Random | AddressType::RandomIdentity)
    }
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            PUBLIC_DEVICE_ADDRESS => AddressType::Public,
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// Bluetooth device address, stored in wire order (`bytes[0]` is the least
/// significant octet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; BD_ADDR_LEN],
}

impl BdAddr {
    pub fn new(bytes: [u8; BD_ADDR_LEN]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// A device address together with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address {
    pub kind: AddressType,
    pub addr: BdAddr,
}

impl Address {
    pub fn new(kind: AddressType, addr: BdAddr) -> Self {
        Self { kind, addr }
    }

    pub fn public(bytes: [u8; BD_ADDR_LEN]) -> Self {
        Self::new(AddressType::Public, BdAddr::new(bytes))
    }

    pub fn random(bytes: [u8; BD_ADDR_LEN]) -> Self {
        Self::new(AddressType::Random, BdAddr::new(bytes))
    }

    /// 56-bit `A`/`B` value used by f5 and f6, least significant octet
    /// first. The address type (0 = public, 1 = random) is the most
    /// significant octet.
    pub fn to_le_bytes(&self) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[..BD_ADDR_LEN].copy_from_slice(&self.addr.bytes);
        out[BD_ADDR_LEN] = u8::from(self.kind.is_random());
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_random() { "random" } else { "public" };
        write!(f, "{} ({})", self.addr, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bd_addr_display_is_msb_first() {
        let addr = BdAddr::new([0xce, 0xbf, 0x37, 0x37, 0x12, 0x56]);
        assert_eq!(addr.to_string(), "56:12:37:37:BF:CE");
    }

    #[test]
    fn test_address_type_octet_is_msb() {
        let a = Address::random([1, 2, 3, 4, 5, 6]);
        assert_eq!(a.to_le_bytes(), [1, 2, 3, 4, 5, 6, 1]);

        let b = Address::new(AddressType::PublicIdentity, BdAddr::new([1, 2, 3, 4, 5, 6]));
        assert_eq!(b.to_le_bytes()[6], 0);
    }

    #[test]
    fn test_address_type_conversion() {
        assert_eq!(AddressType::from(RANDOM_DEVICE_ADDRESS), AddressType::Random);
        assert_eq!(u8::from(AddressType::RandomIdentity), RANDOM_IDENTITY_ADDRESS);
        assert_eq!(AddressType::from(0x7f), AddressType::Public);
    }
}
