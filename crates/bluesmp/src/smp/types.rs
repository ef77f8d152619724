//! Type definitions for the Security Manager Protocol
use super::constants::*;
use crate::gap::Address;
use bitflags::bitflags;
use std::fmt;
use thiserror::Error;

/// SMP Error types
#[derive(Debug, Clone, Error)]
pub enum SmpError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pairing failed: {0}")]
    PairingFailed(Reason),

    #[error("Out of resources")]
    NoResources,

    #[error("Command not supported")]
    CommandNotSupported,

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("A pairing attempt is already active")]
    Busy,

    #[error("No pairing in progress with {0}")]
    NotPairing(Address),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("HCI error: {0}")]
    HciError(String),

    #[error("L2CAP error: {0}")]
    L2capError(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SmpError {
    fn from(err: std::io::Error) -> Self {
        SmpError::IoError(err.to_string())
    }
}

impl From<crate::l2cap::L2capError> for SmpError {
    fn from(err: crate::l2cap::L2capError) -> Self {
        SmpError::L2capError(err.to_string())
    }
}

impl From<crate::error::HciError> for SmpError {
    fn from(err: crate::error::HciError) -> Self {
        SmpError::HciError(err.to_string())
    }
}

/// Result type for SMP operations
pub type SmpResult<T> = Result<T, SmpError>;

/// Completion status of a pairing attempt.
///
/// Codes up to [`SMP_MAX_FAIL_RSN_CODE`] travel in Pairing Failed PDUs.
/// The rest are local outcomes reported to the application only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    Success,
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhkeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyNotAllowed,
    InternalError,
    UnknownIoCapability,
    EncryptionFailed,
    ResponseTimeout,
    LinkLost,
}

impl Reason {
    pub fn to_u8(&self) -> u8 {
        match self {
            Reason::Success => SMP_SUCCESS,
            Reason::PasskeyEntryFailed => SMP_PASSKEY_ENTRY_FAIL,
            Reason::OobNotAvailable => SMP_OOB_FAIL,
            Reason::AuthenticationRequirements => SMP_PAIR_AUTH_FAIL,
            Reason::ConfirmValueFailed => SMP_CONFIRM_VALUE_ERR,
            Reason::PairingNotSupported => SMP_PAIR_NOT_SUPPORT,
            Reason::EncryptionKeySize => SMP_ENC_KEY_SIZE,
            Reason::CommandNotSupported => SMP_INVALID_CMD,
            Reason::UnspecifiedReason => SMP_PAIR_FAIL_UNKNOWN,
            Reason::RepeatedAttempts => SMP_REPEATED_ATTEMPTS,
            Reason::InvalidParameters => SMP_INVALID_PARAMETERS,
            Reason::DhkeyCheckFailed => SMP_DHKEY_CHK_FAIL,
            Reason::NumericComparisonFailed => SMP_NUMERIC_COMPAR_FAIL,
            Reason::BrEdrPairingInProgress => SMP_BR_PARING_IN_PROGR,
            Reason::CrossTransportKeyNotAllowed => SMP_XTRANS_DERIVE_NOT_ALLOW,
            Reason::InternalError => SMP_PAIR_INTERNAL_ERR,
            Reason::UnknownIoCapability => SMP_UNKNOWN_IO_CAP,
            Reason::EncryptionFailed => SMP_ENC_FAIL,
            Reason::ResponseTimeout => SMP_RSP_TIMEOUT,
            Reason::LinkLost => SMP_CONN_TOUT,
        }
    }

    /// Decode the reason octet of a received Pairing Failed PDU. Local-only
    /// codes are not accepted from the wire.
    pub fn from_wire(value: u8) -> Option<Self> {
        let reason = match value {
            SMP_PASSKEY_ENTRY_FAIL => Reason::PasskeyEntryFailed,
            SMP_OOB_FAIL => Reason::OobNotAvailable,
            SMP_PAIR_AUTH_FAIL => Reason::AuthenticationRequirements,
            SMP_CONFIRM_VALUE_ERR => Reason::ConfirmValueFailed,
            SMP_PAIR_NOT_SUPPORT => Reason::PairingNotSupported,
            SMP_ENC_KEY_SIZE => Reason::EncryptionKeySize,
            SMP_INVALID_CMD => Reason::CommandNotSupported,
            SMP_PAIR_FAIL_UNKNOWN => Reason::UnspecifiedReason,
            SMP_REPEATED_ATTEMPTS => Reason::RepeatedAttempts,
            SMP_INVALID_PARAMETERS => Reason::InvalidParameters,
            SMP_DHKEY_CHK_FAIL => Reason::DhkeyCheckFailed,
            SMP_NUMERIC_COMPAR_FAIL => Reason::NumericComparisonFailed,
            SMP_BR_PARING_IN_PROGR => Reason::BrEdrPairingInProgress,
            SMP_XTRANS_DERIVE_NOT_ALLOW => Reason::CrossTransportKeyNotAllowed,
            _ => return None,
        };
        Some(reason)
    }

    /// Whether this reason may be carried in a Pairing Failed PDU.
    pub fn is_wire(&self) -> bool {
        let code = self.to_u8();
        code != SMP_SUCCESS && code <= SMP_MAX_FAIL_RSN_CODE
    }

    pub fn is_success(&self) -> bool {
        *self == Reason::Success
    }
}

impl Default for Reason {
    fn default() -> Self {
        Reason::Success
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.to_u8())
    }
}

/// IO Capability types for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoCapability {
    /// Display only capability
    DisplayOnly,
    /// Display with yes/no capability
    DisplayYesNo,
    /// Keyboard only
    KeyboardOnly,
    /// No input, no output
    NoInputNoOutput,
    /// Both keyboard and display
    KeyboardDisplay,
}

impl IoCapability {
    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => SMP_IO_CAP_OUT,
            IoCapability::DisplayYesNo => SMP_IO_CAP_IO,
            IoCapability::KeyboardOnly => SMP_IO_CAP_IN,
            IoCapability::NoInputNoOutput => SMP_IO_CAP_NONE,
            IoCapability::KeyboardDisplay => SMP_IO_CAP_KBDISP,
        }
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_IO_CAP_OUT => Some(IoCapability::DisplayOnly),
            SMP_IO_CAP_IO => Some(IoCapability::DisplayYesNo),
            SMP_IO_CAP_IN => Some(IoCapability::KeyboardOnly),
            SMP_IO_CAP_NONE => Some(IoCapability::NoInputNoOutput),
            SMP_IO_CAP_KBDISP => Some(IoCapability::KeyboardDisplay),
            _ => None,
        }
    }
}

impl fmt::Display for IoCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoCapability::DisplayOnly => write!(f, "Display Only"),
            IoCapability::DisplayYesNo => write!(f, "Display Yes/No"),
            IoCapability::KeyboardOnly => write!(f, "Keyboard Only"),
            IoCapability::NoInputNoOutput => write!(f, "No Input No Output"),
            IoCapability::KeyboardDisplay => write!(f, "Keyboard Display"),
        }
    }
}

bitflags! {
    /// Authentication requirements octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AuthReq: u8 {
        const BONDING = SMP_AUTH_GEN_BOND;
        const MITM = SMP_AUTH_YN_BIT;
        const SC = SMP_SC_SUPPORT_BIT;
        const KEYPRESS = SMP_KP_SUPPORT_BIT;
        const CT2 = SMP_H7_SUPPORT_BIT;
    }
}

impl AuthReq {
    /// Bonding flags sub-field (two low bits), reserved patterns included.
    pub fn bonding_flags(&self) -> u8 {
        self.bits() & SMP_AUTH_BOND_MASK
    }

    pub fn is_bonding(&self) -> bool {
        self.bonding_flags() == SMP_AUTH_GEN_BOND
    }
}

bitflags! {
    /// Key distribution octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyDist: u8 {
        /// LTK, EDIV and Rand (legacy) or derive LTK (BR/EDR)
        const ENC = SMP_SEC_KEY_TYPE_ENC;
        /// IRK and identity address
        const ID = SMP_SEC_KEY_TYPE_ID;
        /// CSRK
        const SIGN = SMP_SEC_KEY_TYPE_CSRK;
        /// Derive the BR/EDR link key
        const LINK = SMP_SEC_KEY_TYPE_LK;
    }
}

/// Pairing parameters carried by Pairing Request and Pairing Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    /// IO Capability
    pub io_capability: IoCapability,
    /// OOB data flag
    pub oob_data_present: bool,
    /// Authentication requirements
    pub auth_req: AuthReq,
    /// Maximum encryption key size (7-16)
    pub max_key_size: u8,
    /// Initiator key distribution
    pub initiator_key_dist: KeyDist,
    /// Responder key distribution
    pub responder_key_dist: KeyDist,
}

impl Default for PairingFeatures {
    fn default() -> Self {
        Self {
            io_capability: IoCapability::NoInputNoOutput,
            oob_data_present: false,
            auth_req: AuthReq::BONDING | AuthReq::SC,
            max_key_size: SMP_ENCR_KEY_SIZE_MAX,
            initiator_key_dist: KeyDist::ENC | KeyDist::ID | KeyDist::SIGN,
            responder_key_dist: KeyDist::ENC | KeyDist::ID | KeyDist::SIGN,
        }
    }
}

/// Pairing methods, as the user sees them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    /// Just Works method - no user interaction
    JustWorks,
    /// Passkey Entry - one device enters a passkey
    PasskeyEntry,
    /// Numeric Comparison - user confirms matching numbers
    NumericComparison,
    /// Out of Band data
    OutOfBand,
}

impl fmt::Display for PairingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingMethod::JustWorks => write!(f, "Just Works"),
            PairingMethod::PasskeyEntry => write!(f, "Passkey Entry"),
            PairingMethod::NumericComparison => write!(f, "Numeric Comparison"),
            PairingMethod::OutOfBand => write!(f, "Out of Band"),
        }
    }
}

/// Key generation method chosen for phase 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssociationModel {
    /// Legacy Just Works, unauthenticated
    EncryptionOnly = 0,
    /// Legacy Passkey Entry, this side inputs
    Passkey = 1,
    /// Legacy OOB
    Oob = 2,
    /// Legacy Passkey Entry, this side displays
    KeyNotification = 3,
    ScJustWorks = 4,
    ScNumericComparison = 5,
    /// SC Passkey Entry, this side inputs
    ScPasskeyEntry = 6,
    /// SC Passkey Entry, this side displays
    ScPasskeyDisplay = 7,
    ScOob = 8,
    OutOfRange = 9,
}

impl AssociationModel {
    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_secure_connections(&self) -> bool {
        matches!(
            self,
            AssociationModel::ScJustWorks
                | AssociationModel::ScNumericComparison
                | AssociationModel::ScPasskeyEntry
                | AssociationModel::ScPasskeyDisplay
                | AssociationModel::ScOob
        )
    }

    /// Whether the model gives MITM protection.
    pub fn is_authenticated(&self) -> bool {
        !matches!(
            self,
            AssociationModel::EncryptionOnly
                | AssociationModel::ScJustWorks
                | AssociationModel::OutOfRange
        )
    }

    pub fn is_passkey(&self) -> bool {
        matches!(
            self,
            AssociationModel::Passkey
                | AssociationModel::KeyNotification
                | AssociationModel::ScPasskeyEntry
                | AssociationModel::ScPasskeyDisplay
        )
    }

    /// Collapse the model onto the user visible method.
    pub fn method(&self) -> Option<PairingMethod> {
        match self {
            AssociationModel::EncryptionOnly | AssociationModel::ScJustWorks => {
                Some(PairingMethod::JustWorks)
            }
            AssociationModel::Passkey
            | AssociationModel::KeyNotification
            | AssociationModel::ScPasskeyEntry
            | AssociationModel::ScPasskeyDisplay => Some(PairingMethod::PasskeyEntry),
            AssociationModel::ScNumericComparison => Some(PairingMethod::NumericComparison),
            AssociationModel::Oob | AssociationModel::ScOob => Some(PairingMethod::OutOfBand),
            AssociationModel::OutOfRange => None,
        }
    }
}

impl Default for AssociationModel {
    fn default() -> Self {
        AssociationModel::OutOfRange
    }
}

/// SMP OOB (Out of Band) data for Secure Connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OobData {
    /// Random value (r)
    pub r: [u8; 16],
    /// Confirm value (c = f4(PKx, PKx, r, 0))
    pub c: [u8; 16],
}

/// Pairing Role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingRole {
    /// Initiator of the pairing (Central)
    #[default]
    Initiator,
    /// Responder to pairing (Peripheral)
    Responder,
}

impl PairingRole {
    pub fn index(&self) -> usize {
        match self {
            PairingRole::Initiator => 0,
            PairingRole::Responder => 1,
        }
    }
}

/// Security level for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    /// No security (unencrypted)
    #[default]
    None = 0,
    /// Encryption without authentication (Just Works)
    EncryptionOnly = 1,
    /// Encryption with authentication (MITM protection)
    EncryptionWithAuthentication = 2,
    /// Secure Connections with encryption and authentication
    SecureConnections = 3,
}

impl SecurityLevel {
    /// Check if this security level includes encryption
    pub fn is_encrypted(&self) -> bool {
        *self >= SecurityLevel::EncryptionOnly
    }

    /// Check if this security level includes authentication
    pub fn is_authenticated(&self) -> bool {
        *self >= SecurityLevel::EncryptionWithAuthentication
    }
}

/// Keypress notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypressType {
    EntryStarted,
    DigitEntered,
    DigitErased,
    Cleared,
    EntryCompleted,
}

impl KeypressType {
    pub fn to_u8(&self) -> u8 {
        match self {
            KeypressType::EntryStarted => SMP_SC_KEY_STARTED,
            KeypressType::DigitEntered => SMP_SC_KEY_ENTERED,
            KeypressType::DigitErased => SMP_SC_KEY_ERASED,
            KeypressType::Cleared => SMP_SC_KEY_CLEARED,
            KeypressType::EntryCompleted => SMP_SC_KEY_COMPLT,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_SC_KEY_STARTED => Some(KeypressType::EntryStarted),
            SMP_SC_KEY_ENTERED => Some(KeypressType::DigitEntered),
            SMP_SC_KEY_ERASED => Some(KeypressType::DigitErased),
            SMP_SC_KEY_CLEARED => Some(KeypressType::Cleared),
            SMP_SC_KEY_COMPLT => Some(KeypressType::EntryCompleted),
            _ => None,
        }
    }
}

/// Events delivered to the registered application callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// Peer asked for pairing or security; answer with `security_grant`
    SecurityRequest { peer: Address, auth_req: AuthReq },
    /// Local pairing parameters needed; answer with `io_capability_reply`
    IoCapabilityRequest { peer: Address },
    /// Show this passkey to the user
    PasskeyNotification { peer: Address, passkey: u32 },
    /// Ask the user for the passkey; answer with `passkey_reply`
    PasskeyRequest { peer: Address },
    /// Legacy OOB TK needed; answer with `oob_data_reply`
    OobRequest { peer: Address },
    /// Peer's SC OOB data needed; answer with `sc_oob_data_reply`
    ScOobRequest { peer: Address },
    /// Show the six digit value and ask for confirmation; answer with
    /// `numeric_comparison_reply`
    NumericComparison { peer: Address, value: u32 },
    /// Peer reported a keypress during passkey entry
    KeypressNotification { peer: Address, kind: KeypressType },
    /// Pairing finished, successfully or not
    PairingComplete {
        peer: Address,
        reason: Reason,
        sec_level: SecurityLevel,
        is_pair_cancel: bool,
    },
}

/// Application callback
pub type SmpEventCallback = Box<dyn FnMut(SmpEvent) -> SmpResult<()> + Send>;
