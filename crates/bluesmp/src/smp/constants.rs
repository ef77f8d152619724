//! Constants for the Security Manager Protocol

// SMP command codes
pub const SMP_OPCODE_PAIRING_REQ: u8 = 0x01;
pub const SMP_OPCODE_PAIRING_RSP: u8 = 0x02;
pub const SMP_OPCODE_CONFIRM: u8 = 0x03;
pub const SMP_OPCODE_RAND: u8 = 0x04;
pub const SMP_OPCODE_PAIRING_FAILED: u8 = 0x05;
pub const SMP_OPCODE_ENCRYPT_INFO: u8 = 0x06;
pub const SMP_OPCODE_MASTER_ID: u8 = 0x07;
pub const SMP_OPCODE_IDENTITY_INFO: u8 = 0x08;
pub const SMP_OPCODE_ID_ADDR: u8 = 0x09;
pub const SMP_OPCODE_SIGN_INFO: u8 = 0x0A;
pub const SMP_OPCODE_SEC_REQ: u8 = 0x0B;
pub const SMP_OPCODE_PAIR_PUBLIC_KEY: u8 = 0x0C;
pub const SMP_OPCODE_PAIR_DHKEY_CHECK: u8 = 0x0D;
pub const SMP_OPCODE_PAIR_KEYPR_NOTIF: u8 = 0x0E;
pub const SMP_OPCODE_MAX: u8 = SMP_OPCODE_PAIR_KEYPR_NOTIF;
pub const SMP_OPCODE_MIN: u8 = SMP_OPCODE_PAIRING_REQ;
// Internal slot for the SC commitment. Goes out on the wire as CONFIRM.
pub const SMP_OPCODE_PAIR_COMMITM: u8 = 0x0F;

/// Fixed PDU size for each command code, opcode octet included. Index 0 is
/// unused.
pub const SMP_CMD_SIZES: [usize; SMP_OPCODE_PAIR_COMMITM as usize + 1] = [
    0,  // unused
    7,  // pairing request
    7,  // pairing response
    17, // confirm
    17, // random
    2,  // pairing failed
    17, // encryption information
    11, // master identification
    17, // identity information
    8,  // identity address information
    17, // signing information
    2,  // security request
    65, // public key
    17, // DHKey check
    2,  // keypress notification
    17, // commitment
];

// Pairing Failed reason codes
pub const SMP_PASSKEY_ENTRY_FAIL: u8 = 0x01;
pub const SMP_OOB_FAIL: u8 = 0x02;
pub const SMP_PAIR_AUTH_FAIL: u8 = 0x03;
pub const SMP_CONFIRM_VALUE_ERR: u8 = 0x04;
pub const SMP_PAIR_NOT_SUPPORT: u8 = 0x05;
pub const SMP_ENC_KEY_SIZE: u8 = 0x06;
pub const SMP_INVALID_CMD: u8 = 0x07;
pub const SMP_PAIR_FAIL_UNKNOWN: u8 = 0x08;
pub const SMP_REPEATED_ATTEMPTS: u8 = 0x09;
pub const SMP_INVALID_PARAMETERS: u8 = 0x0A;
pub const SMP_DHKEY_CHK_FAIL: u8 = 0x0B;
pub const SMP_NUMERIC_COMPAR_FAIL: u8 = 0x0C;
pub const SMP_BR_PARING_IN_PROGR: u8 = 0x0D;
pub const SMP_XTRANS_DERIVE_NOT_ALLOW: u8 = 0x0E;
pub const SMP_MAX_FAIL_RSN_CODE: u8 = SMP_XTRANS_DERIVE_NOT_ALLOW;

// Local-only completion reasons, never sent on the wire
pub const SMP_PAIR_INTERNAL_ERR: u8 = 0x0F;
pub const SMP_UNKNOWN_IO_CAP: u8 = 0x10;
pub const SMP_INIT_FAIL: u8 = 0x11;
pub const SMP_CONFIRM_FAIL: u8 = 0x12;
pub const SMP_BUSY: u8 = 0x13;
pub const SMP_ENC_FAIL: u8 = 0x14;
pub const SMP_STARTED: u8 = 0x15;
pub const SMP_RSP_TIMEOUT: u8 = 0x16;
pub const SMP_CONN_TOUT: u8 = 0x17;
pub const SMP_SUCCESS: u8 = 0x00;

// IO Capability values
pub const SMP_IO_CAP_OUT: u8 = 0x00;
pub const SMP_IO_CAP_IO: u8 = 0x01;
pub const SMP_IO_CAP_IN: u8 = 0x02;
pub const SMP_IO_CAP_NONE: u8 = 0x03;
pub const SMP_IO_CAP_KBDISP: u8 = 0x04;
pub const SMP_IO_CAP_MAX: u8 = 0x05;

// OOB data flag
pub const SMP_OOB_NONE: u8 = 0x00;
pub const SMP_OOB_PRESENT: u8 = 0x01;

// Authentication Requirements bit masks
pub const SMP_AUTH_NO_BOND: u8 = 0x00;
pub const SMP_AUTH_GEN_BOND: u8 = 0x01;
pub const SMP_AUTH_BOND_MASK: u8 = 0x03;
pub const SMP_AUTH_YN_BIT: u8 = 0x04;
pub const SMP_SC_SUPPORT_BIT: u8 = 0x08;
pub const SMP_KP_SUPPORT_BIT: u8 = 0x10;
pub const SMP_H7_SUPPORT_BIT: u8 = 0x20;

// Key distribution bit masks
pub const SMP_SEC_KEY_TYPE_ENC: u8 = 0x01;
pub const SMP_SEC_KEY_TYPE_ID: u8 = 0x02;
pub const SMP_SEC_KEY_TYPE_CSRK: u8 = 0x04;
pub const SMP_SEC_KEY_TYPE_LK: u8 = 0x08;
pub const SMP_BR_SEC_DEFAULT_KEY: u8 = SMP_SEC_KEY_TYPE_ID | SMP_SEC_KEY_TYPE_CSRK;

// Encryption key size limits
pub const SMP_ENCR_KEY_SIZE_MIN: u8 = 7;
pub const SMP_ENCR_KEY_SIZE_MAX: u8 = 16;

// Keypress notification types
pub const SMP_SC_KEY_STARTED: u8 = 0x00;
pub const SMP_SC_KEY_ENTERED: u8 = 0x01;
pub const SMP_SC_KEY_ERASED: u8 = 0x02;
pub const SMP_SC_KEY_CLEARED: u8 = 0x03;
pub const SMP_SC_KEY_COMPLT: u8 = 0x04;
pub const SMP_SC_KEY_OUT_OF_RANGE: u8 = 0x05;

// Response wait timeout, seconds
pub const SMP_WAIT_FOR_RSP_TOUT: u64 = 30;

// Passkey entry
pub const SMP_PASSKEY_MAX: u32 = 999_999;
pub const SMP_SC_PASSKEY_ROUNDS: u8 = 20;

// Key and value lengths
pub const BT_OCTET16_LEN: usize = 16;
pub const BT_OCTET32_LEN: usize = 32;
pub const BT_OCTET8_LEN: usize = 8;
pub const SMP_PUBLIC_KEY_LEN: usize = 2 * BT_OCTET32_LEN;
