//! SMP command codec
//!
//! Outbound PDUs are built from the control block, one builder per opcode.
//! Inbound PDUs are decoded into [`Command`] only after
//! [`has_invalid_parameters`](super::validate::has_invalid_parameters)
//! accepted them.

use super::constants::*;
use super::control::ControlBlock;
use super::crypto::PublicKey;
use super::types::*;
use super::validate::command_size;
use crate::gap::{Address, AddressType, BdAddr};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Pairing Request / Pairing Response parameters from the local side of
/// the control block, opcode included. Stored as `preq`/`prsp` for c1.
pub fn pairing_params(cmd_code: u8, cb: &ControlBlock) -> [u8; 7] {
    [
        cmd_code,
        cb.local_io_capability,
        cb.loc_oob_flag,
        cb.loc_auth_req.bits(),
        cb.loc_enc_size,
        cb.local_i_key.bits(),
        cb.local_r_key.bits(),
    ]
}

/// Received pairing parameters back in wire form, reserved bits included.
pub fn features_params(cmd_code: u8, features: &PairingFeatures) -> [u8; 7] {
    [
        cmd_code,
        features.io_capability.to_u8(),
        if features.oob_data_present {
            SMP_OOB_PRESENT
        } else {
            SMP_OOB_NONE
        },
        features.auth_req.bits(),
        features.max_key_size,
        features.initiator_key_dist.bits(),
        features.responder_key_dist.bits(),
    ]
}

fn build_pairing_req(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_all(&pairing_params(SMP_OPCODE_PAIRING_REQ, cb))?;
    Ok(())
}

fn build_pairing_rsp(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_all(&pairing_params(SMP_OPCODE_PAIRING_RSP, cb))?;
    Ok(())
}

fn build_confirm(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_CONFIRM)?;
    buf.write_all(&cb.confirm)?;
    Ok(())
}

fn build_rand(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_RAND)?;
    if cb.le_secure_connections_mode_is_used {
        buf.write_all(&cb.local_random)?;
    } else {
        buf.write_all(&cb.rand)?;
    }
    Ok(())
}

fn build_pairing_fail(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_PAIRING_FAILED)?;
    buf.write_u8(cb.failure.to_u8())?;
    Ok(())
}

fn build_encrypt_info(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_ENCRYPT_INFO)?;
    buf.write_all(&cb.ltk)?;
    Ok(())
}

fn build_master_id(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_MASTER_ID)?;
    buf.write_u16::<LittleEndian>(cb.ediv)?;
    buf.write_all(&cb.enc_rand)?;
    Ok(())
}

fn build_identity_info(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_IDENTITY_INFO)?;
    buf.write_all(&cb.local_irk)?;
    Ok(())
}

fn build_id_addr(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_ID_ADDR)?;
    buf.write_u8(u8::from(cb.local_addr.kind.is_random()))?;
    buf.write_all(&cb.local_addr.addr.bytes)?;
    Ok(())
}

fn build_signing_info(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_SIGN_INFO)?;
    buf.write_all(&cb.csrk)?;
    Ok(())
}

fn build_security_req(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_SEC_REQ)?;
    buf.write_u8(cb.loc_auth_req.bits())?;
    Ok(())
}

fn build_public_key(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_PAIR_PUBLIC_KEY)?;
    buf.write_all(&cb.loc_publ_key.x)?;
    buf.write_all(&cb.loc_publ_key.y)?;
    Ok(())
}

fn build_dhkey_check(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_PAIR_DHKEY_CHECK)?;
    buf.write_all(&cb.dhkey_check)?;
    Ok(())
}

fn build_keypress_notif(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_PAIR_KEYPR_NOTIF)?;
    buf.write_u8(cb.local_keypress)?;
    Ok(())
}

// The commitment travels under the Pairing Confirm opcode.
fn build_commitment(cb: &ControlBlock, buf: &mut Vec<u8>) -> SmpResult<()> {
    buf.write_u8(SMP_OPCODE_CONFIRM)?;
    buf.write_all(&cb.commitment)?;
    Ok(())
}

type Builder = fn(&ControlBlock, &mut Vec<u8>) -> SmpResult<()>;

fn builder_for(cmd_code: u8) -> Option<Builder> {
    let builder: Builder = match cmd_code {
        SMP_OPCODE_PAIRING_REQ => build_pairing_req,
        SMP_OPCODE_PAIRING_RSP => build_pairing_rsp,
        SMP_OPCODE_CONFIRM => build_confirm,
        SMP_OPCODE_RAND => build_rand,
        SMP_OPCODE_PAIRING_FAILED => build_pairing_fail,
        SMP_OPCODE_ENCRYPT_INFO => build_encrypt_info,
        SMP_OPCODE_MASTER_ID => build_master_id,
        SMP_OPCODE_IDENTITY_INFO => build_identity_info,
        SMP_OPCODE_ID_ADDR => build_id_addr,
        SMP_OPCODE_SIGN_INFO => build_signing_info,
        SMP_OPCODE_SEC_REQ => build_security_req,
        SMP_OPCODE_PAIR_PUBLIC_KEY => build_public_key,
        SMP_OPCODE_PAIR_DHKEY_CHECK => build_dhkey_check,
        SMP_OPCODE_PAIR_KEYPR_NOTIF => build_keypress_notif,
        SMP_OPCODE_PAIR_COMMITM => build_commitment,
        _ => return None,
    };
    Some(builder)
}

/// Build the PDU for `cmd_code` from the control block.
pub fn build_command(cmd_code: u8, cb: &ControlBlock) -> SmpResult<Vec<u8>> {
    let builder = builder_for(cmd_code).ok_or(SmpError::CommandNotSupported)?;
    let size = command_size(cmd_code).ok_or(SmpError::CommandNotSupported)?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| SmpError::NoResources)?;
    builder(cb, &mut buf)?;
    Ok(buf)
}

/// Pairing Failed PDU for a reason, outside any control block.
pub fn build_pairing_failed(reason: Reason) -> Vec<u8> {
    vec![SMP_OPCODE_PAIRING_FAILED, reason.to_u8()]
}

/// A decoded inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PairingRequest(PairingFeatures),
    PairingResponse(PairingFeatures),
    /// Legacy confirm, or an SC commitment sent under the confirm opcode
    Confirm([u8; 16]),
    Random([u8; 16]),
    PairingFailed(Reason),
    EncryptionInformation([u8; 16]),
    MasterIdentification { ediv: u16, rand: [u8; 8] },
    IdentityInformation([u8; 16]),
    IdentityAddress(Address),
    SigningInformation([u8; 16]),
    SecurityRequest(AuthReq),
    PublicKey(PublicKey),
    DhkeyCheck([u8; 16]),
    KeypressNotification(KeypressType),
}

fn read_octet16(cursor: &mut Cursor<&[u8]>) -> SmpResult<[u8; 16]> {
    let mut value = [0u8; 16];
    cursor.read_exact(&mut value)?;
    Ok(value)
}

fn read_features(cursor: &mut Cursor<&[u8]>) -> SmpResult<PairingFeatures> {
    let io_cap = cursor.read_u8()?;
    let oob = cursor.read_u8()?;
    let auth_req = cursor.read_u8()?;
    let max_key_size = cursor.read_u8()?;
    let initiator_key_dist = cursor.read_u8()?;
    let responder_key_dist = cursor.read_u8()?;

    let io_capability = IoCapability::from_u8(io_cap)
        .ok_or_else(|| SmpError::InvalidParameter(format!("io capability {}", io_cap)))?;

    Ok(PairingFeatures {
        io_capability,
        oob_data_present: oob == SMP_OOB_PRESENT,
        auth_req: AuthReq::from_bits_retain(auth_req),
        max_key_size,
        initiator_key_dist: KeyDist::from_bits_retain(initiator_key_dist),
        responder_key_dist: KeyDist::from_bits_retain(responder_key_dist),
    })
}

impl Command {
    /// Decode a PDU of exactly the fixed length for its opcode.
    pub fn parse(pdu: &[u8]) -> SmpResult<Self> {
        let (&cmd_code, _) = pdu
            .split_first()
            .ok_or_else(|| SmpError::InvalidParameter("empty PDU".into()))?;
        if command_size(cmd_code) != Some(pdu.len()) {
            return Err(SmpError::InvalidParameter(format!(
                "cmd 0x{:02x} with length {}",
                cmd_code,
                pdu.len()
            )));
        }

        let mut cursor = Cursor::new(&pdu[1..]);
        let command = match cmd_code {
            SMP_OPCODE_PAIRING_REQ => Command::PairingRequest(read_features(&mut cursor)?),
            SMP_OPCODE_PAIRING_RSP => Command::PairingResponse(read_features(&mut cursor)?),
            SMP_OPCODE_CONFIRM => Command::Confirm(read_octet16(&mut cursor)?),
            SMP_OPCODE_RAND => Command::Random(read_octet16(&mut cursor)?),
            SMP_OPCODE_PAIRING_FAILED => {
                let code = cursor.read_u8()?;
                Command::PairingFailed(Reason::from_wire(code).unwrap_or(Reason::UnspecifiedReason))
            }
            SMP_OPCODE_ENCRYPT_INFO => Command::EncryptionInformation(read_octet16(&mut cursor)?),
            SMP_OPCODE_MASTER_ID => {
                let ediv = cursor.read_u16::<LittleEndian>()?;
                let mut rand = [0u8; 8];
                cursor.read_exact(&mut rand)?;
                Command::MasterIdentification { ediv, rand }
            }
            SMP_OPCODE_IDENTITY_INFO => Command::IdentityInformation(read_octet16(&mut cursor)?),
            SMP_OPCODE_ID_ADDR => {
                let kind = AddressType::from(cursor.read_u8()?);
                let mut bytes = [0u8; 6];
                cursor.read_exact(&mut bytes)?;
                Command::IdentityAddress(Address::new(kind, BdAddr::new(bytes)))
            }
            SMP_OPCODE_SIGN_INFO => Command::SigningInformation(read_octet16(&mut cursor)?),
            SMP_OPCODE_SEC_REQ => {
                Command::SecurityRequest(AuthReq::from_bits_truncate(cursor.read_u8()?))
            }
            SMP_OPCODE_PAIR_PUBLIC_KEY => {
                let mut key = [0u8; SMP_PUBLIC_KEY_LEN];
                cursor.read_exact(&mut key)?;
                Command::PublicKey(PublicKey::from_bytes(&key))
            }
            SMP_OPCODE_PAIR_DHKEY_CHECK => Command::DhkeyCheck(read_octet16(&mut cursor)?),
            SMP_OPCODE_PAIR_KEYPR_NOTIF => {
                let value = cursor.read_u8()?;
                let kind = KeypressType::from_u8(value).ok_or_else(|| {
                    SmpError::InvalidParameter(format!("keypress type {}", value))
                })?;
                Command::KeypressNotification(kind)
            }
            _ => return Err(SmpError::CommandNotSupported),
        };
        Ok(command)
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::PairingRequest(_) => SMP_OPCODE_PAIRING_REQ,
            Command::PairingResponse(_) => SMP_OPCODE_PAIRING_RSP,
            Command::Confirm(_) => SMP_OPCODE_CONFIRM,
            Command::Random(_) => SMP_OPCODE_RAND,
            Command::PairingFailed(_) => SMP_OPCODE_PAIRING_FAILED,
            Command::EncryptionInformation(_) => SMP_OPCODE_ENCRYPT_INFO,
            Command::MasterIdentification { .. } => SMP_OPCODE_MASTER_ID,
            Command::IdentityInformation(_) => SMP_OPCODE_IDENTITY_INFO,
            Command::IdentityAddress(_) => SMP_OPCODE_ID_ADDR,
            Command::SigningInformation(_) => SMP_OPCODE_SIGN_INFO,
            Command::SecurityRequest(_) => SMP_OPCODE_SEC_REQ,
            Command::PublicKey(_) => SMP_OPCODE_PAIR_PUBLIC_KEY,
            Command::DhkeyCheck(_) => SMP_OPCODE_PAIR_DHKEY_CHECK,
            Command::KeypressNotification(_) => SMP_OPCODE_PAIR_KEYPR_NOTIF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smp::validate::has_invalid_parameters;

    fn populated_cb() -> ControlBlock {
        let mut cb = ControlBlock::new();
        cb.local_addr = Address::random([0xc1, 0xcf, 0x2d, 0x70, 0x13, 0xc7]);
        cb.local_io_capability = SMP_IO_CAP_KBDISP;
        cb.loc_oob_flag = SMP_OOB_NONE;
        cb.loc_auth_req = AuthReq::BONDING | AuthReq::MITM | AuthReq::SC;
        cb.loc_enc_size = 16;
        cb.local_i_key = KeyDist::ENC | KeyDist::ID;
        cb.local_r_key = KeyDist::ENC | KeyDist::ID | KeyDist::SIGN;
        cb.confirm = [0x11; 16];
        cb.rand = [0x22; 16];
        cb.failure = Reason::ConfirmValueFailed;
        cb.ltk = [0x33; 16];
        cb.ediv = 0xbeef;
        cb.enc_rand = [1, 2, 3, 4, 5, 6, 7, 8];
        cb.local_irk = [0x44; 16];
        cb.csrk = [0x55; 16];
        cb.loc_publ_key = PublicKey {
            x: [0x66; 32],
            y: [0x77; 32],
        };
        cb.dhkey_check = [0x88; 16];
        cb.local_keypress = SMP_SC_KEY_ENTERED;
        cb.commitment = [0x99; 16];
        cb
    }

    #[test]
    fn test_every_opcode_builds_its_fixed_length() {
        let cb = populated_cb();
        for cmd_code in SMP_OPCODE_MIN..=SMP_OPCODE_PAIR_COMMITM {
            let pdu = build_command(cmd_code, &cb).unwrap();
            assert_eq!(Some(pdu.len()), command_size(cmd_code), "cmd 0x{:02x}", cmd_code);
            assert!(!has_invalid_parameters(&pdu), "cmd 0x{:02x}", cmd_code);
            assert!(Command::parse(&pdu).is_ok(), "cmd 0x{:02x}", cmd_code);
        }
    }

    #[test]
    fn test_no_builder_outside_table() {
        let cb = populated_cb();
        assert!(build_command(0x00, &cb).is_err());
        assert!(build_command(SMP_OPCODE_PAIR_COMMITM + 1, &cb).is_err());
    }

    #[test]
    fn test_field_order() {
        let cb = populated_cb();

        let req = build_command(SMP_OPCODE_PAIRING_REQ, &cb).unwrap();
        assert_eq!(req, vec![0x01, 0x04, 0x00, 0x0d, 0x10, 0x03, 0x07]);

        let master_id = build_command(SMP_OPCODE_MASTER_ID, &cb).unwrap();
        assert_eq!(master_id, vec![0x07, 0xef, 0xbe, 1, 2, 3, 4, 5, 6, 7, 8]);

        let id_addr = build_command(SMP_OPCODE_ID_ADDR, &cb).unwrap();
        assert_eq!(id_addr, vec![0x09, 0x01, 0xc1, 0xcf, 0x2d, 0x70, 0x13, 0xc7]);

        let key = build_command(SMP_OPCODE_PAIR_PUBLIC_KEY, &cb).unwrap();
        assert_eq!(key[1..33], [0x66; 32]);
        assert_eq!(key[33..], [0x77; 32]);

        let failed = build_command(SMP_OPCODE_PAIRING_FAILED, &cb).unwrap();
        assert_eq!(failed, vec![0x05, 0x04]);
    }

    #[test]
    fn test_commitment_slot_is_not_parsed() {
        let mut pdu = vec![SMP_OPCODE_PAIR_COMMITM];
        pdu.extend_from_slice(&[0x99; 16]);
        assert!(matches!(Command::parse(&pdu), Err(SmpError::CommandNotSupported)));
    }

    #[test]
    fn test_commitment_uses_confirm_opcode() {
        let cb = populated_cb();
        let pdu = build_command(SMP_OPCODE_PAIR_COMMITM, &cb).unwrap();
        assert_eq!(pdu[0], SMP_OPCODE_CONFIRM);
        assert_eq!(Command::parse(&pdu).unwrap(), Command::Confirm([0x99; 16]));
    }

    #[test]
    fn test_rand_follows_pairing_mode() {
        let mut cb = populated_cb();
        cb.local_random = [0xab; 16];
        assert_eq!(
            Command::parse(&build_command(SMP_OPCODE_RAND, &cb).unwrap()).unwrap(),
            Command::Random([0x22; 16])
        );
        cb.le_secure_connections_mode_is_used = true;
        assert_eq!(
            Command::parse(&build_command(SMP_OPCODE_RAND, &cb).unwrap()).unwrap(),
            Command::Random([0xab; 16])
        );
    }

    #[test]
    fn test_parse_pairing_request() {
        let pdu = [0x01, 0x01, 0x00, 0x05, 0x10, 0x07, 0x03];
        let Command::PairingRequest(features) = Command::parse(&pdu).unwrap() else {
            panic!("not a pairing request");
        };
        assert_eq!(features.io_capability, IoCapability::DisplayYesNo);
        assert!(!features.oob_data_present);
        assert_eq!(features.auth_req, AuthReq::BONDING | AuthReq::MITM);
        assert_eq!(features.max_key_size, 16);
        assert_eq!(features.initiator_key_dist, KeyDist::ENC | KeyDist::ID | KeyDist::SIGN);
        assert_eq!(features.responder_key_dist, KeyDist::ENC | KeyDist::ID);
        assert_eq!(features_params(SMP_OPCODE_PAIRING_REQ, &features), pdu);
    }

    #[test]
    fn test_reserved_auth_bits_survive_for_c1() {
        let pdu = [0x02, 0x03, 0x00, 0xc1, 0x10, 0x01, 0x01];
        let Command::PairingResponse(features) = Command::parse(&pdu).unwrap() else {
            panic!("not a pairing response");
        };
        assert_eq!(features_params(SMP_OPCODE_PAIRING_RSP, &features), pdu);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(Command::parse(&[]).is_err());
        assert!(Command::parse(&[SMP_OPCODE_PAIRING_FAILED]).is_err());
        assert!(Command::parse(&[0x00, 0x00]).is_err());
        assert!(Command::parse(&[SMP_OPCODE_RAND; 16]).is_err());
    }

    #[test]
    fn test_parse_unknown_failure_reason() {
        assert_eq!(
            Command::parse(&[SMP_OPCODE_PAIRING_FAILED, 0x7f]).unwrap(),
            Command::PairingFailed(Reason::UnspecifiedReason)
        );
        assert_eq!(
            Command::parse(&build_pairing_failed(Reason::DhkeyCheckFailed)).unwrap(),
            Command::PairingFailed(Reason::DhkeyCheckFailed)
        );
    }
}
