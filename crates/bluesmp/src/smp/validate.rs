//! Parameter validation for received SMP commands
//!
//! Two independent checks run on every inbound PDU: the exact length for
//! the opcode, then the per-opcode field ranges. Both are pure.

use super::constants::*;
use log::warn;

/// Fixed size of a command, opcode octet included. `None` for opcode 0 and
/// anything past the commitment slot.
pub fn command_size(cmd_code: u8) -> Option<usize> {
    if cmd_code < SMP_OPCODE_MIN || cmd_code > SMP_OPCODE_PAIR_COMMITM {
        return None;
    }
    Some(SMP_CMD_SIZES[usize::from(cmd_code)])
}

fn command_len_is_valid(cmd_code: u8, len: usize) -> bool {
    command_size(cmd_code) == Some(len)
}

fn pairing_params_are_valid(pdu: &[u8]) -> bool {
    let io_cap = pdu[1];
    let oob_flag = pdu[2];
    let bond_flags = pdu[3] & SMP_AUTH_BOND_MASK;
    let enc_size = pdu[4];

    if io_cap >= SMP_IO_CAP_MAX {
        return false;
    }
    if oob_flag != SMP_OOB_NONE && oob_flag != SMP_OOB_PRESENT {
        return false;
    }
    if bond_flags != SMP_AUTH_NO_BOND && bond_flags != SMP_AUTH_GEN_BOND {
        return false;
    }
    (SMP_ENCR_KEY_SIZE_MIN..=SMP_ENCR_KEY_SIZE_MAX).contains(&enc_size)
}

fn keypress_is_valid(pdu: &[u8]) -> bool {
    pdu[1] < SMP_SC_KEY_OUT_OF_RANGE
}

fn command_params_are_valid(cmd_code: u8, pdu: &[u8]) -> bool {
    match cmd_code {
        SMP_OPCODE_PAIRING_REQ | SMP_OPCODE_PAIRING_RSP => pairing_params_are_valid(pdu),
        SMP_OPCODE_PAIR_KEYPR_NOTIF => keypress_is_valid(pdu),
        _ => true,
    }
}

/// Returns true when the PDU must be rejected with Pairing Failed
/// (invalid parameters).
pub fn has_invalid_parameters(pdu: &[u8]) -> bool {
    let Some(&cmd_code) = pdu.first() else {
        return true;
    };

    if !command_len_is_valid(cmd_code, pdu.len()) {
        warn!(
            "SMP: rejecting cmd 0x{:02x} with bad length {}",
            cmd_code,
            pdu.len()
        );
        return true;
    }

    if !command_params_are_valid(cmd_code, pdu) {
        warn!("SMP: rejecting cmd 0x{:02x} with out of range parameters", cmd_code);
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu_of(cmd_code: u8) -> Vec<u8> {
        let mut pdu = vec![0u8; command_size(cmd_code).unwrap()];
        pdu[0] = cmd_code;
        if cmd_code == SMP_OPCODE_PAIRING_REQ || cmd_code == SMP_OPCODE_PAIRING_RSP {
            pdu[4] = SMP_ENCR_KEY_SIZE_MAX;
        }
        pdu
    }

    #[test]
    fn test_every_opcode_accepts_its_fixed_length() {
        for code in SMP_OPCODE_MIN..=SMP_OPCODE_PAIR_COMMITM {
            let pdu = pdu_of(code);
            assert!(!has_invalid_parameters(&pdu), "opcode 0x{:02x}", code);
        }
    }

    #[test]
    fn test_every_opcode_rejects_other_lengths() {
        for code in SMP_OPCODE_MIN..=SMP_OPCODE_PAIR_COMMITM {
            let mut longer = pdu_of(code);
            longer.push(0);
            assert!(has_invalid_parameters(&longer), "opcode 0x{:02x}", code);

            let mut shorter = pdu_of(code);
            shorter.pop();
            assert!(has_invalid_parameters(&shorter), "opcode 0x{:02x}", code);
        }
    }

    #[test]
    fn test_unknown_opcodes_rejected() {
        assert!(has_invalid_parameters(&[]));
        assert!(has_invalid_parameters(&[0x00]));
        assert!(has_invalid_parameters(&[0x10, 0x00]));
        assert!(has_invalid_parameters(&[0xff; 17]));
        assert_eq!(command_size(0), None);
        assert_eq!(command_size(0x10), None);
    }

    #[test]
    fn test_pairing_request_ranges() {
        let good = [SMP_OPCODE_PAIRING_REQ, 0x04, 0x01, 0x2d, 0x07, 0x0f, 0x0f];
        assert!(!has_invalid_parameters(&good));

        let mut bad_io = good;
        bad_io[1] = SMP_IO_CAP_MAX;
        assert!(has_invalid_parameters(&bad_io));

        let mut bad_oob = good;
        bad_oob[2] = 0x02;
        assert!(has_invalid_parameters(&bad_oob));

        let mut reserved_bonding = good;
        reserved_bonding[3] = 0x02;
        assert!(has_invalid_parameters(&reserved_bonding));
        reserved_bonding[3] = 0x03;
        assert!(has_invalid_parameters(&reserved_bonding));

        let mut small_key = good;
        small_key[4] = 6;
        assert!(has_invalid_parameters(&small_key));

        let mut big_key = good;
        big_key[4] = 17;
        assert!(has_invalid_parameters(&big_key));
    }

    #[test]
    fn test_keypress_range() {
        assert!(!has_invalid_parameters(&[SMP_OPCODE_PAIR_KEYPR_NOTIF, 0x04]));
        assert!(has_invalid_parameters(&[SMP_OPCODE_PAIR_KEYPR_NOTIF, 0x05]));
    }

    #[test]
    fn test_other_fields_are_not_range_checked() {
        assert!(!has_invalid_parameters(&[SMP_OPCODE_PAIRING_FAILED, 0xff]));
        assert!(!has_invalid_parameters(&[SMP_OPCODE_SEC_REQ, 0xff]));
    }
}
