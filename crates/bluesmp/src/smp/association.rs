//! Association model selection
//!
//! Pure lookup of the phase 2 key generation method from both sides'
//! pairing parameters. The two tables reproduce the IO capability mapping
//! of Core Spec Vol 3 Part H, indexed `[role][a][b]` where the initiator
//! uses `(a, b) = (peer, local)` and the responder `(a, b) = (local, peer)`.

use super::constants::*;
use super::types::*;

use AssociationModel::{
    EncryptionOnly as JW, KeyNotification as KN, Passkey as PK, ScJustWorks as SJW,
    ScNumericComparison as NC, ScPasskeyDisplay as DSP, ScPasskeyEntry as ENT,
};

const IO_CAPS: usize = SMP_IO_CAP_MAX as usize;

type AssociationTable = [[[AssociationModel; IO_CAPS]; IO_CAPS]; 2];

#[rustfmt::skip]
static LEGACY_ASSOCIATION_TABLE: AssociationTable = [
    // initiator: rows are the peer (responder), columns the local side
    [
        /* DisplayOnly */     [JW, JW, PK, JW, PK],
        /* DisplayYesNo */    [JW, JW, PK, JW, PK],
        /* KeyboardOnly */    [KN, KN, PK, JW, KN],
        /* NoInputNoOutput */ [JW, JW, JW, JW, JW],
        /* KeyboardDisplay */ [KN, KN, PK, JW, KN],
    ],
    // responder: rows are the local side, columns the peer (initiator)
    [
        /* DisplayOnly */     [JW, JW, KN, JW, KN],
        /* DisplayYesNo */    [JW, JW, KN, JW, KN],
        /* KeyboardOnly */    [PK, PK, PK, JW, PK],
        /* NoInputNoOutput */ [JW, JW, JW, JW, JW],
        /* KeyboardDisplay */ [PK, PK, KN, JW, PK],
    ],
];

#[rustfmt::skip]
static SC_ASSOCIATION_TABLE: AssociationTable = [
    [
        /* DisplayOnly */     [SJW, SJW, ENT, SJW, ENT],
        /* DisplayYesNo */    [SJW, NC,  ENT, SJW, NC ],
        /* KeyboardOnly */    [DSP, DSP, ENT, SJW, DSP],
        /* NoInputNoOutput */ [SJW, SJW, SJW, SJW, SJW],
        /* KeyboardDisplay */ [DSP, NC,  ENT, SJW, NC ],
    ],
    [
        /* DisplayOnly */     [SJW, SJW, DSP, SJW, DSP],
        /* DisplayYesNo */    [SJW, NC,  DSP, SJW, NC ],
        /* KeyboardOnly */    [ENT, ENT, ENT, SJW, ENT],
        /* NoInputNoOutput */ [SJW, SJW, SJW, SJW, SJW],
        /* KeyboardDisplay */ [ENT, NC,  DSP, SJW, NC ],
    ],
];

/// Everything the selection depends on, as exchanged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationInputs {
    pub role: PairingRole,
    pub peer_io_cap: u8,
    pub local_io_cap: u8,
    pub peer_oob_flag: u8,
    pub local_oob_flag: u8,
    pub peer_auth_req: AuthReq,
    pub local_auth_req: AuthReq,
}

impl AssociationInputs {
    /// Secure Connections is used only when both sides set the SC bit.
    pub fn use_sc(&self) -> bool {
        self.peer_auth_req.contains(AuthReq::SC) && self.local_auth_req.contains(AuthReq::SC)
    }

    fn mitm_required(&self) -> bool {
        self.peer_auth_req.contains(AuthReq::MITM) || self.local_auth_req.contains(AuthReq::MITM)
    }

    fn lookup(&self, table: &AssociationTable) -> AssociationModel {
        let (a, b) = match self.role {
            PairingRole::Initiator => (self.peer_io_cap, self.local_io_cap),
            PairingRole::Responder => (self.local_io_cap, self.peer_io_cap),
        };
        if a >= SMP_IO_CAP_MAX || b >= SMP_IO_CAP_MAX {
            return AssociationModel::OutOfRange;
        }
        table[self.role.index()][usize::from(a)][usize::from(b)]
    }
}

fn select_legacy_model(inputs: &AssociationInputs) -> AssociationModel {
    if inputs.peer_oob_flag == SMP_OOB_PRESENT && inputs.local_oob_flag == SMP_OOB_PRESENT {
        return AssociationModel::Oob;
    }
    if !inputs.mitm_required() {
        return AssociationModel::EncryptionOnly;
    }
    inputs.lookup(&LEGACY_ASSOCIATION_TABLE)
}

fn select_sc_model(inputs: &AssociationInputs) -> AssociationModel {
    if inputs.peer_oob_flag == SMP_OOB_PRESENT || inputs.local_oob_flag == SMP_OOB_PRESENT {
        return AssociationModel::ScOob;
    }
    if !inputs.mitm_required() {
        return AssociationModel::ScJustWorks;
    }
    inputs.lookup(&SC_ASSOCIATION_TABLE)
}

/// Pick the association model for an already latched SC/legacy decision.
pub fn select_association_model(inputs: &AssociationInputs, use_sc: bool) -> AssociationModel {
    if use_sc {
        select_sc_model(inputs)
    } else {
        select_legacy_model(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(role: PairingRole, peer_io: IoCapability, local_io: IoCapability) -> AssociationInputs {
        AssociationInputs {
            role,
            peer_io_cap: peer_io.to_u8(),
            local_io_cap: local_io.to_u8(),
            peer_oob_flag: SMP_OOB_NONE,
            local_oob_flag: SMP_OOB_NONE,
            peer_auth_req: AuthReq::BONDING | AuthReq::MITM,
            local_auth_req: AuthReq::BONDING | AuthReq::MITM,
        }
    }

    const ALL_IO: [IoCapability; 5] = [
        IoCapability::DisplayOnly,
        IoCapability::DisplayYesNo,
        IoCapability::KeyboardOnly,
        IoCapability::NoInputNoOutput,
        IoCapability::KeyboardDisplay,
    ];

    #[test]
    fn test_legacy_display_yes_no_initiator_against_keyboard_only() {
        let init = inputs(
            PairingRole::Initiator,
            IoCapability::KeyboardOnly,
            IoCapability::DisplayYesNo,
        );
        assert!(!init.use_sc());
        let model = select_association_model(&init, false);
        assert_eq!(model, AssociationModel::KeyNotification);
        assert_eq!(model.method(), Some(PairingMethod::PasskeyEntry));

        let resp = inputs(
            PairingRole::Responder,
            IoCapability::DisplayYesNo,
            IoCapability::KeyboardOnly,
        );
        assert_eq!(select_association_model(&resp, false), AssociationModel::Passkey);
    }

    #[test]
    fn test_sc_oob_short_circuits_io_table() {
        for local in ALL_IO {
            for peer in ALL_IO {
                let mut i = inputs(PairingRole::Initiator, peer, local);
                i.peer_auth_req |= AuthReq::SC;
                i.local_auth_req |= AuthReq::SC;
                i.peer_oob_flag = SMP_OOB_PRESENT;
                i.local_oob_flag = SMP_OOB_PRESENT;
                assert!(i.use_sc());
                assert_eq!(select_association_model(&i, true), AssociationModel::ScOob);
            }
        }
    }

    #[test]
    fn test_sc_oob_from_one_side_only() {
        let mut i = inputs(
            PairingRole::Responder,
            IoCapability::NoInputNoOutput,
            IoCapability::NoInputNoOutput,
        );
        i.local_oob_flag = SMP_OOB_PRESENT;
        assert_eq!(select_association_model(&i, true), AssociationModel::ScOob);
        // legacy needs OOB data on both sides
        assert_eq!(
            select_association_model(&i, false),
            AssociationModel::EncryptionOnly
        );
    }

    #[test]
    fn test_no_mitm_means_just_works() {
        let mut i = inputs(
            PairingRole::Initiator,
            IoCapability::KeyboardDisplay,
            IoCapability::KeyboardDisplay,
        );
        i.peer_auth_req = AuthReq::BONDING;
        i.local_auth_req = AuthReq::BONDING;
        assert_eq!(select_association_model(&i, false), AssociationModel::EncryptionOnly);
        assert_eq!(select_association_model(&i, true), AssociationModel::ScJustWorks);
    }

    #[test]
    fn test_use_sc_requires_both_sides() {
        let mut i = inputs(
            PairingRole::Initiator,
            IoCapability::DisplayYesNo,
            IoCapability::DisplayYesNo,
        );
        i.local_auth_req |= AuthReq::SC;
        assert!(!i.use_sc());
        i.peer_auth_req |= AuthReq::SC;
        assert!(i.use_sc());
        assert_eq!(
            select_association_model(&i, i.use_sc()),
            AssociationModel::ScNumericComparison
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        for local in ALL_IO {
            for peer in ALL_IO {
                let i = inputs(PairingRole::Responder, peer, local);
                for use_sc in [false, true] {
                    let first = select_association_model(&i, use_sc);
                    assert_eq!(first, select_association_model(&i, use_sc));
                }
            }
        }
    }

    #[test]
    fn test_role_swap_agrees_on_method() {
        for use_sc in [false, true] {
            for x in ALL_IO {
                for y in ALL_IO {
                    let init = select_association_model(&inputs(PairingRole::Initiator, x, y), use_sc);
                    let resp = select_association_model(&inputs(PairingRole::Responder, y, x), use_sc);
                    assert_eq!(init.method(), resp.method(), "{:?} vs {:?}", x, y);
                    assert_eq!(init.is_secure_connections(), use_sc);

                    // at most one side displays the passkey
                    let both_display = matches!(
                        (init, resp),
                        (AssociationModel::KeyNotification, AssociationModel::KeyNotification)
                            | (AssociationModel::ScPasskeyDisplay, AssociationModel::ScPasskeyDisplay)
                    );
                    assert!(!both_display, "{:?} vs {:?}", x, y);
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_io_cap() {
        let mut i = inputs(
            PairingRole::Initiator,
            IoCapability::DisplayOnly,
            IoCapability::DisplayOnly,
        );
        i.peer_io_cap = SMP_IO_CAP_MAX;
        assert_eq!(select_association_model(&i, false), AssociationModel::OutOfRange);
        assert_eq!(select_association_model(&i, true), AssociationModel::OutOfRange);
        assert_eq!(AssociationModel::OutOfRange.to_u8(), 9);
        assert_eq!(AssociationModel::OutOfRange.method(), None);
    }

    #[test]
    fn test_keyboard_only_pair_both_enter() {
        let init = select_association_model(
            &inputs(PairingRole::Initiator, IoCapability::KeyboardOnly, IoCapability::KeyboardOnly),
            true,
        );
        let resp = select_association_model(
            &inputs(PairingRole::Responder, IoCapability::KeyboardOnly, IoCapability::KeyboardOnly),
            true,
        );
        assert_eq!(init, AssociationModel::ScPasskeyEntry);
        assert_eq!(resp, AssociationModel::ScPasskeyEntry);
    }
}
