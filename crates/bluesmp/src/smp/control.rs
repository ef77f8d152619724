//! Pairing control block
//!
//! All state of the one pairing attempt in progress. The block is reset, not
//! dropped, between attempts; [`ControlBlock::cleanup`] keeps only the
//! application callback and the trace level so no key material can leak
//! into the next attempt.

use super::association::{select_association_model, AssociationInputs};
use super::crypto::PublicKey;
use super::keys::DeviceKeys;
use super::state::Fsm;
use super::timer::ResponseTimer;
use super::types::*;
use crate::gap::Address;
use bitflags::bitflags;
use log::LevelFilter;

bitflags! {
    /// Peer artifacts that arrived before the local side was ready for them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pending: u8 {
        const HAVE_PEER_DHK_CHK = 0x01;
        const HAVE_PEER_PUBL_KEY = 0x02;
        const HAVE_PEER_COMM = 0x04;
        const HAVE_LOCAL_PUBL_KEY = 0x08;
    }
}

impl Pending {
    /// Test and clear a latch in one step.
    pub fn take(&mut self, latch: Pending) -> bool {
        let set = self.contains(latch);
        self.remove(latch);
        set
    }
}

bitflags! {
    /// Session flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PairFlags: u8 {
        /// Pairing (or the security request) started locally
        const WE_STARTED_DD = 0x01;
        /// Pairing started by the peer
        const PEER_STARTED_DD = 0x02;
        /// Legacy confirm received before the local TK was ready
        const CMD_CONFIRM = 0x04;
        /// SC OOB nonce received before the application supplied OOB data
        const HAVE_PEER_RAND = 0x08;
        /// Peer sent Pairing Failed; do not answer it
        const PEER_FAILED = 0x10;
        /// Pairing Failed already sent for this attempt
        const FAIL_SENT = 0x20;
        /// Encrypting with a stored key, no pairing
        const REENCRYPT = 0x40;
        /// Locally generated SC OOB data taken by this attempt
        const LOCAL_OOB = 0x80;
    }
}

/// Per-connection pairing state.
pub struct ControlBlock {
    pub(crate) p_callback: Option<SmpEventCallback>,
    pub trace_level: LevelFilter,

    // identity
    pub pairing_bda: Option<Address>,
    pub local_addr: Address,
    pub role: PairingRole,
    pub smp_over_br: bool,

    // negotiated capabilities
    pub local_io_capability: u8,
    pub peer_io_caps: u8,
    pub loc_oob_flag: u8,
    pub peer_oob_flag: u8,
    pub loc_auth_req: AuthReq,
    pub peer_auth_req: AuthReq,
    pub loc_enc_size: u8,
    pub peer_enc_size: u8,
    pub local_i_key: KeyDist,
    pub local_r_key: KeyDist,
    pub preq: [u8; 7],
    pub prsp: [u8; 7],

    // protocol state
    pub fsm: Fsm,
    pub flags: PairFlags,
    pub pending: Pending,
    pub rsp_timer: ResponseTimer,
    pub failure: Reason,
    pub status: Reason,
    pub is_pair_cancel: bool,
    pub local_keypress: u8,

    // cryptographic material
    pub tk: [u8; 16],
    pub confirm: [u8; 16],
    pub rconfirm: [u8; 16],
    pub rand: [u8; 16],
    pub rrand: [u8; 16],
    pub private_key: [u8; 32],
    pub loc_publ_key: PublicKey,
    pub peer_publ_key: PublicKey,
    pub dhkey: [u8; 32],
    pub commitment: [u8; 16],
    pub remote_commitment: [u8; 16],
    pub local_random: [u8; 16],
    pub peer_random: [u8; 16],
    /// SC OOB `r` values: ours, and the one received from the peer
    pub local_oob_r: [u8; 16],
    pub peer_oob_r: [u8; 16],
    pub mac_key: [u8; 16],
    pub ltk: [u8; 16],
    pub csrk: [u8; 16],
    pub dhkey_check: [u8; 16],
    pub remote_dhkey_check: [u8; 16],
    pub ediv: u16,
    pub enc_rand: [u8; 8],
    pub local_irk: [u8; 16],
    pub peer_irk: [u8; 16],

    // selection outcome
    pub selected_association_model: AssociationModel,
    pub le_secure_connections_mode_is_used: bool,
    pub le_sc_kp_notif_is_used: bool,
    pub round: u8,
    pub number_to_display: u32,
    pub sec_level: SecurityLevel,

    /// Keys collected for the key store
    pub bond: DeviceKeys,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self {
            p_callback: None,
            trace_level: LevelFilter::Info,
            pairing_bda: None,
            local_addr: Address::default(),
            role: PairingRole::default(),
            smp_over_br: false,
            local_io_capability: 0,
            peer_io_caps: 0,
            loc_oob_flag: 0,
            peer_oob_flag: 0,
            loc_auth_req: AuthReq::empty(),
            peer_auth_req: AuthReq::empty(),
            loc_enc_size: 0,
            peer_enc_size: 0,
            local_i_key: KeyDist::empty(),
            local_r_key: KeyDist::empty(),
            preq: [0; 7],
            prsp: [0; 7],
            fsm: Fsm::default(),
            flags: PairFlags::empty(),
            pending: Pending::empty(),
            rsp_timer: ResponseTimer::new(),
            failure: Reason::Success,
            status: Reason::Success,
            is_pair_cancel: false,
            local_keypress: 0,
            tk: [0; 16],
            confirm: [0; 16],
            rconfirm: [0; 16],
            rand: [0; 16],
            rrand: [0; 16],
            private_key: [0; 32],
            loc_publ_key: PublicKey::default(),
            peer_publ_key: PublicKey::default(),
            dhkey: [0; 32],
            commitment: [0; 16],
            remote_commitment: [0; 16],
            local_random: [0; 16],
            peer_random: [0; 16],
            local_oob_r: [0; 16],
            peer_oob_r: [0; 16],
            mac_key: [0; 16],
            ltk: [0; 16],
            csrk: [0; 16],
            dhkey_check: [0; 16],
            remote_dhkey_check: [0; 16],
            ediv: 0,
            enc_rand: [0; 8],
            local_irk: [0; 16],
            peer_irk: [0; 16],
            selected_association_model: AssociationModel::OutOfRange,
            le_secure_connections_mode_is_used: false,
            le_sc_kp_notif_is_used: false,
            round: 0,
            number_to_display: 0,
            sec_level: SecurityLevel::None,
            bond: DeviceKeys::default(),
        }
    }
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material stays out of debug output
        f.debug_struct("ControlBlock")
            .field("pairing_bda", &self.pairing_bda)
            .field("role", &self.role)
            .field("fsm", &self.fsm)
            .field("flags", &self.flags)
            .field("pending", &self.pending)
            .field("model", &self.selected_association_model)
            .field("sc", &self.le_secure_connections_mode_is_used)
            .finish_non_exhaustive()
    }
}

impl ControlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pairing attempt currently owns the block.
    pub fn is_active(&self) -> bool {
        self.pairing_bda.is_some()
    }

    pub fn is_peer(&self, peer: &Address) -> bool {
        self.pairing_bda.as_ref() == Some(peer)
    }

    /// Negotiated encryption key size.
    pub fn enc_size(&self) -> u8 {
        self.loc_enc_size.min(self.peer_enc_size)
    }

    pub fn is_initiator(&self) -> bool {
        self.role == PairingRole::Initiator
    }

    /// Initiator and responder addresses (A, B) for f5/f6.
    pub fn initiator_responder_addrs(&self) -> ([u8; 7], [u8; 7]) {
        let local = self.local_addr.to_le_bytes();
        let peer = self.pairing_bda.unwrap_or_default().to_le_bytes();
        if self.is_initiator() {
            (local, peer)
        } else {
            (peer, local)
        }
    }

    /// IOcap octets (AuthReq || OOB || IO), least significant first.
    pub fn local_iocap(&self) -> [u8; 3] {
        [
            self.local_io_capability,
            self.loc_oob_flag,
            self.loc_auth_req.bits(),
        ]
    }

    pub fn peer_iocap(&self) -> [u8; 3] {
        [self.peer_io_caps, self.peer_oob_flag, self.peer_auth_req.bits()]
    }

    pub fn association_inputs(&self) -> AssociationInputs {
        AssociationInputs {
            role: self.role,
            peer_io_cap: self.peer_io_caps,
            local_io_cap: self.local_io_capability,
            peer_oob_flag: self.peer_oob_flag,
            local_oob_flag: self.loc_oob_flag,
            peer_auth_req: self.peer_auth_req,
            local_auth_req: self.loc_auth_req,
        }
    }

    /// Latch the SC decision and select the association model.
    pub fn select_association_model(&mut self) -> AssociationModel {
        let inputs = self.association_inputs();
        self.le_secure_connections_mode_is_used = inputs.use_sc();
        self.le_sc_kp_notif_is_used = self.le_secure_connections_mode_is_used
            && self.loc_auth_req.contains(AuthReq::KEYPRESS)
            && self.peer_auth_req.contains(AuthReq::KEYPRESS);
        self.selected_association_model =
            select_association_model(&inputs, self.le_secure_connections_mode_is_used);
        self.selected_association_model
    }

    /// Zero the block, keeping only the callback and trace level.
    pub fn cleanup(&mut self) {
        let p_callback = self.p_callback.take();
        let trace_level = self.trace_level;
        *self = Self::default();
        self.p_callback = p_callback;
        self.trace_level = trace_level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smp::state::LeState;

    #[test]
    fn test_pending_take_clears() {
        let mut pending = Pending::HAVE_PEER_COMM | Pending::HAVE_PEER_DHK_CHK;
        assert!(pending.take(Pending::HAVE_PEER_COMM));
        assert!(!pending.take(Pending::HAVE_PEER_COMM));
        assert_eq!(pending, Pending::HAVE_PEER_DHK_CHK);
    }

    #[test]
    fn test_cleanup_keeps_callback_and_trace_level() {
        let mut cb = ControlBlock::new();
        cb.p_callback = Some(Box::new(|_| Ok(())));
        cb.trace_level = LevelFilter::Trace;
        cb.pairing_bda = Some(Address::public([1, 2, 3, 4, 5, 6]));
        cb.fsm = Fsm::Le(LeState::Rand);
        cb.tk = [1; 16];
        cb.ltk = [2; 16];
        cb.private_key = [3; 32];
        cb.dhkey = [4; 32];
        cb.pending = Pending::all();

        cb.cleanup();

        assert!(cb.p_callback.is_some());
        assert_eq!(cb.trace_level, LevelFilter::Trace);
        assert!(!cb.is_active());
        assert!(cb.fsm.is_idle());
        assert_eq!(cb.tk, [0; 16]);
        assert_eq!(cb.ltk, [0; 16]);
        assert_eq!(cb.private_key, [0; 32]);
        assert_eq!(cb.dhkey, [0; 32]);
        assert!(cb.pending.is_empty());
    }

    #[test]
    fn test_iocap_and_addresses_follow_role() {
        let mut cb = ControlBlock::new();
        cb.local_addr = Address::public([1; 6]);
        cb.pairing_bda = Some(Address::random([2; 6]));
        cb.role = PairingRole::Responder;
        let (a, b) = cb.initiator_responder_addrs();
        assert_eq!(a, [2, 2, 2, 2, 2, 2, 1]);
        assert_eq!(b, [1, 1, 1, 1, 1, 1, 0]);

        cb.local_io_capability = 0x01;
        cb.loc_oob_flag = 0x00;
        cb.loc_auth_req = AuthReq::BONDING | AuthReq::MITM;
        assert_eq!(cb.local_iocap(), [0x01, 0x00, 0x05]);
    }
}
