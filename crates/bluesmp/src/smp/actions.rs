//! LE pairing state handlers
//!
//! One `(state, event)` match for the whole LE machine. Each arm does its
//! work, moves the state and pushes the follow-up event, if any.

use super::codec::{features_params, pairing_params};
use super::constants::*;
use super::control::{PairFlags, Pending};
use super::crypto::*;
use super::keys::*;
use super::manager::{Outcome, SmpManager};
use super::state::*;
use super::transport::SmpTransport;
use super::types::*;
use log::{debug, error, info, warn};

use super::manager::Outcome::{Handled, Unexpected};
use super::types::AssociationModel as Model;

impl<T: SmpTransport> SmpManager<T> {
    pub(super) fn le_action(&mut self, state: LeState, event: Event) -> Outcome {
        use LeState::*;

        let initiator = self.cb.is_initiator();
        let sc = self.cb.le_secure_connections_mode_is_used;
        let model = self.cb.selected_association_model;

        match (state, event) {
            // ---- any state ----
            (_, Event::AuthCmpl(reason)) => self.auth_complete(reason),
            (_, Event::PairingFailed(reason)) => {
                self.cb.flags.insert(PairFlags::PEER_FAILED);
                self.auth_complete(reason);
            }
            (_, Event::L2capDisconn) => self.auth_complete(Reason::LinkLost),
            (_, Event::DiscardSecReq) => self.discard(),
            (_, Event::KeyprNotif(kind))
                if model == Model::ScPasskeyDisplay && self.cb.le_sc_kp_notif_is_used =>
            {
                if let Some(peer) = self.cb.pairing_bda {
                    self.notify(SmpEvent::KeypressNotification { peer, kind });
                }
            }
            (_, Event::KeyprNotifSend(kind))
                if model == Model::ScPasskeyEntry && self.cb.le_sc_kp_notif_is_used =>
            {
                self.cb.local_keypress = kind.to_u8();
                self.send_cmd(SMP_OPCODE_PAIR_KEYPR_NOTIF);
            }
            (EncryptionPending, Event::EncReq) => debug!("SMP: LTK handed to the controller"),
            // a repeated request while we are already pairing
            (s, Event::SecurityReq(_)) if initiator && s != Idle => {
                debug!("SMP: security request ignored, pairing in progress")
            }

            // ---- pairing feature exchange ----
            (Idle, Event::L2capConn) if initiator => self.begin_io_exchange(),
            (Idle, Event::SecurityReq(auth_req)) if initiator => self.on_security_request(auth_req),
            (Idle | SecReqPending, Event::PairingReq(features)) if !initiator => {
                self.on_pairing_request(features)
            }
            (WaitAppRsp, Event::ApiSecGrant(true)) if model == Model::OutOfRange => {
                if initiator {
                    self.begin_io_exchange();
                } else if let Some(peer) = self.cb.pairing_bda {
                    self.notify(SmpEvent::IoCapabilityRequest { peer });
                }
            }
            (WaitAppRsp, Event::ApiSecGrant(false)) if model == Model::OutOfRange => {
                self.raise_auth_cmpl(Reason::PairingNotSupported)
            }
            (WaitAppRsp, Event::IoRsp(features)) if model == Model::OutOfRange && initiator => {
                self.send_pairing_request(features)
            }
            (WaitAppRsp, Event::IoRsp(features)) if model == Model::OutOfRange => {
                self.send_pairing_response(features)
            }
            (PairReqRsp, Event::PairingRsp(features)) if initiator => {
                self.on_pairing_response(features)
            }

            // ---- legacy phase 2 ----
            (WaitConfirm, Event::TkReq) => self.legacy_tk_request(),
            (WaitConfirm, Event::KeyReady) if !sc => self.legacy_key_ready(),
            (WaitAppRsp, Event::KeyReady) if !sc && matches!(model, Model::Passkey | Model::Oob) => {
                self.legacy_key_ready()
            }
            (WaitConfirm | WaitAppRsp, Event::Confirm(confirm))
                if !initiator && !sc && model != Model::OutOfRange =>
            {
                self.cb.rconfirm = confirm;
                self.cb.flags.insert(PairFlags::CMD_CONFIRM);
            }
            (Confirm, Event::Confirm(confirm)) => {
                self.cb.rconfirm = confirm;
                self.cb.fsm = Fsm::Le(Rand);
                if initiator {
                    self.send_cmd(SMP_OPCODE_RAND);
                } else {
                    self.send_cmd(SMP_OPCODE_CONFIRM);
                }
            }
            (Rand, Event::Rand(rand)) => self.legacy_rand(rand),

            // ---- SC public key exchange ----
            (PublicKeyExch, Event::PublKeyExchReq) => self.create_local_public_key(),
            (PublicKeyExch, Event::LocPublKeyCrtd) => {
                if initiator {
                    self.send_cmd(SMP_OPCODE_PAIR_PUBLIC_KEY);
                } else if self.cb.pending.take(Pending::HAVE_PEER_PUBL_KEY) {
                    if self.send_cmd(SMP_OPCODE_PAIR_PUBLIC_KEY) {
                        self.push(Event::BothPublKeysRcvd);
                    }
                }
            }
            (PublicKeyExch, Event::PairPublicKey(key)) => self.on_peer_public_key(key),
            (PublicKeyExch, Event::BothPublKeysRcvd) => self.compute_dhkey(),

            // ---- SC phase 1 ----
            (ScPhase1Start, Event::ScDhkeyCmplt) => self.sc_phase1_start(),
            (ScPhase1Start | WaitAppRsp, Event::ScKeyReady) if model.is_passkey() => {
                self.cb.round = 0;
                self.sc_passkey_round();
            }
            (WaitAppRsp, Event::KeyReady) if sc && model == Model::ScPasskeyEntry => {
                self.push(Event::ScKeyReady)
            }
            (ScPhase1Start | WaitAppRsp, Event::PairCommitment(commitment))
                if !initiator && model.is_passkey() =>
            {
                self.cb.remote_commitment = commitment;
                self.cb.pending.insert(Pending::HAVE_PEER_COMM);
            }
            (WaitCommitment, Event::PairCommitment(commitment)) => {
                self.cb.remote_commitment = commitment;
                self.cb.fsm = Fsm::Le(WaitNonce);
                if initiator {
                    self.send_cmd(SMP_OPCODE_RAND);
                } else {
                    self.send_cmd(SMP_OPCODE_PAIR_COMMITM);
                }
            }
            (WaitNonce, Event::Rand(nonce)) => self.sc_peer_nonce(nonce),
            (ScPhase1Start | WaitAppRsp, Event::Rand(nonce)) if !initiator && model == Model::ScOob => {
                self.cb.peer_random = nonce;
                self.cb.flags.insert(PairFlags::HAVE_PEER_RAND);
            }
            (ScPhase1Start | WaitAppRsp, Event::ScOobData(data)) if model == Model::ScOob => {
                self.sc_oob_data(data)
            }
            (WaitNonce, Event::ScCalcNc) => self.sc_calc_nc(),
            (WaitNonce, Event::ScDsplNc(value)) => {
                self.cb.number_to_display = value;
                self.cb.fsm = Fsm::Le(WaitAppRsp);
                if let Some(peer) = self.cb.pairing_bda {
                    self.notify(SmpEvent::NumericComparison { peer, value });
                }
            }
            (WaitAppRsp, Event::ScNcOk) if model == Model::ScNumericComparison => {
                self.push(Event::ScPhase1Cmplt)
            }
            (WaitNonce | WaitAppRsp | ScPhase1Start, Event::ScPhase1Cmplt) => self.sc_phase2_start(),

            // ---- SC phase 2 ----
            (WaitAppRsp | WaitNonce | ScPhase2Start | DhkCheck, Event::PairDhkeyCheck(check))
                if !initiator && sc =>
            {
                self.cb.remote_dhkey_check = check;
                if state == DhkCheck {
                    self.push(Event::Sc2DhckChksPres);
                } else {
                    self.cb.pending.insert(Pending::HAVE_PEER_DHK_CHK);
                }
            }
            (DhkCheck, Event::Sc2DhckChksPres) => self.responder_dhkey_check(),
            (WaitDhkCheck, Event::PairDhkeyCheck(check)) if initiator => {
                self.cb.remote_dhkey_check = check;
                self.initiator_dhkey_check();
            }

            // ---- encryption and key distribution ----
            (EncryptionPending, Event::Encrypted(true)) => self.on_encrypted(),
            (SecReqPending, Event::Encrypted(true)) if self.cb.flags.contains(PairFlags::REENCRYPT) => {
                self.auth_complete(Reason::Success)
            }
            (EncryptionPending | SecReqPending, Event::Encrypted(false)) => {
                self.raise_auth_cmpl(Reason::EncryptionFailed)
            }
            (BondPending, Event::BondReq) => self.start_key_distribution(),
            (BondPending, Event::EncryptInfo(ltk)) if self.expecting_keys(KeyDist::ENC) => {
                let size = self.cb.enc_size();
                let authenticated = model.is_authenticated();
                self.cb.bond.ltk = Some(LongTermKey::new(ltk, 0, [0; 8], size, authenticated));
            }
            (BondPending, Event::MasterId { ediv, rand })
                if self.expecting_keys(KeyDist::ENC) && self.cb.bond.ltk.is_some() =>
            {
                if let Some(ltk) = self.cb.bond.ltk.as_mut() {
                    ltk.ediv = ediv;
                    ltk.rand = rand;
                }
                self.key_received(KeyDist::ENC);
            }
            (BondPending, Event::IdInfo(irk)) if self.expecting_keys(KeyDist::ID) => {
                self.cb.peer_irk = irk
            }
            (BondPending, Event::IdAddr(addr)) if self.expecting_keys(KeyDist::ID) => {
                self.id_addr_received(addr)
            }
            (BondPending, Event::SignInfo(csrk)) if self.expecting_keys(KeyDist::SIGN) => {
                self.sign_info_received(csrk)
            }

            _ => return Unexpected,
        }
        Handled
    }

    // ---- feature exchange ----------------------------------------------

    /// Ask for (or supply from config) the local IO capabilities.
    fn begin_io_exchange(&mut self) {
        self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
        if self.config.auto_accept {
            let features = self.config.features;
            self.push(Event::IoRsp(features));
        } else if let Some(peer) = self.cb.pairing_bda {
            self.notify(SmpEvent::IoCapabilityRequest { peer });
        }
    }

    pub(super) fn apply_local_features(&mut self, features: &PairingFeatures) {
        self.cb.local_io_capability = features.io_capability.to_u8();
        self.cb.loc_oob_flag = if features.oob_data_present {
            SMP_OOB_PRESENT
        } else {
            SMP_OOB_NONE
        };
        self.cb.loc_auth_req = self.local_auth_req(features);
        self.cb.loc_enc_size = features.max_key_size;
    }

    pub(super) fn apply_peer_features(&mut self, features: &PairingFeatures) {
        self.cb.peer_io_caps = features.io_capability.to_u8();
        self.cb.peer_oob_flag = if features.oob_data_present {
            SMP_OOB_PRESENT
        } else {
            SMP_OOB_NONE
        };
        self.cb.peer_auth_req = features.auth_req;
        self.cb.peer_enc_size = features.max_key_size;
    }

    fn on_security_request(&mut self, auth_req: AuthReq) {
        self.cb.peer_auth_req = auth_req;
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };

        let stored = self.lookup_bond(&peer).and_then(|keys| keys.ltk).filter(|ltk| {
            (!auth_req.contains(AuthReq::MITM) || ltk.authenticated)
                && (!auth_req.contains(AuthReq::SC) || ltk.secure_connections)
        });
        if let Some(ltk) = stored {
            info!("SMP: {} is bonded, re-encrypting", peer);
            self.cb.flags.insert(PairFlags::REENCRYPT);
            self.cb.sec_level = ltk.security_level();
            self.cb.ltk = ltk.key;
            self.cb.fsm = Fsm::Le(LeState::EncryptionPending);
            if let Err(err) = self
                .transport
                .start_encryption(&peer, &ltk.key, ltk.ediv, &ltk.rand)
            {
                error!("SMP: failed to start encryption: {}", err);
                self.raise_auth_cmpl(Reason::InternalError);
            }
            return;
        }

        if self.config.auto_accept {
            self.begin_io_exchange();
        } else {
            self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
            self.notify(SmpEvent::SecurityRequest { peer, auth_req });
        }
    }

    fn on_pairing_request(&mut self, features: PairingFeatures) {
        self.apply_peer_features(&features);
        self.cb.preq = features_params(SMP_OPCODE_PAIRING_REQ, &features);
        self.cb.local_i_key = features.initiator_key_dist;
        self.cb.local_r_key = features.responder_key_dist;
        self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);

        if self.config.auto_accept {
            let features = self.config.features;
            self.push(Event::IoRsp(features));
        } else if let Some(peer) = self.cb.pairing_bda {
            let auth_req = self.cb.peer_auth_req;
            self.notify(SmpEvent::SecurityRequest { peer, auth_req });
        }
    }

    fn send_pairing_request(&mut self, features: PairingFeatures) {
        self.apply_local_features(&features);
        self.cb.local_i_key = features.initiator_key_dist;
        self.cb.local_r_key = features.responder_key_dist;
        self.cb.preq = pairing_params(SMP_OPCODE_PAIRING_REQ, &self.cb);
        self.cb.fsm = Fsm::Le(LeState::PairReqRsp);
        self.send_cmd(SMP_OPCODE_PAIRING_REQ);
    }

    fn send_pairing_response(&mut self, features: PairingFeatures) {
        self.apply_local_features(&features);
        // distribute only what both sides asked for
        self.cb.local_i_key &= features.initiator_key_dist;
        self.cb.local_r_key &= features.responder_key_dist;

        if let Some(reason) = self.negotiate() {
            self.raise_auth_cmpl(reason);
            return;
        }
        self.cb.prsp = pairing_params(SMP_OPCODE_PAIRING_RSP, &self.cb);
        if !self.send_cmd(SMP_OPCODE_PAIRING_RSP) {
            return;
        }
        self.start_phase2();
    }

    fn on_pairing_response(&mut self, features: PairingFeatures) {
        self.apply_peer_features(&features);
        self.cb.prsp = features_params(SMP_OPCODE_PAIRING_RSP, &features);
        self.cb.local_i_key &= features.initiator_key_dist;
        self.cb.local_r_key &= features.responder_key_dist;

        if let Some(reason) = self.negotiate() {
            self.raise_auth_cmpl(reason);
            return;
        }
        self.start_phase2();
    }

    /// Key size check and association model selection. Returns the failure
    /// reason when pairing cannot go on.
    fn negotiate(&mut self) -> Option<Reason> {
        let enc_size = self.cb.enc_size();
        if enc_size < self.config.min_key_size {
            warn!("SMP: key size {} below minimum {}", enc_size, self.config.min_key_size);
            return Some(Reason::EncryptionKeySize);
        }

        let model = self.cb.select_association_model();
        let sc = self.cb.le_secure_connections_mode_is_used;
        info!(
            "SMP: {} pairing, model {:?}",
            if sc { "secure connections" } else { "legacy" },
            model
        );

        if self.config.sc_only && !sc {
            warn!("SMP: peer does not support secure connections");
            return Some(Reason::AuthenticationRequirements);
        }
        if model == Model::OutOfRange {
            error!("SMP: no association model for these IO capabilities");
            return Some(Reason::UnspecifiedReason);
        }
        if sc {
            // the LTK is derived, never distributed
            self.cb.local_i_key.remove(KeyDist::ENC);
            self.cb.local_r_key.remove(KeyDist::ENC);
        }
        None
    }

    fn start_phase2(&mut self) {
        if self.cb.le_secure_connections_mode_is_used {
            self.cb.fsm = Fsm::Le(LeState::PublicKeyExch);
            self.push(Event::PublKeyExchReq);
        } else {
            self.cb.fsm = Fsm::Le(LeState::WaitConfirm);
            self.push(Event::TkReq);
        }
    }

    // ---- legacy --------------------------------------------------------

    fn legacy_tk_request(&mut self) {
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };
        match self.cb.selected_association_model {
            Model::KeyNotification => {
                let passkey = generate_passkey();
                self.cb.tk = passkey_to_128(passkey);
                self.cb.number_to_display = passkey;
                self.notify(SmpEvent::PasskeyNotification { peer, passkey });
                self.push(Event::KeyReady);
            }
            Model::Passkey => {
                self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
                self.notify(SmpEvent::PasskeyRequest { peer });
            }
            Model::Oob => {
                self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
                self.notify(SmpEvent::OobRequest { peer });
            }
            _ => {
                self.cb.tk = [0; 16];
                self.push(Event::KeyReady);
            }
        }
    }

    fn legacy_confirm(&self, rand: &[u8; 16]) -> [u8; 16] {
        let (ia, ra) = self.cb.initiator_responder_addrs();
        let ia_bytes: [u8; 6] = [ia[0], ia[1], ia[2], ia[3], ia[4], ia[5]];
        let ra_bytes: [u8; 6] = [ra[0], ra[1], ra[2], ra[3], ra[4], ra[5]];
        c1(
            &self.cb.tk,
            rand,
            &self.cb.preq,
            &self.cb.prsp,
            ia[6],
            &ia_bytes,
            ra[6],
            &ra_bytes,
        )
    }

    fn legacy_key_ready(&mut self) {
        self.cb.rand = generate_random_128();
        self.cb.confirm = self.legacy_confirm(&self.cb.rand);
        self.trace_key("TK", &self.cb.tk);

        if self.cb.is_initiator() {
            self.cb.fsm = Fsm::Le(LeState::Confirm);
            self.send_cmd(SMP_OPCODE_CONFIRM);
        } else if self.cb.flags.contains(PairFlags::CMD_CONFIRM) {
            self.cb.flags.remove(PairFlags::CMD_CONFIRM);
            self.cb.fsm = Fsm::Le(LeState::Rand);
            self.send_cmd(SMP_OPCODE_CONFIRM);
        } else {
            self.cb.fsm = Fsm::Le(LeState::Confirm);
        }
    }

    fn legacy_rand(&mut self, rand: [u8; 16]) {
        self.cb.rrand = rand;
        if self.legacy_confirm(&rand) != self.cb.rconfirm {
            warn!("SMP: peer confirm value does not match");
            self.raise_auth_cmpl(Reason::ConfirmValueFailed);
            return;
        }

        // STK = s1(TK, Srand, Mrand)
        let mut stk = if self.cb.is_initiator() {
            s1(&self.cb.tk, &self.cb.rrand, &self.cb.rand)
        } else {
            s1(&self.cb.tk, &self.cb.rand, &self.cb.rrand)
        };
        mask_key(&mut stk, self.cb.enc_size());
        self.cb.ltk = stk;
        self.trace_key("STK", &stk);

        self.cb.fsm = Fsm::Le(LeState::EncryptionPending);
        if self.cb.is_initiator() {
            self.start_link_encryption();
        } else {
            self.send_cmd(SMP_OPCODE_RAND);
        }
    }

    fn start_link_encryption(&mut self) {
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };
        let ltk = self.cb.ltk;
        if let Err(err) = self.transport.start_encryption(&peer, &ltk, 0, &[0; 8]) {
            error!("SMP: failed to start encryption: {}", err);
            self.raise_auth_cmpl(Reason::InternalError);
        }
    }

    // ---- secure connections: public keys ------------------------------

    fn create_local_public_key(&mut self) {
        let local_oob = if self.cb.selected_association_model == Model::ScOob {
            self.local_sc_oob.take()
        } else {
            None
        };
        let keypair = match local_oob {
            Some(oob) => {
                self.cb.local_oob_r = oob.data.r;
                self.cb.flags.insert(PairFlags::LOCAL_OOB);
                Ok((oob.private_key, oob.public_key))
            }
            None => generate_p256_keypair(),
        };

        match keypair {
            Ok((private_key, public_key)) => {
                self.cb.private_key = private_key;
                self.cb.loc_publ_key = public_key;
                self.cb.pending.insert(Pending::HAVE_LOCAL_PUBL_KEY);
                self.push(Event::LocPublKeyCrtd);
            }
            Err(err) => {
                error!("SMP: key pair generation failed: {}", err);
                self.raise_auth_cmpl(Reason::InternalError);
            }
        }
    }

    fn on_peer_public_key(&mut self, key: PublicKey) {
        self.cb.peer_publ_key = key;
        if self.cb.is_initiator() {
            self.push(Event::BothPublKeysRcvd);
        } else if self.cb.pending.contains(Pending::HAVE_LOCAL_PUBL_KEY) {
            if self.send_cmd(SMP_OPCODE_PAIR_PUBLIC_KEY) {
                self.push(Event::BothPublKeysRcvd);
            }
        } else {
            self.cb.pending.insert(Pending::HAVE_PEER_PUBL_KEY);
        }
    }

    fn compute_dhkey(&mut self) {
        match compute_dhkey(&self.cb.private_key, &self.cb.peer_publ_key) {
            Ok(dhkey) => {
                self.cb.dhkey = dhkey;
                self.trace_key("DHKey", &dhkey);
                self.cb.fsm = Fsm::Le(LeState::ScPhase1Start);
                self.push(Event::ScDhkeyCmplt);
            }
            Err(err) => {
                warn!("SMP: rejecting peer public key: {}", err);
                self.raise_auth_cmpl(Reason::DhkeyCheckFailed);
            }
        }
    }

    // ---- secure connections: phase 1 ----------------------------------

    fn sc_phase1_start(&mut self) {
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };
        match self.cb.selected_association_model {
            Model::ScJustWorks | Model::ScNumericComparison => {
                self.cb.local_random = generate_random_128();
                if self.cb.is_initiator() {
                    self.cb.fsm = Fsm::Le(LeState::WaitCommitment);
                } else {
                    match self.local_commitment(0) {
                        Some(commitment) => self.cb.commitment = commitment,
                        None => return,
                    }
                    self.cb.fsm = Fsm::Le(LeState::WaitNonce);
                    self.send_cmd(SMP_OPCODE_PAIR_COMMITM);
                }
            }
            Model::ScPasskeyEntry => {
                self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
                self.notify(SmpEvent::PasskeyRequest { peer });
            }
            Model::ScPasskeyDisplay => {
                let passkey = generate_passkey();
                self.cb.tk = passkey_to_128(passkey);
                self.cb.number_to_display = passkey;
                self.notify(SmpEvent::PasskeyNotification { peer, passkey });
                self.push(Event::ScKeyReady);
            }
            Model::ScOob => {
                if self.cb.loc_oob_flag == SMP_OOB_PRESENT {
                    self.cb.fsm = Fsm::Le(LeState::WaitAppRsp);
                    self.notify(SmpEvent::ScOobRequest { peer });
                } else {
                    self.push(Event::ScOobData(None));
                }
            }
            model => {
                error!("SMP: {:?} is not a secure connections model", model);
                self.raise_auth_cmpl(Reason::InternalError);
            }
        }
    }

    /// Commitment over our nonce: f4(PKlocal.x, PKpeer.x, Nlocal, z).
    fn local_commitment(&mut self, z: u8) -> Option<[u8; 16]> {
        let commitment = f4(
            &self.cb.loc_publ_key.x,
            &self.cb.peer_publ_key.x,
            &self.cb.local_random,
            z,
        );
        self.crypto_result(commitment)
    }

    fn peer_commitment_matches(&mut self, z: u8) -> Option<bool> {
        let expected = f4(
            &self.cb.peer_publ_key.x,
            &self.cb.loc_publ_key.x,
            &self.cb.peer_random,
            z,
        );
        self.crypto_result(expected)
            .map(|expected| expected == self.cb.remote_commitment)
    }

    fn crypto_result<V>(&mut self, result: SmpResult<V>) -> Option<V> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                error!("SMP: crypto failure: {}", err);
                self.raise_auth_cmpl(Reason::InternalError);
                None
            }
        }
    }

    fn passkey_bit(&self) -> u8 {
        let passkey = u32::from_le_bytes([self.cb.tk[0], self.cb.tk[1], self.cb.tk[2], self.cb.tk[3]]);
        0x80 | ((passkey >> self.cb.round) & 0x01) as u8
    }

    fn sc_passkey_round(&mut self) {
        self.cb.local_random = generate_random_128();
        let Some(commitment) = self.local_commitment(self.passkey_bit()) else {
            return;
        };
        self.cb.commitment = commitment;

        if self.cb.is_initiator() {
            self.cb.fsm = Fsm::Le(LeState::WaitCommitment);
            self.send_cmd(SMP_OPCODE_PAIR_COMMITM);
        } else if self.cb.pending.take(Pending::HAVE_PEER_COMM) {
            self.cb.fsm = Fsm::Le(LeState::WaitNonce);
            self.send_cmd(SMP_OPCODE_PAIR_COMMITM);
        } else {
            self.cb.fsm = Fsm::Le(LeState::WaitCommitment);
        }
    }

    fn sc_peer_nonce(&mut self, nonce: [u8; 16]) {
        self.cb.peer_random = nonce;
        let initiator = self.cb.is_initiator();

        match self.cb.selected_association_model {
            Model::ScJustWorks | Model::ScNumericComparison => {
                if initiator {
                    match self.peer_commitment_matches(0) {
                        Some(true) => {}
                        Some(false) => {
                            warn!("SMP: peer commitment does not match its nonce");
                            self.raise_auth_cmpl(Reason::ConfirmValueFailed);
                            return;
                        }
                        None => return,
                    }
                } else if !self.send_cmd(SMP_OPCODE_RAND) {
                    return;
                }
                if self.cb.selected_association_model == Model::ScNumericComparison {
                    self.push(Event::ScCalcNc);
                } else {
                    self.push(Event::ScPhase1Cmplt);
                }
            }
            Model::ScPasskeyEntry | Model::ScPasskeyDisplay => {
                match self.peer_commitment_matches(self.passkey_bit()) {
                    Some(true) => {}
                    Some(false) => {
                        warn!("SMP: passkey round {} commitment mismatch", self.cb.round);
                        self.raise_auth_cmpl(Reason::ConfirmValueFailed);
                        return;
                    }
                    None => return,
                }
                if !initiator && !self.send_cmd(SMP_OPCODE_RAND) {
                    return;
                }
                self.cb.round += 1;
                if self.cb.round == SMP_SC_PASSKEY_ROUNDS {
                    self.push(Event::ScPhase1Cmplt);
                } else {
                    self.sc_passkey_round();
                }
            }
            Model::ScOob => {
                if !initiator && !self.send_cmd(SMP_OPCODE_RAND) {
                    return;
                }
                self.push(Event::ScPhase1Cmplt);
            }
            _ => self.raise_auth_cmpl(Reason::InternalError),
        }
    }

    fn sc_calc_nc(&mut self) {
        let (pka, pkb, na, nb) = if self.cb.is_initiator() {
            (&self.cb.loc_publ_key, &self.cb.peer_publ_key, &self.cb.local_random, &self.cb.peer_random)
        } else {
            (&self.cb.peer_publ_key, &self.cb.loc_publ_key, &self.cb.peer_random, &self.cb.local_random)
        };
        let value = g2(&pka.x, &pkb.x, na, nb);
        if let Some(value) = self.crypto_result(value) {
            self.push(Event::ScDsplNc(value));
        }
    }

    fn sc_oob_data(&mut self, data: Option<OobData>) {
        if self.cb.loc_oob_flag == SMP_OOB_PRESENT {
            let Some(data) = data else {
                self.raise_auth_cmpl(Reason::OobNotAvailable);
                return;
            };
            let peer_x = self.cb.peer_publ_key.x;
            let Some(expected) = self.crypto_result(f4(&peer_x, &peer_x, &data.r, 0)) else {
                return;
            };
            if expected != data.c {
                warn!("SMP: OOB confirm value does not match the peer public key");
                self.raise_auth_cmpl(Reason::ConfirmValueFailed);
                return;
            }
            self.cb.peer_oob_r = data.r;
        }

        if self.cb.peer_oob_flag != SMP_OOB_PRESENT {
            self.cb.local_oob_r = [0; 16];
        } else if !self.cb.flags.contains(PairFlags::LOCAL_OOB) {
            warn!("SMP: peer expects our OOB data but none was generated");
            self.raise_auth_cmpl(Reason::OobNotAvailable);
            return;
        }

        self.cb.local_random = generate_random_128();
        if self.cb.is_initiator() {
            self.cb.fsm = Fsm::Le(LeState::WaitNonce);
            self.send_cmd(SMP_OPCODE_RAND);
        } else if self.cb.flags.contains(PairFlags::HAVE_PEER_RAND) {
            self.cb.flags.remove(PairFlags::HAVE_PEER_RAND);
            self.cb.fsm = Fsm::Le(LeState::WaitNonce);
            if self.send_cmd(SMP_OPCODE_RAND) {
                self.push(Event::ScPhase1Cmplt);
            }
        } else {
            self.cb.fsm = Fsm::Le(LeState::WaitNonce);
        }
    }

    // ---- secure connections: phase 2 ----------------------------------

    /// `r` used in our own check value and the one expected in the peer's.
    fn check_values_r(&self) -> ([u8; 16], [u8; 16]) {
        match self.cb.selected_association_model {
            Model::ScPasskeyEntry | Model::ScPasskeyDisplay => (self.cb.tk, self.cb.tk),
            Model::ScOob => (self.cb.peer_oob_r, self.cb.local_oob_r),
            _ => ([0; 16], [0; 16]),
        }
    }

    fn sc_phase2_start(&mut self) {
        self.cb.fsm = Fsm::Le(LeState::ScPhase2Start);
        let (a, b) = self.cb.initiator_responder_addrs();
        let (na, nb) = if self.cb.is_initiator() {
            (self.cb.local_random, self.cb.peer_random)
        } else {
            (self.cb.peer_random, self.cb.local_random)
        };
        let Some((mac_key, ltk)) = self.crypto_result(f5(&self.cb.dhkey, &na, &nb, &a, &b)) else {
            return;
        };
        self.cb.mac_key = mac_key;
        self.cb.ltk = ltk;
        self.trace_key("LTK", &ltk);

        let (local_r, _) = self.check_values_r();
        let (local_addr, peer_addr) = if self.cb.is_initiator() { (a, b) } else { (b, a) };
        let check = f6(
            &mac_key,
            &self.cb.local_random,
            &self.cb.peer_random,
            &local_r,
            &self.cb.local_iocap(),
            &local_addr,
            &peer_addr,
        );
        let Some(check) = self.crypto_result(check) else {
            return;
        };
        self.cb.dhkey_check = check;

        if self.cb.is_initiator() {
            self.cb.fsm = Fsm::Le(LeState::WaitDhkCheck);
            self.send_cmd(SMP_OPCODE_PAIR_DHKEY_CHECK);
        } else {
            self.cb.fsm = Fsm::Le(LeState::DhkCheck);
            if self.cb.pending.take(Pending::HAVE_PEER_DHK_CHK) {
                self.push(Event::Sc2DhckChksPres);
            }
        }
    }

    fn peer_dhkey_check_matches(&mut self) -> Option<bool> {
        let (a, b) = self.cb.initiator_responder_addrs();
        let (local_addr, peer_addr) = if self.cb.is_initiator() { (a, b) } else { (b, a) };
        let (_, peer_r) = self.check_values_r();
        let expected = f6(
            &self.cb.mac_key,
            &self.cb.peer_random,
            &self.cb.local_random,
            &peer_r,
            &self.cb.peer_iocap(),
            &peer_addr,
            &local_addr,
        );
        self.crypto_result(expected)
            .map(|expected| expected == self.cb.remote_dhkey_check)
    }

    fn initiator_dhkey_check(&mut self) {
        match self.peer_dhkey_check_matches() {
            Some(true) => {
                let size = self.cb.enc_size();
                mask_key(&mut self.cb.ltk, size);
                self.cb.fsm = Fsm::Le(LeState::EncryptionPending);
                self.start_link_encryption();
            }
            Some(false) => {
                warn!("SMP: DHKey check from the peer does not match");
                self.raise_auth_cmpl(Reason::DhkeyCheckFailed);
            }
            None => {}
        }
    }

    fn responder_dhkey_check(&mut self) {
        match self.peer_dhkey_check_matches() {
            Some(true) => {
                let size = self.cb.enc_size();
                mask_key(&mut self.cb.ltk, size);
                self.cb.fsm = Fsm::Le(LeState::EncryptionPending);
                self.send_cmd(SMP_OPCODE_PAIR_DHKEY_CHECK);
            }
            Some(false) => {
                warn!("SMP: DHKey check from the peer does not match");
                self.raise_auth_cmpl(Reason::DhkeyCheckFailed);
            }
            None => {}
        }
    }

    // ---- encryption and key distribution ------------------------------

    fn on_encrypted(&mut self) {
        if self.cb.flags.contains(PairFlags::REENCRYPT) {
            self.auth_complete(Reason::Success);
            return;
        }

        let model = self.cb.selected_association_model;
        let sc = self.cb.le_secure_connections_mode_is_used;
        self.cb.sec_level = match (sc, model.is_authenticated()) {
            (true, true) => SecurityLevel::SecureConnections,
            (false, true) => SecurityLevel::EncryptionWithAuthentication,
            _ => SecurityLevel::EncryptionOnly,
        };
        if sc {
            self.cb.bond.ltk = Some(LongTermKey::new_secure_connections(
                self.cb.ltk,
                self.cb.enc_size(),
                model.is_authenticated(),
            ));
        }
        self.cb.fsm = Fsm::Le(LeState::BondPending);
        self.push(Event::BondReq);
    }

    /// Keys the peer still owes us.
    pub(super) fn expecting_keys(&self, key: KeyDist) -> bool {
        let expected = if self.cb.is_initiator() {
            self.cb.local_r_key
        } else {
            self.cb.local_i_key
        };
        expected.contains(key)
    }

    fn derive_link_key(&mut self) {
        let wanted = (self.cb.local_i_key | self.cb.local_r_key).contains(KeyDist::LINK);
        self.cb.local_i_key.remove(KeyDist::LINK);
        self.cb.local_r_key.remove(KeyDist::LINK);
        if !wanted || !self.cb.le_secure_connections_mode_is_used {
            return;
        }
        let link_key = h6(&self.cb.ltk, &H6_KEY_ID_TMP2).and_then(|ilk| h6(&ilk, &H6_KEY_ID_LEBR));
        if let Some(link_key) = self.crypto_result(link_key) {
            self.cb.bond.link_key = Some(link_key);
        }
    }

    fn start_key_distribution(&mut self) {
        self.derive_link_key();
        if self.cb.is_initiator() {
            self.finish_if_all_keys_received();
        } else {
            let keys = self.cb.local_r_key;
            if self.send_keys(keys) {
                self.finish_if_all_keys_received();
            }
        }
    }

    /// Send our share of the keys, in ENC, ID, SIGN order.
    pub(super) fn send_keys(&mut self, keys: KeyDist) -> bool {
        let authenticated = self.cb.selected_association_model.is_authenticated();
        let size = self.cb.enc_size();

        if keys.contains(KeyDist::ENC) {
            let mut ltk = generate_random_128();
            mask_key(&mut ltk, size);
            let ediv = generate_random_64();
            self.cb.ltk = ltk;
            self.cb.ediv = u16::from_le_bytes([ediv[0], ediv[1]]);
            self.cb.enc_rand = generate_random_64();
            self.cb.bond.local_ltk = Some(LongTermKey::new(
                ltk,
                self.cb.ediv,
                self.cb.enc_rand,
                size,
                authenticated,
            ));
            if !self.send_cmd(SMP_OPCODE_ENCRYPT_INFO) || !self.send_cmd(SMP_OPCODE_MASTER_ID) {
                return false;
            }
        }

        if keys.contains(KeyDist::ID)
            && (!self.send_cmd(SMP_OPCODE_IDENTITY_INFO) || !self.send_cmd(SMP_OPCODE_ID_ADDR))
        {
            return false;
        }

        if keys.contains(KeyDist::SIGN) {
            self.cb.csrk = generate_random_128();
            self.cb.bond.local_csrk = Some(ConnectionSignatureResolvingKey::new(
                self.cb.csrk,
                authenticated,
            ));
            if !self.send_cmd(SMP_OPCODE_SIGN_INFO) {
                return false;
            }
        }
        true
    }

    pub(super) fn id_addr_received(&mut self, addr: crate::gap::Address) {
        self.cb.bond.irk = Some(IdentityResolvingKey::new(self.cb.peer_irk, addr));
        self.key_received(KeyDist::ID);
    }

    pub(super) fn sign_info_received(&mut self, csrk: [u8; 16]) {
        let authenticated = self.cb.smp_over_br
            || self.cb.selected_association_model.is_authenticated();
        self.cb.bond.remote_csrk = Some(ConnectionSignatureResolvingKey::new(csrk, authenticated));
        self.key_received(KeyDist::SIGN);
    }

    pub(super) fn key_received(&mut self, key: KeyDist) {
        if self.cb.is_initiator() {
            self.cb.local_r_key.remove(key);
        } else {
            self.cb.local_i_key.remove(key);
        }
        self.finish_if_all_keys_received();
    }

    /// Complete once the peer's keys are in; the initiator sends its own
    /// keys last.
    pub(super) fn finish_if_all_keys_received(&mut self) {
        let remaining = if self.cb.is_initiator() {
            self.cb.local_r_key
        } else {
            self.cb.local_i_key
        };
        if !remaining.is_empty() {
            return;
        }
        if self.cb.is_initiator() {
            let keys = self.cb.local_i_key;
            if !self.send_keys(keys) {
                return;
            }
        }
        self.raise_auth_cmpl(Reason::Success);
    }
}
