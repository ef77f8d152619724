//! Pairing over the BR/EDR Security Manager channel
//!
//! Only key distribution runs here. The LE LTK is derived from the bonded
//! BR/EDR link key with h6; IO capabilities, OOB and AuthReq are zero on
//! the wire and nothing is confirmed.

use super::codec::{features_params, pairing_params};
use super::constants::*;
use super::control::PairFlags;
use super::crypto::{h6, mask_key, H6_KEY_ID_BRLE, H6_KEY_ID_TMP1};
use super::keys::LongTermKey;
use super::manager::Outcome::{self, Handled, Unexpected};
use super::manager::SmpManager;
use super::state::*;
use super::transport::SmpTransport;
use super::types::*;
use log::{error, info, warn};

impl<T: SmpTransport> SmpManager<T> {
    pub(super) fn br_action(&mut self, state: BrState, event: BrEvent) -> Outcome {
        use BrState::*;

        let initiator = self.cb.is_initiator();

        match (state, event) {
            (_, BrEvent::AuthCmpl(reason)) => self.auth_complete(reason),
            (_, BrEvent::PairingFailed(reason)) => {
                self.cb.flags.insert(PairFlags::PEER_FAILED);
                self.auth_complete(reason);
            }
            (_, BrEvent::L2capDisconn) => self.auth_complete(Reason::LinkLost),

            (Idle, BrEvent::L2capConn) if initiator => {
                self.cb.fsm = Fsm::BrEdr(WaitAppRsp);
                if self.config.auto_accept {
                    let features = self.config.features;
                    self.push_br(BrEvent::IoRsp(features));
                } else if let Some(peer) = self.cb.pairing_bda {
                    self.notify(SmpEvent::IoCapabilityRequest { peer });
                }
            }
            (Idle, BrEvent::PairingReq(features)) if !initiator => self.br_pairing_request(features),
            (WaitAppRsp, BrEvent::ApiSecGrant(true)) if !initiator => {
                if let Some(peer) = self.cb.pairing_bda {
                    self.notify(SmpEvent::IoCapabilityRequest { peer });
                }
            }
            (WaitAppRsp, BrEvent::ApiSecGrant(false)) => {
                self.raise_auth_cmpl(Reason::PairingNotSupported)
            }
            (WaitAppRsp, BrEvent::IoRsp(features)) => {
                self.apply_br_features(&features);
                if initiator {
                    self.cb.local_i_key = features.initiator_key_dist;
                    self.cb.local_r_key = features.responder_key_dist;
                    self.cb.preq = pairing_params(SMP_OPCODE_PAIRING_REQ, &self.cb);
                    self.cb.fsm = Fsm::BrEdr(PairReqRsp);
                    self.send_cmd(SMP_OPCODE_PAIRING_REQ);
                } else {
                    self.cb.local_i_key &= features.initiator_key_dist;
                    self.cb.local_r_key &= features.responder_key_dist;
                    if let Some(reason) = self.br_check_key_size() {
                        self.raise_auth_cmpl(reason);
                        return Handled;
                    }
                    self.cb.prsp = pairing_params(SMP_OPCODE_PAIRING_RSP, &self.cb);
                    self.cb.fsm = Fsm::BrEdr(BondPending);
                    if self.send_cmd(SMP_OPCODE_PAIRING_RSP) {
                        self.push_br(BrEvent::BondReq);
                    }
                }
            }
            (PairReqRsp, BrEvent::PairingRsp(features)) if initiator => {
                self.cb.peer_enc_size = features.max_key_size;
                self.cb.prsp = features_params(SMP_OPCODE_PAIRING_RSP, &features);
                self.cb.local_i_key &= features.initiator_key_dist;
                self.cb.local_r_key &= features.responder_key_dist;
                if let Some(reason) = self.br_check_key_size() {
                    self.raise_auth_cmpl(reason);
                    return Handled;
                }
                self.cb.fsm = Fsm::BrEdr(BondPending);
                self.push_br(BrEvent::BondReq);
            }

            (BondPending, BrEvent::BondReq) => self.derive_ltk_from_link_key(),
            (BondPending, BrEvent::KeyReady) => {
                if initiator {
                    self.finish_if_all_keys_received();
                } else {
                    let keys = self.cb.local_r_key;
                    if self.send_keys(keys) {
                        self.finish_if_all_keys_received();
                    }
                }
            }
            (BondPending, BrEvent::IdInfo(irk)) if self.expecting_keys(KeyDist::ID) => {
                self.cb.peer_irk = irk
            }
            (BondPending, BrEvent::IdAddr(addr)) if self.expecting_keys(KeyDist::ID) => {
                self.id_addr_received(addr)
            }
            (BondPending, BrEvent::SignInfo(csrk)) if self.expecting_keys(KeyDist::SIGN) => {
                self.sign_info_received(csrk)
            }

            _ => return Unexpected,
        }
        Handled
    }

    fn br_pairing_request(&mut self, features: PairingFeatures) {
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };
        if self.transport.br_link_key(&peer).is_none() {
            warn!("SMP: BR/EDR pairing request from {} without a link key", peer);
            self.raise_auth_cmpl(Reason::PairingNotSupported);
            return;
        }

        self.cb.peer_enc_size = features.max_key_size;
        self.cb.preq = features_params(SMP_OPCODE_PAIRING_REQ, &features);
        self.cb.local_i_key = features.initiator_key_dist;
        self.cb.local_r_key = features.responder_key_dist;
        self.cb.fsm = Fsm::BrEdr(BrState::WaitAppRsp);

        if self.config.auto_accept {
            let features = self.config.features;
            self.push_br(BrEvent::IoRsp(features));
        } else {
            let auth_req = features.auth_req;
            self.notify(SmpEvent::SecurityRequest { peer, auth_req });
        }
    }

    /// IO capability, OOB and AuthReq are reserved over BR/EDR.
    fn apply_br_features(&mut self, features: &PairingFeatures) {
        self.cb.local_io_capability = 0;
        self.cb.loc_oob_flag = SMP_OOB_NONE;
        self.cb.loc_auth_req = AuthReq::empty();
        self.cb.loc_enc_size = features.max_key_size;
    }

    fn br_check_key_size(&self) -> Option<Reason> {
        let enc_size = self.cb.enc_size();
        if enc_size < self.config.min_key_size {
            warn!("SMP: key size {} below minimum {}", enc_size, self.config.min_key_size);
            return Some(Reason::EncryptionKeySize);
        }
        None
    }

    /// LTK = h6(h6(link key, "tmp1"), "brle"), then distribute the rest.
    fn derive_ltk_from_link_key(&mut self) {
        let wanted = (self.cb.local_i_key | self.cb.local_r_key).contains(KeyDist::ENC);
        self.cb.local_i_key.remove(KeyDist::ENC | KeyDist::LINK);
        self.cb.local_r_key.remove(KeyDist::ENC | KeyDist::LINK);
        self.cb.sec_level = SecurityLevel::SecureConnections;

        if wanted {
            let Some(peer) = self.cb.pairing_bda else {
                return;
            };
            let Some(link_key) = self.transport.br_link_key(&peer) else {
                error!("SMP: link key for {} went away", peer);
                self.raise_auth_cmpl(Reason::InternalError);
                return;
            };
            let ltk = h6(&link_key, &H6_KEY_ID_TMP1).and_then(|ilk| h6(&ilk, &H6_KEY_ID_BRLE));
            match ltk {
                Ok(mut ltk) => {
                    let size = self.cb.enc_size();
                    mask_key(&mut ltk, size);
                    self.cb.ltk = ltk;
                    self.cb.bond.ltk = Some(LongTermKey::new_secure_connections(ltk, size, true));
                    self.trace_key("LTK", &ltk);
                    info!("SMP: derived LE key from the BR/EDR link key of {}", peer);
                }
                Err(err) => {
                    error!("SMP: h6 failed: {}", err);
                    self.raise_auth_cmpl(Reason::InternalError);
                    return;
                }
            }
        }
        self.push_br(BrEvent::KeyReady);
    }
}
