//! Security Manager Protocol manager implementation
//!
//! The manager owns the single pairing control block together with the
//! configuration, the key store and the transport. Every entry point turns
//! its input into an event and pushes it onto one queue. The queue is
//! drained in arrival order; handlers only ever push follow-up events and
//! never call back into the dispatcher.
//!
//! The LE handlers live in `actions.rs`, the BR/EDR handlers in `br.rs`.

use super::codec::{self, build_command, Command};
use super::config::SmpConfig;
use super::constants::*;
use super::control::{ControlBlock, PairFlags};
use super::crypto::{self, PublicKey};
use super::keys::*;
use super::state::*;
use super::timer::ResponseTimer;
use super::transport::SmpTransport;
use super::types::*;
use super::validate::has_invalid_parameters;
use crate::gap::{Address, BdAddr};
use crate::l2cap::{fixed_channel_for, L2CAP_SMP_BR_CID, L2CAP_SMP_CID};
use log::{debug, error, info, trace, warn, LevelFilter};
use std::collections::VecDeque;
use std::time::Instant;

/// Result of offering an event to a state handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Outcome {
    Handled,
    /// No transition for this event in the current state
    Unexpected,
}

/// Locally generated SC OOB material, handed to the peer out of band.
pub(super) struct LocalScOob {
    pub private_key: [u8; 32],
    pub public_key: PublicKey,
    pub data: OobData,
}

/// Security Manager Protocol manager
pub struct SmpManager<T: SmpTransport> {
    pub(super) config: SmpConfig,
    pub(super) cb: ControlBlock,
    pub(super) key_store: KeyStoreHandle,
    pub(super) transport: T,
    queue: VecDeque<Queued>,
    dispatching: bool,
    pub(super) local_sc_oob: Option<LocalScOob>,
}

impl<T: SmpTransport> SmpManager<T> {
    /// Create a new SMP manager
    pub fn new(config: SmpConfig, transport: T, key_store: KeyStoreHandle) -> SmpResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cb: ControlBlock::new(),
            key_store,
            transport,
            queue: VecDeque::new(),
            dispatching: false,
            local_sc_oob: None,
        })
    }

    /// Set the event callback
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(SmpEvent) -> SmpResult<()> + Send + 'static,
    {
        self.cb.p_callback = Some(Box::new(callback));
    }

    /// Verbosity for key material dumps. Survives control block cleanup.
    pub fn set_trace_level(&mut self, level: LevelFilter) {
        self.cb.trace_level = level;
    }

    pub fn trace_level(&self) -> LevelFilter {
        self.cb.trace_level
    }

    pub fn config(&self) -> &SmpConfig {
        &self.config
    }

    /// Replace the local configuration. Refused while pairing.
    pub fn set_config(&mut self, config: SmpConfig) -> SmpResult<()> {
        if self.cb.is_active() {
            return Err(SmpError::Busy);
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn key_store(&self) -> &dyn KeyStore {
        self.key_store.as_ref()
    }

    pub fn key_store_mut(&mut self) -> &mut dyn KeyStore {
        self.key_store.as_mut()
    }

    /// Current state machine and state.
    pub fn state(&self) -> Fsm {
        self.cb.fsm
    }

    pub fn is_pairing(&self) -> bool {
        self.cb.is_active()
    }

    pub fn pairing_peer(&self) -> Option<Address> {
        self.cb.pairing_bda
    }

    /// Association model of the attempt in progress.
    pub fn association_model(&self) -> Option<AssociationModel> {
        self.cb
            .is_active()
            .then_some(self.cb.selected_association_model)
    }

    /// Deadline of the response timer, if armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.cb.rsp_timer.deadline()
    }

    pub(crate) fn control_block(&self) -> &ControlBlock {
        &self.cb
    }

    // ---- locally initiated procedures ----------------------------------

    /// Start pairing as central.
    pub fn pair(&mut self, peer: Address) -> SmpResult<()> {
        if self.cb.is_active() {
            return Err(SmpError::Busy);
        }
        self.start_session(peer, PairingRole::Initiator, false);
        self.cb.flags.insert(PairFlags::WE_STARTED_DD);
        self.push(Event::L2capConn);
        self.run();
        Ok(())
    }

    /// Ask the central to secure the link (peripheral side).
    pub fn request_security(&mut self, peer: Address) -> SmpResult<()> {
        if self.cb.is_active() {
            return Err(SmpError::Busy);
        }
        self.start_session(peer, PairingRole::Responder, false);
        self.cb.flags.insert(PairFlags::WE_STARTED_DD);
        self.cb.loc_auth_req = self.local_auth_req(&self.config.features);
        self.cb.fsm = Fsm::Le(LeState::SecReqPending);
        self.send_cmd(SMP_OPCODE_SEC_REQ);
        self.run();
        Ok(())
    }

    /// Derive LE keys from the bonded BR/EDR link (central side).
    pub fn pair_over_br(&mut self, peer: Address) -> SmpResult<()> {
        if self.cb.is_active() {
            return Err(SmpError::Busy);
        }
        if self.transport.br_link_key(&peer).is_none() {
            return Err(SmpError::InvalidParameter(format!(
                "no BR/EDR link key for {}",
                peer
            )));
        }
        self.start_session(peer, PairingRole::Initiator, true);
        self.cb.flags.insert(PairFlags::WE_STARTED_DD);
        self.push_br(BrEvent::L2capConn);
        self.run();
        Ok(())
    }

    /// Generate local SC OOB data (r, c) to hand to the peer out of band.
    /// The key pair is used by the next SC OOB pairing only; any pairing
    /// that finishes or is discarded drops it.
    pub fn generate_sc_oob_data(&mut self) -> SmpResult<OobData> {
        if self.cb.is_active() {
            return Err(SmpError::Busy);
        }
        let (private_key, public_key) = crypto::generate_p256_keypair()?;
        let r = crypto::generate_random_128();
        let c = crypto::f4(&public_key.x, &public_key.x, &r, 0)?;
        let data = OobData { r, c };
        self.local_sc_oob = Some(LocalScOob {
            private_key,
            public_key,
            data,
        });
        Ok(data)
    }

    // ---- application replies -------------------------------------------

    pub fn io_capability_reply(&mut self, peer: Address, features: PairingFeatures) -> SmpResult<()> {
        self.require_session(&peer)?;
        match self.cb.fsm {
            Fsm::Le(_) => self.push(Event::IoRsp(features)),
            Fsm::BrEdr(_) => self.push_br(BrEvent::IoRsp(features)),
        }
        self.run();
        Ok(())
    }

    pub fn security_grant(&mut self, peer: Address, granted: bool) -> SmpResult<()> {
        self.require_session(&peer)?;
        match self.cb.fsm {
            Fsm::Le(_) => self.push(Event::ApiSecGrant(granted)),
            Fsm::BrEdr(_) => self.push_br(BrEvent::ApiSecGrant(granted)),
        }
        self.run();
        Ok(())
    }

    /// Passkey typed by the user; `None` when entry was abandoned.
    pub fn passkey_reply(&mut self, peer: Address, passkey: Option<u32>) -> SmpResult<()> {
        self.require_session(&peer)?;
        self.require_waiting_for(&[AssociationModel::Passkey, AssociationModel::ScPasskeyEntry])?;
        match passkey {
            Some(passkey) if passkey <= SMP_PASSKEY_MAX => {
                self.cb.tk = crypto::passkey_to_128(passkey);
                self.push(Event::KeyReady);
            }
            _ => self.raise_auth_cmpl(Reason::PasskeyEntryFailed),
        }
        self.run();
        Ok(())
    }

    /// Legacy OOB temporary key; `None` when no OOB data is available.
    pub fn oob_data_reply(&mut self, peer: Address, tk: Option<[u8; 16]>) -> SmpResult<()> {
        self.require_session(&peer)?;
        self.require_waiting_for(&[AssociationModel::Oob])?;
        match tk {
            Some(tk) => {
                self.cb.tk = tk;
                self.push(Event::KeyReady);
            }
            None => self.raise_auth_cmpl(Reason::OobNotAvailable),
        }
        self.run();
        Ok(())
    }

    /// The peer's SC OOB data as received out of band.
    pub fn sc_oob_data_reply(&mut self, peer: Address, data: Option<OobData>) -> SmpResult<()> {
        self.require_session(&peer)?;
        self.require_waiting_for(&[AssociationModel::ScOob])?;
        self.push(Event::ScOobData(data));
        self.run();
        Ok(())
    }

    pub fn numeric_comparison_reply(&mut self, peer: Address, confirmed: bool) -> SmpResult<()> {
        self.require_session(&peer)?;
        self.require_waiting_for(&[AssociationModel::ScNumericComparison])?;
        if confirmed {
            self.push(Event::ScNcOk);
        } else {
            self.raise_auth_cmpl(Reason::NumericComparisonFailed);
        }
        self.run();
        Ok(())
    }

    /// Report a keypress while the user types the passkey.
    pub fn send_keypress_notification(&mut self, peer: Address, kind: KeypressType) -> SmpResult<()> {
        self.require_session(&peer)?;
        if self.cb.selected_association_model != AssociationModel::ScPasskeyEntry
            || !self.cb.le_sc_kp_notif_is_used
        {
            return Err(SmpError::InvalidState);
        }
        self.push(Event::KeyprNotifSend(kind));
        self.run();
        Ok(())
    }

    /// Abort the attempt; the peer gets Pairing Failed.
    pub fn cancel_pairing(&mut self, peer: Address) -> SmpResult<()> {
        self.require_session(&peer)?;
        info!("SMP: pairing with {} cancelled", peer);
        self.cb.is_pair_cancel = true;
        self.raise_auth_cmpl(Reason::UnspecifiedReason);
        self.run();
        Ok(())
    }

    /// Drop the attempt silently: no PDU, no completion event.
    pub fn discard_security_request(&mut self, peer: Address) -> SmpResult<()> {
        self.require_session(&peer)?;
        match self.cb.fsm {
            Fsm::Le(_) => self.push(Event::DiscardSecReq),
            Fsm::BrEdr(_) => return Err(SmpError::InvalidState),
        }
        self.run();
        Ok(())
    }

    // ---- lower layer input ---------------------------------------------

    /// PDU received on the LE Security Manager channel.
    pub fn handle_smp_packet(&mut self, peer: Address, pdu: &[u8]) -> SmpResult<()> {
        self.handle_pdu(peer, L2CAP_SMP_CID, pdu)
    }

    /// PDU received on the BR/EDR Security Manager channel.
    pub fn handle_smp_br_packet(&mut self, peer: Address, pdu: &[u8]) -> SmpResult<()> {
        self.handle_pdu(peer, L2CAP_SMP_BR_CID, pdu)
    }

    pub fn on_encryption_changed(&mut self, peer: Address, success: bool) {
        if !self.cb.is_peer(&peer) || self.cb.smp_over_br {
            trace!("SMP: encryption change for {} outside pairing", peer);
            return;
        }
        self.push(Event::Encrypted(success));
        self.run();
    }

    /// Long term key request from the controller (peripheral side).
    pub fn encryption_key_request(&mut self, peer: Address, ediv: u16, rand: [u8; 8]) -> Option<[u8; 16]> {
        if self.cb.is_peer(&peer) && self.cb.fsm == Fsm::Le(LeState::EncryptionPending) {
            let ltk = self.cb.ltk;
            self.push(Event::EncReq);
            self.run();
            return Some(ltk);
        }

        let ltk = self
            .lookup_bond(&peer)
            .and_then(|keys| keys.ltk_for_request(ediv, &rand).copied())?;
        if self.cb.is_peer(&peer) && self.cb.fsm == Fsm::Le(LeState::SecReqPending) {
            debug!("SMP: {} re-encrypting with stored key", peer);
            self.cb.flags.insert(PairFlags::REENCRYPT);
            self.cb.sec_level = ltk.security_level();
        }
        Some(ltk.key)
    }

    pub fn on_link_down(&mut self, peer: Address) {
        if !self.cb.is_peer(&peer) {
            return;
        }
        match self.cb.fsm {
            Fsm::Le(_) => self.push(Event::L2capDisconn),
            Fsm::BrEdr(_) => self.push_br(BrEvent::L2capDisconn),
        }
        self.run();
    }

    /// Response timer expiry. A no-op without an active attempt.
    pub fn on_response_timeout(&mut self) {
        if !self.cb.is_active() {
            debug!("SMP: response timeout with no pairing in progress");
            return;
        }
        warn!("SMP: response timeout in {}", self.cb.fsm);
        self.raise_auth_cmpl(Reason::ResponseTimeout);
        self.run();
    }

    pub fn process_timeouts(&mut self) {
        self.process_timeouts_at(Instant::now());
    }

    pub fn process_timeouts_at(&mut self, now: Instant) {
        if self.cb.rsp_timer.expired(now) {
            self.on_response_timeout();
        }
    }

    // ---- dispatch ------------------------------------------------------

    fn handle_pdu(&mut self, peer: Address, cid: u16, pdu: &[u8]) -> SmpResult<()> {
        let &cmd_code = pdu
            .first()
            .ok_or_else(|| SmpError::InvalidParameter("empty SMP PDU".into()))?;
        let over_br = cid == L2CAP_SMP_BR_CID;
        trace!("SMP: rx cmd 0x{:02x} from {} on cid 0x{:04x}", cmd_code, peer, cid);

        // the commitment slot is local only; commitments arrive as Pairing Confirm
        if cmd_code == SMP_OPCODE_PAIR_COMMITM {
            warn!("SMP: reserved cmd 0x{:02x} from {}", cmd_code, peer);
            self.send_raw_failure(&peer, cid, Reason::CommandNotSupported);
            return Ok(());
        }

        if !self.cb.is_peer(&peer) {
            return self.handle_pdu_without_session(peer, cid, pdu);
        }

        if self.cb.smp_over_br != over_br {
            if cmd_code != SMP_OPCODE_PAIRING_FAILED {
                warn!("SMP: cmd 0x{:02x} on the wrong channel 0x{:04x}", cmd_code, cid);
                self.send_raw_failure(&peer, cid, Reason::CommandNotSupported);
            }
            return Ok(());
        }

        if has_invalid_parameters(pdu) {
            if cmd_code == SMP_OPCODE_PAIRING_FAILED {
                self.cb.flags.insert(PairFlags::PEER_FAILED);
            }
            self.raise_auth_cmpl(Reason::InvalidParameters);
            self.run();
            return Ok(());
        }

        let command = Command::parse(pdu)?;
        if over_br {
            match br_event_for(command) {
                Some(event) => self.push_br(event),
                None => {
                    warn!("SMP: cmd 0x{:02x} not allowed over BR/EDR", cmd_code);
                    if cmd_code != SMP_OPCODE_PAIRING_FAILED {
                        self.send_raw_failure(&peer, cid, Reason::CommandNotSupported);
                    }
                    return Ok(());
                }
            }
        } else {
            let event = self.le_event_for(command);
            self.push(event);
        }
        self.run();
        Ok(())
    }

    fn handle_pdu_without_session(&mut self, peer: Address, cid: u16, pdu: &[u8]) -> SmpResult<()> {
        let cmd_code = pdu[0];
        if cmd_code == SMP_OPCODE_PAIRING_FAILED {
            debug!("SMP: ignoring Pairing Failed from {} outside pairing", peer);
            return Ok(());
        }

        let over_br = cid == L2CAP_SMP_BR_CID;
        let starts_session = cmd_code == SMP_OPCODE_PAIRING_REQ
            || (!over_br && cmd_code == SMP_OPCODE_SEC_REQ);
        if self.cb.is_active() || !starts_session {
            warn!(
                "SMP: unexpected cmd 0x{:02x} from {} with no pairing for it",
                cmd_code, peer
            );
            self.send_raw_failure(&peer, cid, Reason::CommandNotSupported);
            return Ok(());
        }

        if has_invalid_parameters(pdu) {
            self.send_raw_failure(&peer, cid, Reason::InvalidParameters);
            return Ok(());
        }

        match Command::parse(pdu)? {
            Command::PairingRequest(features) => {
                self.start_session(peer, PairingRole::Responder, over_br);
                self.cb.flags.insert(PairFlags::PEER_STARTED_DD);
                if over_br {
                    self.push_br(BrEvent::PairingReq(features));
                } else {
                    self.push(Event::PairingReq(features));
                }
            }
            Command::SecurityRequest(auth_req) => {
                self.start_session(peer, PairingRole::Initiator, false);
                self.cb.flags.insert(PairFlags::PEER_STARTED_DD);
                self.push(Event::SecurityReq(auth_req));
            }
            _ => return Ok(()),
        }
        self.run();
        Ok(())
    }

    fn le_event_for(&self, command: Command) -> Event {
        match command {
            Command::PairingRequest(features) => Event::PairingReq(features),
            Command::PairingResponse(features) => Event::PairingRsp(features),
            Command::Confirm(value) if self.cb.le_secure_connections_mode_is_used => {
                Event::PairCommitment(value)
            }
            Command::Confirm(value) => Event::Confirm(value),
            Command::Random(value) => Event::Rand(value),
            Command::PairingFailed(reason) => Event::PairingFailed(reason),
            Command::EncryptionInformation(ltk) => Event::EncryptInfo(ltk),
            Command::MasterIdentification { ediv, rand } => Event::MasterId { ediv, rand },
            Command::IdentityInformation(irk) => Event::IdInfo(irk),
            Command::IdentityAddress(addr) => Event::IdAddr(addr),
            Command::SigningInformation(csrk) => Event::SignInfo(csrk),
            Command::SecurityRequest(auth_req) => Event::SecurityReq(auth_req),
            Command::PublicKey(key) => Event::PairPublicKey(key),
            Command::DhkeyCheck(check) => Event::PairDhkeyCheck(check),
            Command::KeypressNotification(kind) => Event::KeyprNotif(kind),
        }
    }

    pub(super) fn push(&mut self, event: Event) {
        self.queue.push_back(Queued::Le(event));
    }

    pub(super) fn push_br(&mut self, event: BrEvent) {
        self.queue.push_back(Queued::Br(event));
    }

    /// Terminate the attempt ahead of anything already queued.
    pub(super) fn raise_auth_cmpl(&mut self, reason: Reason) {
        let event = match self.cb.fsm {
            Fsm::Le(_) => Queued::Le(Event::AuthCmpl(reason)),
            Fsm::BrEdr(_) => Queued::Br(BrEvent::AuthCmpl(reason)),
        };
        self.queue.push_front(event);
    }

    fn run(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(queued) = self.queue.pop_front() {
            match queued {
                Queued::Le(event) => self.dispatch_le(event),
                Queued::Br(event) => self.dispatch_br(event),
            }
        }
        self.dispatching = false;

        if self.cb.is_active() && !self.cb.rsp_timer.is_running() {
            self.cb
                .rsp_timer
                .start(Instant::now(), self.config.response_timeout);
        }
    }

    fn dispatch_le(&mut self, event: Event) {
        let Fsm::Le(state) = self.cb.fsm else {
            debug!("SMP: dropping LE {} while {}", event.name(), self.cb.fsm);
            return;
        };
        debug!("SMP: LE {:?} <- {}", state, event.name());

        let is_peer_pdu = event.is_peer_pdu();
        let saved_timer = self.cb.rsp_timer;
        if is_peer_pdu {
            self.cb.rsp_timer.stop();
        }

        let name = event.name();
        if self.le_action(state, event) == Outcome::Unexpected {
            self.on_unexpected(name, is_peer_pdu, saved_timer);
        } else if let Fsm::Le(next) = self.cb.fsm {
            if next != state {
                debug!("SMP: LE {:?} -> {:?}", state, next);
            }
        }
    }

    fn dispatch_br(&mut self, event: BrEvent) {
        let Fsm::BrEdr(state) = self.cb.fsm else {
            debug!("SMP: dropping BR/EDR {} while {}", event.name(), self.cb.fsm);
            return;
        };
        debug!("SMP: BR/EDR {:?} <- {}", state, event.name());

        let is_peer_pdu = event.is_peer_pdu();
        let saved_timer = self.cb.rsp_timer;
        if is_peer_pdu {
            self.cb.rsp_timer.stop();
        }

        let name = event.name();
        if self.br_action(state, event) == Outcome::Unexpected {
            self.on_unexpected(name, is_peer_pdu, saved_timer);
        }
    }

    fn on_unexpected(
        &mut self,
        name: &str,
        is_peer_pdu: bool,
        saved_timer: ResponseTimer,
    ) {
        if !is_peer_pdu {
            debug!("SMP: ignoring {} in {}", name, self.cb.fsm);
            return;
        }
        self.cb.rsp_timer = saved_timer;
        warn!("SMP: unexpected {} in {}", name, self.cb.fsm);
        if let Some(peer) = self.cb.pairing_bda {
            let cid = fixed_channel_for(self.cb.smp_over_br);
            self.send_raw_failure(&peer, cid, Reason::CommandNotSupported);
        }
    }

    // ---- shared helpers ------------------------------------------------

    fn start_session(&mut self, peer: Address, role: PairingRole, smp_over_br: bool) {
        self.cb.cleanup();
        self.queue.clear();
        self.cb.pairing_bda = Some(peer);
        self.cb.local_addr = self.config.local_addr;
        self.cb.local_irk = self.config.local_irk;
        self.cb.role = role;
        self.cb.smp_over_br = smp_over_br;
        self.cb.fsm = if smp_over_br {
            Fsm::BrEdr(BrState::Idle)
        } else {
            Fsm::Le(LeState::Idle)
        };
        info!(
            "SMP: pairing with {} as {:?}{}",
            peer,
            role,
            if smp_over_br { " over BR/EDR" } else { "" }
        );
    }

    fn require_session(&self, peer: &Address) -> SmpResult<()> {
        if self.cb.is_peer(peer) {
            Ok(())
        } else {
            Err(SmpError::NotPairing(*peer))
        }
    }

    fn require_waiting_for(&self, models: &[AssociationModel]) -> SmpResult<()> {
        let waiting = self.cb.fsm == Fsm::Le(LeState::WaitAppRsp)
            && models.contains(&self.cb.selected_association_model);
        if waiting {
            Ok(())
        } else {
            Err(SmpError::InvalidState)
        }
    }

    /// AuthReq we advertise, SC forced on in SC-only mode.
    pub(super) fn local_auth_req(&self, features: &PairingFeatures) -> AuthReq {
        let mut auth_req = features.auth_req;
        if self.config.sc_only {
            auth_req.insert(AuthReq::SC);
        }
        auth_req
    }

    pub(super) fn notify(&mut self, event: SmpEvent) {
        if let Some(callback) = self.cb.p_callback.as_mut() {
            if let Err(err) = callback(event) {
                warn!("SMP: application callback failed: {}", err);
            }
        }
    }

    /// Dump key material when the trace level allows it.
    pub(super) fn trace_key(&self, label: &str, value: &[u8]) {
        if self.cb.trace_level >= LevelFilter::Trace {
            trace!("SMP: {} = {}", label, hex::encode(value));
        }
    }

    /// Build and send a command for the active attempt. Failure terminates
    /// the attempt with an internal error.
    pub(super) fn send_cmd(&mut self, cmd_code: u8) -> bool {
        let Some(peer) = self.cb.pairing_bda else {
            return false;
        };
        let cid = fixed_channel_for(self.cb.smp_over_br);
        let result = build_command(cmd_code, &self.cb).and_then(|pdu| {
            self.transport
                .send_fixed(&peer, cid, &pdu)
                .map_err(SmpError::from)
        });

        match result {
            Ok(()) => {
                trace!("SMP: tx cmd 0x{:02x} to {}", cmd_code, peer);
                self.cb
                    .rsp_timer
                    .start(Instant::now(), self.config.response_timeout);
                true
            }
            Err(err) => {
                error!("SMP: failed to send cmd 0x{:02x}: {}", cmd_code, err);
                self.raise_auth_cmpl(Reason::InternalError);
                false
            }
        }
    }

    fn send_raw_failure(&mut self, peer: &Address, cid: u16, reason: Reason) {
        let pdu = codec::build_pairing_failed(reason);
        if let Err(err) = self.transport.send_fixed(peer, cid, &pdu) {
            warn!("SMP: failed to send Pairing Failed to {}: {}", peer, err);
        }
    }

    pub(super) fn lookup_bond(&self, peer: &Address) -> Option<DeviceKeys> {
        let addr = match self.key_store.resolve_identity(&peer.addr) {
            Ok(Some(identity)) => identity,
            _ => peer.addr,
        };
        match self.key_store.load_keys(&addr) {
            Ok(keys) => keys,
            Err(err) => {
                warn!("SMP: key lookup for {} failed: {}", peer, err);
                None
            }
        }
    }

    fn bond_address(&self, peer: &Address) -> BdAddr {
        self.cb
            .bond
            .irk
            .map(|irk| irk.identity_address.addr)
            .unwrap_or(peer.addr)
    }

    fn should_save_bond(&self) -> bool {
        if self.cb.flags.contains(PairFlags::REENCRYPT) || !self.cb.bond.has_keys() {
            return false;
        }
        self.cb.smp_over_br
            || (self.cb.loc_auth_req.is_bonding() && self.cb.peer_auth_req.is_bonding())
    }

    /// The single exit of every attempt.
    pub(super) fn auth_complete(&mut self, reason: Reason) {
        let Some(peer) = self.cb.pairing_bda else {
            return;
        };
        self.cb.rsp_timer.stop();
        self.cb.status = reason;
        self.local_sc_oob = None;
        let cid = fixed_channel_for(self.cb.smp_over_br);

        let may_send = !self
            .cb
            .flags
            .intersects(PairFlags::PEER_FAILED | PairFlags::FAIL_SENT);
        if reason.is_wire() && may_send {
            self.cb.failure = reason;
            self.cb.flags.insert(PairFlags::FAIL_SENT);
            self.send_raw_failure(&peer, cid, reason);
        }

        if self.cb.flags.contains(PairFlags::WE_STARTED_DD) {
            self.transport.release_fixed(&peer, cid);
        }

        let sec_level = if reason.is_success() {
            self.cb.sec_level
        } else {
            SecurityLevel::None
        };

        if reason.is_success() && self.should_save_bond() {
            let addr = self.bond_address(&peer);
            let keys = self.cb.bond;
            match self.key_store.save_keys(&addr, &keys) {
                Ok(()) => debug!("SMP: stored keys for {}", addr),
                Err(err) => error!("SMP: failed to store keys for {}: {}", addr, err),
            }
        }

        if reason.is_success() {
            info!("SMP: pairing with {} complete, {:?}", peer, sec_level);
        } else {
            warn!("SMP: pairing with {} failed: {}", peer, reason);
        }

        let is_pair_cancel = self.cb.is_pair_cancel;
        self.notify(SmpEvent::PairingComplete {
            peer,
            reason,
            sec_level,
            is_pair_cancel,
        });
        self.cb.cleanup();
        self.queue.clear();
    }

    /// Quiet teardown: no Pairing Failed, no completion event.
    pub(super) fn discard(&mut self) {
        if let Some(peer) = self.cb.pairing_bda {
            debug!("SMP: discarding pairing with {}", peer);
            if self.cb.flags.contains(PairFlags::WE_STARTED_DD) {
                let cid = fixed_channel_for(self.cb.smp_over_br);
                self.transport.release_fixed(&peer, cid);
            }
        }
        self.local_sc_oob = None;
        self.cb.cleanup();
        self.queue.clear();
    }
}

fn br_event_for(command: Command) -> Option<BrEvent> {
    let event = match command {
        Command::PairingRequest(features) => BrEvent::PairingReq(features),
        Command::PairingResponse(features) => BrEvent::PairingRsp(features),
        Command::PairingFailed(reason) => BrEvent::PairingFailed(reason),
        Command::IdentityInformation(irk) => BrEvent::IdInfo(irk),
        Command::IdentityAddress(addr) => BrEvent::IdAddr(addr),
        Command::SigningInformation(csrk) => BrEvent::SignInfo(csrk),
        _ => return None,
    };
    Some(event)
}
