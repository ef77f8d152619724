//! States and events of the pairing state machines

use super::crypto::PublicKey;
use super::types::*;
use crate::gap::Address;
use std::fmt;

/// States of the LE pairing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeState {
    #[default]
    Idle,
    /// Waiting for the application (IO capabilities, grant, passkey, OOB,
    /// numeric comparison)
    WaitAppRsp,
    /// Peripheral sent a Security Request
    SecReqPending,
    /// Central sent a Pairing Request
    PairReqRsp,
    /// Legacy: waiting for the TK
    WaitConfirm,
    /// Legacy: local confirm ready, waiting for the peer's confirm
    Confirm,
    /// Legacy: waiting for the peer's random
    Rand,
    PublicKeyExch,
    ScPhase1Start,
    WaitCommitment,
    WaitNonce,
    ScPhase2Start,
    WaitDhkCheck,
    DhkCheck,
    EncryptionPending,
    BondPending,
}

/// States of the BR/EDR-over-SMP state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrState {
    #[default]
    Idle,
    WaitAppRsp,
    PairReqRsp,
    BondPending,
}

/// The machine currently driving the control block. Only one can be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fsm {
    Le(LeState),
    BrEdr(BrState),
}

impl Default for Fsm {
    fn default() -> Self {
        Fsm::Le(LeState::Idle)
    }
}

impl Fsm {
    pub fn is_idle(&self) -> bool {
        matches!(self, Fsm::Le(LeState::Idle) | Fsm::BrEdr(BrState::Idle))
    }
}

impl fmt::Display for Fsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fsm::Le(state) => write!(f, "LE {:?}", state),
            Fsm::BrEdr(state) => write!(f, "BR/EDR {:?}", state),
        }
    }
}

/// Events driving the LE state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // received PDUs
    PairingReq(PairingFeatures),
    PairingRsp(PairingFeatures),
    Confirm([u8; 16]),
    Rand([u8; 16]),
    PairingFailed(Reason),
    EncryptInfo([u8; 16]),
    MasterId { ediv: u16, rand: [u8; 8] },
    IdInfo([u8; 16]),
    IdAddr(Address),
    SignInfo([u8; 16]),
    SecurityReq(AuthReq),
    PairPublicKey(PublicKey),
    PairDhkeyCheck([u8; 16]),
    KeyprNotif(KeypressType),
    PairCommitment([u8; 16]),

    // local crypto progress
    KeyReady,
    LocPublKeyCrtd,
    BothPublKeysRcvd,
    ScDhkeyCmplt,
    ScPhase1Cmplt,
    ScCalcNc,
    ScDsplNc(u32),
    Sc2DhckChksPres,
    ScKeyReady,
    PublKeyExchReq,

    // application
    IoRsp(PairingFeatures),
    TkReq,
    ApiSecGrant(bool),
    BondReq,
    DiscardSecReq,
    ScNcOk,
    KeyprNotifSend(KeypressType),
    ScOobData(Option<OobData>),

    // link
    L2capConn,
    L2capDisconn,
    Encrypted(bool),
    EncReq,

    AuthCmpl(Reason),
}

impl Event {
    /// Whether the event stands for a PDU received from the peer.
    pub fn is_peer_pdu(&self) -> bool {
        matches!(
            self,
            Event::PairingReq(_)
                | Event::PairingRsp(_)
                | Event::Confirm(_)
                | Event::Rand(_)
                | Event::PairingFailed(_)
                | Event::EncryptInfo(_)
                | Event::MasterId { .. }
                | Event::IdInfo(_)
                | Event::IdAddr(_)
                | Event::SignInfo(_)
                | Event::SecurityReq(_)
                | Event::PairPublicKey(_)
                | Event::PairDhkeyCheck(_)
                | Event::KeyprNotif(_)
                | Event::PairCommitment(_)
        )
    }

    /// Short name for logs; payloads may carry key material.
    pub fn name(&self) -> &'static str {
        match self {
            Event::PairingReq(_) => "PairingReq",
            Event::PairingRsp(_) => "PairingRsp",
            Event::Confirm(_) => "Confirm",
            Event::Rand(_) => "Rand",
            Event::PairingFailed(_) => "PairingFailed",
            Event::EncryptInfo(_) => "EncryptInfo",
            Event::MasterId { .. } => "MasterId",
            Event::IdInfo(_) => "IdInfo",
            Event::IdAddr(_) => "IdAddr",
            Event::SignInfo(_) => "SignInfo",
            Event::SecurityReq(_) => "SecurityReq",
            Event::PairPublicKey(_) => "PairPublicKey",
            Event::PairDhkeyCheck(_) => "PairDhkeyCheck",
            Event::KeyprNotif(_) => "KeyprNotif",
            Event::PairCommitment(_) => "PairCommitment",
            Event::KeyReady => "KeyReady",
            Event::LocPublKeyCrtd => "LocPublKeyCrtd",
            Event::BothPublKeysRcvd => "BothPublKeysRcvd",
            Event::ScDhkeyCmplt => "ScDhkeyCmplt",
            Event::ScPhase1Cmplt => "ScPhase1Cmplt",
            Event::ScCalcNc => "ScCalcNc",
            Event::ScDsplNc(_) => "ScDsplNc",
            Event::Sc2DhckChksPres => "Sc2DhckChksPres",
            Event::ScKeyReady => "ScKeyReady",
            Event::PublKeyExchReq => "PublKeyExchReq",
            Event::IoRsp(_) => "IoRsp",
            Event::TkReq => "TkReq",
            Event::ApiSecGrant(_) => "ApiSecGrant",
            Event::BondReq => "BondReq",
            Event::DiscardSecReq => "DiscardSecReq",
            Event::ScNcOk => "ScNcOk",
            Event::KeyprNotifSend(_) => "KeyprNotifSend",
            Event::ScOobData(_) => "ScOobData",
            Event::L2capConn => "L2capConn",
            Event::L2capDisconn => "L2capDisconn",
            Event::Encrypted(_) => "Encrypted",
            Event::EncReq => "EncReq",
            Event::AuthCmpl(_) => "AuthCmpl",
        }
    }
}

/// Events driving the BR/EDR-over-SMP state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrEvent {
    PairingReq(PairingFeatures),
    PairingRsp(PairingFeatures),
    PairingFailed(Reason),
    IdInfo([u8; 16]),
    IdAddr(Address),
    SignInfo([u8; 16]),
    L2capConn,
    L2capDisconn,
    IoRsp(PairingFeatures),
    ApiSecGrant(bool),
    KeyReady,
    BondReq,
    AuthCmpl(Reason),
}

impl BrEvent {
    pub fn is_peer_pdu(&self) -> bool {
        matches!(
            self,
            BrEvent::PairingReq(_)
                | BrEvent::PairingRsp(_)
                | BrEvent::PairingFailed(_)
                | BrEvent::IdInfo(_)
                | BrEvent::IdAddr(_)
                | BrEvent::SignInfo(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrEvent::PairingReq(_) => "PairingReq",
            BrEvent::PairingRsp(_) => "PairingRsp",
            BrEvent::PairingFailed(_) => "PairingFailed",
            BrEvent::IdInfo(_) => "IdInfo",
            BrEvent::IdAddr(_) => "IdAddr",
            BrEvent::SignInfo(_) => "SignInfo",
            BrEvent::L2capConn => "L2capConn",
            BrEvent::L2capDisconn => "L2capDisconn",
            BrEvent::IoRsp(_) => "IoRsp",
            BrEvent::ApiSecGrant(_) => "ApiSecGrant",
            BrEvent::KeyReady => "KeyReady",
            BrEvent::BondReq => "BondReq",
            BrEvent::AuthCmpl(_) => "AuthCmpl",
        }
    }
}

/// An event queued for whichever machine it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queued {
    Le(Event),
    Br(BrEvent),
}
