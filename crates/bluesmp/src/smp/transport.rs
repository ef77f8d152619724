//! Boundary between the security manager and the lower layers

use crate::error::HciError;
use crate::gap::Address;
use crate::l2cap::L2capError;

/// Services the security manager consumes from L2CAP and the controller.
pub trait SmpTransport {
    /// Send a PDU on the given fixed channel.
    fn send_fixed(&mut self, peer: &Address, cid: u16, pdu: &[u8]) -> Result<(), L2capError>;

    /// Release a fixed channel we opened for pairing.
    fn release_fixed(&mut self, peer: &Address, cid: u16);

    /// Start (or refresh) link encryption as central.
    fn start_encryption(
        &mut self,
        peer: &Address,
        ltk: &[u8; 16],
        ediv: u16,
        rand: &[u8; 8],
    ) -> Result<(), HciError>;

    /// BR/EDR link key for the peer, when the classic link is bonded.
    fn br_link_key(&self, peer: &Address) -> Option<[u8; 16]>;
}
