//! L2CAP fixed channel boundary used by the security manager
//!
//! Only the pieces SMP consumes live here: the two fixed channel
//! identifiers and the error type reported by a failed send.

mod types;

pub use self::types::*;

/// LE Security Manager fixed channel
pub const L2CAP_SMP_CID: u16 = 0x0006;

/// BR/EDR Security Manager fixed channel
pub const L2CAP_SMP_BR_CID: u16 = 0x0007;

/// Select the fixed channel a Security Manager PDU travels on.
pub fn fixed_channel_for(smp_over_br: bool) -> u16 {
    if smp_over_br {
        L2CAP_SMP_BR_CID
    } else {
        L2CAP_SMP_CID
    }
}

mod tests;
