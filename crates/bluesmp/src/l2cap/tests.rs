//! Tests for the L2CAP boundary

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_fixed_channel_selection() {
        assert_eq!(fixed_channel_for(false), 0x0006);
        assert_eq!(fixed_channel_for(true), 0x0007);
    }

    #[test]
    fn test_error_display() {
        let err = L2capError::ChannelNotFound(L2CAP_SMP_BR_CID);
        assert_eq!(err.to_string(), "Channel not found: 0x0007");

        let err = L2capError::from(crate::error::HciError::CommandRejected(0x0c));
        assert!(err.to_string().contains("0x0c"));
    }
}
