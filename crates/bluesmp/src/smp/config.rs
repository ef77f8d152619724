//! Local Security Manager configuration

use super::constants::*;
use super::timer::DEFAULT_RESPONSE_TIMEOUT;
use super::types::*;
use crate::gap::Address;
use std::time::Duration;

/// Local pairing policy and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpConfig {
    /// Our own (identity) address, used in confirm/check values and sent in
    /// Identity Address Information
    pub local_addr: Address,
    /// Parameters advertised in Pairing Request / Pairing Response
    pub features: PairingFeatures,
    /// Smallest encryption key size we accept
    pub min_key_size: u8,
    /// Identity Resolving Key distributed to peers
    pub local_irk: [u8; 16],
    /// Refuse legacy pairing
    pub sc_only: bool,
    /// Answer security grant and IO capability requests from this config
    /// instead of asking the application
    pub auto_accept: bool,
    /// Time allowed for the peer or the application to respond
    pub response_timeout: Duration,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            local_addr: Address::default(),
            features: PairingFeatures::default(),
            min_key_size: SMP_ENCR_KEY_SIZE_MIN,
            local_irk: [0; 16],
            sc_only: false,
            auto_accept: true,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl SmpConfig {
    pub fn new(local_addr: Address) -> Self {
        Self {
            local_addr,
            ..Self::default()
        }
    }

    pub fn with_io_capability(mut self, io_capability: IoCapability) -> Self {
        self.features.io_capability = io_capability;
        self
    }

    pub fn with_auth_req(mut self, auth_req: AuthReq) -> Self {
        self.features.auth_req = auth_req;
        self
    }

    pub fn with_oob_data_present(mut self, present: bool) -> Self {
        self.features.oob_data_present = present;
        self
    }

    pub fn with_key_distribution(mut self, initiator: KeyDist, responder: KeyDist) -> Self {
        self.features.initiator_key_dist = initiator;
        self.features.responder_key_dist = responder;
        self
    }

    pub fn with_local_irk(mut self, irk: [u8; 16]) -> Self {
        self.local_irk = irk;
        self
    }

    pub fn with_auto_accept(mut self, auto_accept: bool) -> Self {
        self.auto_accept = auto_accept;
        self
    }

    pub fn with_sc_only(mut self, sc_only: bool) -> Self {
        self.sc_only = sc_only;
        if sc_only {
            self.features.auth_req |= AuthReq::SC;
        }
        self
    }

    pub fn with_max_key_size(mut self, max_key_size: u8) -> Self {
        self.features.max_key_size = max_key_size;
        self
    }

    pub fn with_min_key_size(mut self, min_key_size: u8) -> Self {
        self.min_key_size = min_key_size;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Check the configuration before a manager is built from it.
    pub fn validate(&self) -> SmpResult<()> {
        let range = SMP_ENCR_KEY_SIZE_MIN..=SMP_ENCR_KEY_SIZE_MAX;
        if !range.contains(&self.features.max_key_size) || !range.contains(&self.min_key_size) {
            return Err(SmpError::InvalidParameter(format!(
                "key size limits {}..={} outside 7..=16",
                self.min_key_size, self.features.max_key_size
            )));
        }
        if self.min_key_size > self.features.max_key_size {
            return Err(SmpError::InvalidParameter(
                "minimum key size above maximum".into(),
            ));
        }
        if self.features.auth_req.bonding_flags() > SMP_AUTH_GEN_BOND {
            return Err(SmpError::InvalidParameter(
                "reserved bonding flags".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SmpConfig::default();
        assert_eq!(config.features.io_capability, IoCapability::NoInputNoOutput);
        assert!(config.features.auth_req.contains(AuthReq::BONDING | AuthReq::SC));
        assert_eq!(config.features.max_key_size, 16);
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_key_sizes() {
        assert!(SmpConfig::default().with_max_key_size(6).validate().is_err());
        assert!(SmpConfig::default().with_min_key_size(17).validate().is_err());
        assert!(SmpConfig::default()
            .with_min_key_size(12)
            .with_max_key_size(10)
            .validate()
            .is_err());
    }

    #[test]
    fn test_sc_only_sets_sc_bit() {
        let config = SmpConfig::default()
            .with_auth_req(AuthReq::BONDING)
            .with_sc_only(true);
        assert!(config.features.auth_req.contains(AuthReq::SC));
    }
}
