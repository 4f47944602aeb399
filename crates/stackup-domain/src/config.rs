use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainValidationError;

/// IPv4 network in `a.b.c.d/n` notation with no host bits set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VpcCidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl VpcCidr {
    /// Parse and validate an IPv4 CIDR block.
    ///
    /// # Errors
    ///
    /// Returns an error when the address or prefix is malformed, the prefix
    /// exceeds 32, or the address has bits set beyond the prefix.
    pub fn parse(cidr: &str) -> Result<Self, DomainValidationError> {
        let invalid = |reason| DomainValidationError::InvalidCidr {
            cidr: cidr.to_string(),
            reason,
        };

        let (address, prefix) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected address/prefix"))?;
        let network = Ipv4Addr::from_str(address).map_err(|_| invalid("malformed IPv4 address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| invalid("prefix must be a number"))?;
        if prefix > 32 {
            return Err(invalid("prefix must be at most 32"));
        }

        let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
        if u32::from(network) & !mask != 0 {
            return Err(invalid("host bits must be zero"));
        }

        Ok(Self { network, prefix })
    }

    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for VpcCidr {
    type Err = DomainValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for VpcCidr {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VpcCidr> for String {
    fn from(value: VpcCidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VpcCidr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.network, self.prefix)
    }
}

/// Fully resolved, immutable per-run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub region: String,
    pub account: Option<String>,
    /// Name of the defaults row that was applied.
    pub profile: String,
    pub vpc_cidr: Option<VpcCidr>,
    pub platform_version: String,
    pub instance_class: Option<String>,
    pub node_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub vpc_cidr: Option<String>,
    pub platform_version: Option<String>,
    pub instance_class: Option<String>,
    pub node_count: Option<u32>,
    pub account: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::VpcCidr;
    use crate::DomainValidationError;

    #[test]
    fn parses_network_blocks() {
        let cidr = VpcCidr::parse("10.0.0.0/16").expect("cidr");
        assert_eq!(cidr.prefix(), 16);
        assert_eq!(cidr.to_string(), "10.0.0.0/16");

        let everything = VpcCidr::parse("0.0.0.0/0").expect("cidr");
        assert_eq!(everything.prefix(), 0);
    }

    #[test]
    fn rejects_malformed_blocks() {
        for input in ["10.0.0.0", "10.0.0/16", "10.0.0.0/33", "10.0.0.0/x", "::1/64"] {
            let error = VpcCidr::parse(input).expect_err(input);
            assert!(
                matches!(error, DomainValidationError::InvalidCidr { .. }),
                "{input}: {error}"
            );
        }
    }

    #[test]
    fn rejects_host_bits() {
        let error = VpcCidr::parse("10.0.0.1/16").expect_err("host bits");
        assert!(error.to_string().contains("host bits"));
    }
}
