//! Shared data structures for hopline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Address family of a trace, fixed for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Classifies a target by full IP syntax. Hostnames yield `None`.
    pub fn of_target(target: &str) -> Option<Self> {
        match target.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(Self::Ipv4),
            IpAddr::V6(_) => Some(Self::Ipv6),
        }
    }

    /// Flag selecting this family on the traceroute command line.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Ipv4 => "-4",
            Self::Ipv6 => "-6",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address family: {0} (expected ipv4 or ipv6)")]
pub struct InvalidFamily(pub String);

impl FromStr for AddressFamily {
    type Err = InvalidFamily;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            _ => Err(InvalidFamily(value.to_string())),
        }
    }
}

/// One responding address (or no response) at one hop.
///
/// The same `number` can appear in several consecutive records when
/// the path fans out across multiple routers at that distance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HopRecord {
    pub number: u32,
    #[serde(rename = "ip")]
    pub address: String,
    pub rtts: Vec<f64>,
}

impl HopRecord {
    /// Address used when a probe received no reply.
    pub const NO_RESPONSE: &'static str = "*";

    pub fn new(number: u32, address: impl Into<String>) -> Self {
        Self {
            number,
            address: address.into(),
            rtts: Vec::new(),
        }
    }

    pub fn is_no_response(&self) -> bool {
        self.address == Self::NO_RESPONSE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceFile {
    pub version: u32,
    pub runs: Vec<TraceRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRun {
    pub target: String,
    pub family: Option<AddressFamily>,
    pub timestamp_utc: String,
    pub hops: Vec<HopRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
