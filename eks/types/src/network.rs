/*!

IPv4 address planning for the stack's VPC. The VPC block is split into one block per availability
zone; each zone block holds a private subnet (its lower half) and a public subnet (the following
quarter). The remaining quarter is left free.

!*/

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Smallest VPC that still leaves room for six zones of usable subnets.
pub const MAX_VPC_PREFIX: u8 = 20;

/// An IPv4 CIDR block whose address is aligned to its prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        let cidr = format!("{}/{}", address, prefix);
        ensure!(
            prefix <= 32,
            error::CidrSnafu {
                cidr: &cidr,
                reason: "the prefix length must be at most 32",
            }
        );
        ensure!(
            u32::from(address) & !mask(prefix) == 0,
            error::CidrSnafu {
                cidr: &cidr,
                reason: "host bits are set",
            }
        );
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// The `index`th block of prefix `prefix` inside this one.
    fn subdivide(&self, prefix: u8, index: u32) -> Result<Self> {
        let cidr = self.to_string();
        ensure!(
            prefix >= self.prefix && prefix <= 32,
            error::CidrSnafu {
                cidr: &cidr,
                reason: format!("cannot be divided into /{} blocks", prefix),
            }
        );
        let count = 1u64 << u32::from(prefix - self.prefix);
        ensure!(
            u64::from(index) < count,
            error::CidrSnafu {
                cidr: &cidr,
                reason: format!("has no /{} block number {}", prefix, index),
            }
        );
        let step = 1u64 << (32 - u32::from(prefix));
        let start = u64::from(u32::from(self.address)) + u64::from(index) * step;
        let start = u32::try_from(start).map_err(|_| {
            error::CidrSnafu {
                cidr: &cidr,
                reason: "block lies outside the IPv4 space",
            }
            .build()
        })?;
        Self::new(Ipv4Addr::from(start), prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

impl FromStr for Ipv4Cidr {
    type Err = crate::Error;

    fn from_str(input: &str) -> Result<Self> {
        let (address, prefix) = input.split_once('/').ok_or_else(|| {
            error::CidrSnafu {
                cidr: input,
                reason: "expected ADDRESS/PREFIX",
            }
            .build()
        })?;
        let address = Ipv4Addr::from_str(address).map_err(|e| {
            error::CidrSnafu {
                cidr: input,
                reason: e.to_string(),
            }
            .build()
        })?;
        let prefix = u8::from_str(prefix).map_err(|e| {
            error::CidrSnafu {
                cidr: input,
                reason: e.to_string(),
            }
            .build()
        })?;
        Self::new(address, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_str(&value)
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// The subnets of one availability zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonePlan {
    pub private: Ipv4Cidr,
    pub public: Ipv4Cidr,
}

/// Subnet blocks for every zone, in zone order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPlan {
    pub vpc: Ipv4Cidr,
    pub zones: Vec<ZonePlan>,
}

impl AddressPlan {
    pub fn new(vpc: Ipv4Cidr, zone_count: usize) -> Result<Self> {
        let cidr = vpc.to_string();
        ensure!(
            zone_count > 0,
            error::CidrSnafu {
                cidr: &cidr,
                reason: "at least one availability zone is needed",
            }
        );
        let zone_bits = u8::try_from(zone_count.next_power_of_two().trailing_zeros()).map_err(
            |_| {
                error::CidrSnafu {
                    cidr: &cidr,
                    reason: "too many availability zones",
                }
                .build()
            },
        )?;
        let zone_prefix = vpc.prefix() + zone_bits;
        ensure!(
            zone_prefix + 2 <= 28,
            error::CidrSnafu {
                cidr: &cidr,
                reason: format!("is too small for {} availability zones", zone_count),
            }
        );
        let mut zones = Vec::with_capacity(zone_count);
        for index in 0..zone_count {
            let index = u32::try_from(index).map_err(|_| {
                error::CidrSnafu {
                    cidr: &cidr,
                    reason: "too many availability zones",
                }
                .build()
            })?;
            let zone = vpc.subdivide(zone_prefix, index)?;
            zones.push(ZonePlan {
                private: zone.subdivide(zone_prefix + 1, 0)?,
                public: zone.subdivide(zone_prefix + 2, 2)?,
            });
        }
        Ok(Self { vpc, zones })
    }

    pub fn private_subnets(&self) -> Vec<Ipv4Cidr> {
        self.zones.iter().map(|zone| zone.private).collect()
    }

    pub fn public_subnets(&self) -> Vec<Ipv4Cidr> {
        self.zones.iter().map(|zone| zone.public).collect()
    }
}

/// The cluster is attached to every subnet: private ones first, then public ones, each in its
/// original order.
pub fn cluster_subnets(private: Vec<String>, public: Vec<String>) -> Vec<String> {
    let mut subnets = private;
    subnets.extend(public);
    subnets
}
