use crate::network::{AddressPlan, Ipv4Cidr, MAX_VPC_PREFIX};
use configuration_derive::Configuration;
use serde::{Deserialize, Serialize};
use stack_model::{Output, Resource, ResourceKind};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A VPC with one public and one private subnet per availability zone, an internet gateway and a
/// NAT gateway per zone.
pub struct Vpc;

impl ResourceKind for Vpc {
    const TYPE: &'static str = "aws:ec2:Vpc";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/cidrBlock", "/availabilityZoneCount"];

    type Args = VpcArgs;
    type Attributes = VpcAttributes;

    fn validate(args: &VpcArgs) -> Result<(), String> {
        let cidr = Ipv4Cidr::from_str(&args.cidr_block).map_err(|e| e.to_string())?;
        if cidr.prefix() > MAX_VPC_PREFIX {
            return Err(format!(
                "VPC block {} is smaller than /{}",
                cidr, MAX_VPC_PREFIX
            ));
        }
        AddressPlan::new(cidr, args.availability_zone_count)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct VpcArgs {
    pub cidr_block: String,
    pub availability_zone_count: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct VpcAttributes {
    pub vpc_id: String,
    pub availability_zones: Vec<String>,
    pub internet_gateway_id: Option<String>,
    pub private_subnet_ids: Vec<String>,
    pub public_subnet_ids: Vec<String>,
    pub public_route_table_id: Option<String>,
    pub private_route_table_ids: Vec<String>,
    pub nat_gateway_ids: Vec<String>,
    pub eip_allocation_ids: Vec<String>,
}

pub trait VpcOutputs {
    fn vpc_id(&self) -> Output<String>;
    fn private_subnet_ids(&self) -> Output<Vec<String>>;
    fn public_subnet_ids(&self) -> Output<Vec<String>>;
}

impl VpcOutputs for Resource<Vpc> {
    fn vpc_id(&self) -> Output<String> {
        self.attribute("vpcId")
    }

    fn private_subnet_ids(&self) -> Output<Vec<String>> {
        self.attribute("privateSubnetIds")
    }

    fn public_subnet_ids(&self) -> Output<Vec<String>> {
        self.attribute("publicSubnetIds")
    }
}
