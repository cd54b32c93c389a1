use super::{is_not_found, AwsClients, LOGICAL_NAME_TAG};
use crate::wait::{poll, NETWORK_TIMEOUT};
use aws_sdk_ec2::model::{
    AttributeBooleanValue, DomainType, Filter, NatGatewayState, ResourceType, Tag,
    TagSpecification, VpcState,
};
use eks_stack_types::kinds::{Vpc, VpcArgs, VpcAttributes};
use eks_stack_types::network::{AddressPlan, Ipv4Cidr};
use log::{debug, info, warn};
use resource_provider::{
    Create, Destroy, IntoProviderError, Previous, ProviderError, ProviderResult, Request,
    Resources, Teardown, Update,
};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

const PUBLIC_ELB_TAG: &str = "kubernetes.io/role/elb";
const INTERNAL_ELB_TAG: &str = "kubernetes.io/role/internal-elb";
const ANYWHERE: &str = "0.0.0.0/0";

/// Builds a VPC across several availability zones: an internet gateway for the public subnets and
/// one NAT gateway per zone for the private subnets.
pub struct VpcProvider;

#[async_trait::async_trait]
impl Create for VpcProvider {
    type Kind = Vpc;

    async fn create(&self, request: Request<'_, Vpc>) -> ProviderResult<VpcAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: VpcArgs = request.args;
        let cidr = Ipv4Cidr::from_str(&args.cidr_block)
            .context(Resources::Clear, "Invalid VPC block")?;
        let plan = AddressPlan::new(cidr, args.availability_zone_count)
            .context(Resources::Clear, "Unable to plan the VPC's subnets")?;
        let zones = availability_zones(&clients, args.availability_zone_count).await?;
        let network = Network {
            clients: &clients,
            logical_name: request.name,
            extra_tags: &args.tags,
        };

        info!("Creating VPC '{}' ({})", request.name, cidr);
        let vpc_id = clients
            .ec2
            .create_vpc()
            .cidr_block(cidr.to_string())
            .tag_specifications(network.tag_specification(ResourceType::Vpc, request.name, None))
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to create VPC '{}'", request.name),
            )?
            .vpc
            .and_then(|vpc| vpc.vpc_id)
            .context(Resources::Unknown, "The created VPC has no id")?;

        network
            .build(&vpc_id, &zones, &plan)
            .await
            .map_err(|e| e.with_resources(Resources::Remaining))
    }
}

#[async_trait::async_trait]
impl Update for VpcProvider {
    async fn update(
        &self,
        request: Request<'_, Vpc>,
        previous: Previous<Vpc>,
    ) -> ProviderResult<VpcAttributes> {
        let clients = AwsClients::new(request.context).await;
        let vpc_id = previous.attributes.vpc_id.as_str();
        let args = request.args;

        let removed: Vec<Tag> = previous
            .args
            .tags
            .keys()
            .filter(|key| !args.tags.contains_key(*key))
            .map(|key| Tag::builder().key(key).build())
            .collect();
        if !removed.is_empty() {
            info!("Removing {} tag(s) from VPC '{}'", removed.len(), vpc_id);
            clients
                .ec2
                .delete_tags()
                .resources(vpc_id)
                .set_tags(Some(removed))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to remove tags from VPC '{}'", vpc_id),
                )?;
        }
        if !args.tags.is_empty() {
            info!("Tagging VPC '{}'", vpc_id);
            clients
                .ec2
                .create_tags()
                .resources(vpc_id)
                .set_tags(Some(
                    args.tags
                        .iter()
                        .map(|(key, value)| Tag::builder().key(key).value(value).build())
                        .collect(),
                ))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to tag VPC '{}'", vpc_id),
                )?;
        }
        Ok(previous.attributes)
    }
}

#[async_trait::async_trait]
impl Destroy for VpcProvider {
    async fn destroy(&self, teardown: Teardown<'_, Vpc>) -> ProviderResult<()> {
        let clients = AwsClients::new(teardown.context).await;
        let recorded = teardown.attributes.unwrap_or_default();
        let vpc_id = if recorded.vpc_id.is_empty() {
            find_vpc(&clients, teardown.name).await?
        } else {
            Some(recorded.vpc_id.clone())
        };
        let vpc_id = match vpc_id {
            Some(vpc_id) => vpc_id,
            None => {
                warn!(
                    "No VPC was recorded or found for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };
        info!("Deleting VPC '{}' ({})", teardown.name, vpc_id);

        delete_nat_gateways(&clients, &vpc_id).await?;
        release_addresses(&clients, teardown.name, &recorded.eip_allocation_ids).await?;
        delete_internet_gateways(&clients, &vpc_id).await?;

        for subnet_id in subnets(&clients, &vpc_id).await? {
            debug!("Deleting subnet '{}'", subnet_id);
            let result = clients
                .ec2
                .delete_subnet()
                .subnet_id(&subnet_id)
                .send()
                .await;
            if !is_not_found(&result) {
                result.context(
                    Resources::Remaining,
                    format!("Unable to delete subnet '{}'", subnet_id),
                )?;
            }
        }

        for route_table_id in route_tables(&clients, &vpc_id).await? {
            debug!("Deleting route table '{}'", route_table_id);
            let result = clients
                .ec2
                .delete_route_table()
                .route_table_id(&route_table_id)
                .send()
                .await;
            if !is_not_found(&result) {
                result.context(
                    Resources::Remaining,
                    format!("Unable to delete route table '{}'", route_table_id),
                )?;
            }
        }

        let result = clients.ec2.delete_vpc().vpc_id(&vpc_id).send().await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to delete VPC '{}'", vpc_id),
        )?;
        Ok(())
    }
}

/// The pieces of a VPC that are created after the VPC itself.
struct Network<'a> {
    clients: &'a AwsClients,
    logical_name: &'a str,
    extra_tags: &'a BTreeMap<String, String>,
}

impl<'a> Network<'a> {
    fn tag_specification(
        &self,
        resource_type: ResourceType,
        name: &str,
        role: Option<&str>,
    ) -> TagSpecification {
        let mut tags = vec![
            Tag::builder().key("Name").value(name).build(),
            Tag::builder()
                .key(LOGICAL_NAME_TAG)
                .value(self.logical_name)
                .build(),
        ];
        if let Some(role) = role {
            tags.push(Tag::builder().key(role).value("1").build());
        }
        tags.extend(
            self.extra_tags
                .iter()
                .map(|(key, value)| Tag::builder().key(key).value(value).build()),
        );
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(tags))
            .build()
    }

    async fn build(
        &self,
        vpc_id: &str,
        zones: &[String],
        plan: &AddressPlan,
    ) -> ProviderResult<VpcAttributes> {
        let ec2 = &self.clients.ec2;
        let name = self.logical_name;
        self.wait_for_vpc(vpc_id).await?;

        let enabled = || AttributeBooleanValue::builder().value(true).build();
        ec2.modify_vpc_attribute()
            .vpc_id(vpc_id)
            .enable_dns_support(enabled())
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to enable DNS support in '{}'", vpc_id),
            )?;
        ec2.modify_vpc_attribute()
            .vpc_id(vpc_id)
            .enable_dns_hostnames(enabled())
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to enable DNS hostnames in '{}'", vpc_id),
            )?;

        let internet_gateway_id = ec2
            .create_internet_gateway()
            .tag_specifications(self.tag_specification(ResourceType::InternetGateway, name, None))
            .send()
            .await
            .context(Resources::Remaining, "Unable to create internet gateway")?
            .internet_gateway
            .and_then(|gateway| gateway.internet_gateway_id)
            .context(Resources::Remaining, "The internet gateway has no id")?;
        ec2.attach_internet_gateway()
            .internet_gateway_id(&internet_gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to attach '{}' to '{}'", internet_gateway_id, vpc_id),
            )?;

        let public_route_table_id = self
            .route_table(vpc_id, &format!("{}-public", name))
            .await?;
        ec2.create_route()
            .route_table_id(&public_route_table_id)
            .destination_cidr_block(ANYWHERE)
            .gateway_id(&internet_gateway_id)
            .send()
            .await
            .context(
                Resources::Remaining,
                "Unable to route the public subnets to the internet gateway",
            )?;

        let mut attributes = VpcAttributes {
            vpc_id: vpc_id.to_string(),
            availability_zones: zones.to_vec(),
            internet_gateway_id: Some(internet_gateway_id),
            public_route_table_id: Some(public_route_table_id.clone()),
            ..VpcAttributes::default()
        };

        for (zone, subnets) in zones.iter().zip(&plan.zones) {
            let private = self
                .subnet(
                    vpc_id,
                    zone,
                    &subnets.private,
                    &format!("{}-private-{}", name, zone),
                    INTERNAL_ELB_TAG,
                )
                .await?;
            let public = self
                .subnet(
                    vpc_id,
                    zone,
                    &subnets.public,
                    &format!("{}-public-{}", name, zone),
                    PUBLIC_ELB_TAG,
                )
                .await?;
            ec2.modify_subnet_attribute()
                .subnet_id(&public)
                .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to map public addresses in '{}'", public),
                )?;
            self.associate(&public_route_table_id, &public).await?;
            attributes.private_subnet_ids.push(private);
            attributes.public_subnet_ids.push(public);
        }

        for (zone, public) in zones.iter().zip(attributes.public_subnet_ids.clone()) {
            let allocation_id = ec2
                .allocate_address()
                .domain(DomainType::Vpc)
                .tag_specifications(self.tag_specification(
                    ResourceType::ElasticIp,
                    &format!("{}-{}", name, zone),
                    None,
                ))
                .send()
                .await
                .context(Resources::Remaining, "Unable to allocate an elastic IP")?
                .allocation_id
                .context(Resources::Remaining, "The elastic IP has no allocation id")?;
            attributes.eip_allocation_ids.push(allocation_id.clone());

            info!("Creating NAT gateway for '{}' in {}", name, zone);
            let nat_gateway_id = ec2
                .create_nat_gateway()
                .subnet_id(&public)
                .allocation_id(&allocation_id)
                .tag_specifications(self.tag_specification(
                    ResourceType::Natgateway,
                    &format!("{}-{}", name, zone),
                    None,
                ))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to create a NAT gateway in '{}'", public),
                )?
                .nat_gateway
                .and_then(|gateway| gateway.nat_gateway_id)
                .context(Resources::Remaining, "The NAT gateway has no id")?;
            attributes.nat_gateway_ids.push(nat_gateway_id);
        }
        self.wait_for_nat_gateways(&attributes.nat_gateway_ids)
            .await?;

        for ((zone, private), nat_gateway_id) in zones
            .iter()
            .zip(attributes.private_subnet_ids.clone())
            .zip(attributes.nat_gateway_ids.clone())
        {
            let route_table_id = self
                .route_table(vpc_id, &format!("{}-private-{}", name, zone))
                .await?;
            ec2.create_route()
                .route_table_id(&route_table_id)
                .destination_cidr_block(ANYWHERE)
                .nat_gateway_id(&nat_gateway_id)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to route '{}' through '{}'", private, nat_gateway_id),
                )?;
            self.associate(&route_table_id, &private).await?;
            attributes.private_route_table_ids.push(route_table_id);
        }

        info!(
            "VPC '{}' is ready with {} zone(s)",
            attributes.vpc_id,
            zones.len()
        );
        Ok(attributes)
    }

    async fn wait_for_vpc(&self, vpc_id: &str) -> ProviderResult<()> {
        let ec2 = &self.clients.ec2;
        poll(
            &format!("VPC '{}' to become available", vpc_id),
            NETWORK_TIMEOUT,
            Resources::Remaining,
            move || async move {
                let vpcs = ec2
                    .describe_vpcs()
                    .vpc_ids(vpc_id)
                    .send()
                    .await
                    .context(
                        Resources::Remaining,
                        format!("Unable to describe VPC '{}'", vpc_id),
                    )?
                    .vpcs
                    .unwrap_or_default();
                Ok(vpcs
                    .iter()
                    .any(|vpc| vpc.state == Some(VpcState::Available))
                    .then_some(()))
            },
        )
        .await
    }

    async fn route_table(&self, vpc_id: &str, name: &str) -> ProviderResult<String> {
        self.clients
            .ec2
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(self.tag_specification(ResourceType::RouteTable, name, None))
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to create route table '{}'", name),
            )?
            .route_table
            .and_then(|table| table.route_table_id)
            .context(
                Resources::Remaining,
                format!("Route table '{}' has no id", name),
            )
    }

    async fn subnet(
        &self,
        vpc_id: &str,
        zone: &str,
        cidr: &Ipv4Cidr,
        name: &str,
        role: &str,
    ) -> ProviderResult<String> {
        debug!("Creating subnet '{}' ({}) in {}", name, cidr, zone);
        self.clients
            .ec2
            .create_subnet()
            .vpc_id(vpc_id)
            .availability_zone(zone)
            .cidr_block(cidr.to_string())
            .tag_specifications(self.tag_specification(ResourceType::Subnet, name, Some(role)))
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to create subnet '{}'", name),
            )?
            .subnet
            .and_then(|subnet| subnet.subnet_id)
            .context(
                Resources::Remaining,
                format!("Subnet '{}' has no id", name),
            )
    }

    async fn associate(&self, route_table_id: &str, subnet_id: &str) -> ProviderResult<()> {
        self.clients
            .ec2
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!(
                    "Unable to associate '{}' with '{}'",
                    subnet_id, route_table_id
                ),
            )?;
        Ok(())
    }

    async fn wait_for_nat_gateways(&self, ids: &[String]) -> ProviderResult<()> {
        let ec2 = &self.clients.ec2;
        poll(
            "NAT gateways to become available",
            NETWORK_TIMEOUT,
            Resources::Remaining,
            move || async move {
                let gateways = ec2
                    .describe_nat_gateways()
                    .set_nat_gateway_ids(Some(ids.to_vec()))
                    .send()
                    .await
                    .context(Resources::Remaining, "Unable to describe NAT gateways")?
                    .nat_gateways
                    .unwrap_or_default();
                if let Some(failed) = gateways
                    .iter()
                    .find(|gateway| gateway.state == Some(NatGatewayState::Failed))
                {
                    return Err(ProviderError::new_with_context(
                        Resources::Remaining,
                        format!(
                            "NAT gateway '{}' failed: {}",
                            failed.nat_gateway_id.as_deref().unwrap_or_default(),
                            failed.failure_message.as_deref().unwrap_or_default()
                        ),
                    ));
                }
                let ready = gateways.len() == ids.len()
                    && gateways
                        .iter()
                        .all(|gateway| gateway.state == Some(NatGatewayState::Available));
                Ok(ready.then_some(()))
            },
        )
        .await
    }
}

async fn availability_zones(clients: &AwsClients, count: usize) -> ProviderResult<Vec<String>> {
    let mut zones: Vec<String> = clients
        .ec2
        .describe_availability_zones()
        .filters(Filter::builder().name("state").values("available").build())
        .send()
        .await
        .context(Resources::Clear, "Unable to list availability zones")?
        .availability_zones
        .unwrap_or_default()
        .into_iter()
        .filter_map(|zone| zone.zone_name)
        .collect();
    zones.sort();
    if zones.len() < count {
        return Err(ProviderError::new_with_context(
            Resources::Clear,
            format!(
                "{} availability zones were requested but only {} are available",
                count,
                zones.len()
            ),
        ));
    }
    zones.truncate(count);
    Ok(zones)
}

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

fn tag_filter(logical_name: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", LOGICAL_NAME_TAG))
        .values(logical_name)
        .build()
}

async fn find_vpc(clients: &AwsClients, logical_name: &str) -> ProviderResult<Option<String>> {
    let vpcs = clients
        .ec2
        .describe_vpcs()
        .filters(tag_filter(logical_name))
        .send()
        .await
        .context(
            Resources::Unknown,
            format!("Unable to look up the VPC of '{}'", logical_name),
        )?
        .vpcs
        .unwrap_or_default();
    Ok(vpcs.into_iter().find_map(|vpc| vpc.vpc_id))
}

async fn delete_nat_gateways(clients: &AwsClients, vpc_id: &str) -> ProviderResult<()> {
    let ec2 = &clients.ec2;
    let gateways: Vec<String> = ec2
        .describe_nat_gateways()
        .filter(vpc_filter(vpc_id))
        .send()
        .await
        .context(
            Resources::Remaining,
            format!("Unable to list the NAT gateways of '{}'", vpc_id),
        )?
        .nat_gateways
        .unwrap_or_default()
        .into_iter()
        .filter(|gateway| gateway.state != Some(NatGatewayState::Deleted))
        .filter_map(|gateway| gateway.nat_gateway_id)
        .collect();
    if gateways.is_empty() {
        return Ok(());
    }
    for id in &gateways {
        info!("Deleting NAT gateway '{}'", id);
        let result = ec2.delete_nat_gateway().nat_gateway_id(id).send().await;
        if !is_not_found(&result) {
            result.context(
                Resources::Remaining,
                format!("Unable to delete NAT gateway '{}'", id),
            )?;
        }
    }
    let gateways = &gateways;
    poll(
        "NAT gateways to be deleted",
        NETWORK_TIMEOUT,
        Resources::Remaining,
        move || async move {
            let remaining = ec2
                .describe_nat_gateways()
                .set_nat_gateway_ids(Some(gateways.clone()))
                .send()
                .await
                .context(Resources::Remaining, "Unable to describe NAT gateways")?
                .nat_gateways
                .unwrap_or_default()
                .into_iter()
                .filter(|gateway| gateway.state != Some(NatGatewayState::Deleted))
                .count();
            Ok((remaining == 0).then_some(()))
        },
    )
    .await
}

/// Release the stack's elastic IPs, both the recorded ones and any tagged with the logical name.
async fn release_addresses(
    clients: &AwsClients,
    logical_name: &str,
    recorded: &[String],
) -> ProviderResult<()> {
    let mut allocation_ids: BTreeSet<String> = recorded.iter().cloned().collect();
    allocation_ids.extend(
        clients
            .ec2
            .describe_addresses()
            .filters(tag_filter(logical_name))
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to list the elastic IPs of '{}'", logical_name),
            )?
            .addresses
            .unwrap_or_default()
            .into_iter()
            .filter_map(|address| address.allocation_id),
    );
    for allocation_id in allocation_ids {
        debug!("Releasing elastic IP '{}'", allocation_id);
        let result = clients
            .ec2
            .release_address()
            .allocation_id(&allocation_id)
            .send()
            .await;
        if !is_not_found(&result) {
            result.context(
                Resources::Remaining,
                format!("Unable to release elastic IP '{}'", allocation_id),
            )?;
        }
    }
    Ok(())
}

async fn delete_internet_gateways(clients: &AwsClients, vpc_id: &str) -> ProviderResult<()> {
    let gateways = clients
        .ec2
        .describe_internet_gateways()
        .filters(
            Filter::builder()
                .name("attachment.vpc-id")
                .values(vpc_id)
                .build(),
        )
        .send()
        .await
        .context(
            Resources::Remaining,
            format!("Unable to list the internet gateways of '{}'", vpc_id),
        )?
        .internet_gateways
        .unwrap_or_default();
    for id in gateways
        .into_iter()
        .filter_map(|gateway| gateway.internet_gateway_id)
    {
        debug!("Deleting internet gateway '{}'", id);
        clients
            .ec2
            .detach_internet_gateway()
            .internet_gateway_id(&id)
            .vpc_id(vpc_id)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to detach '{}' from '{}'", id, vpc_id),
            )?;
        let result = clients
            .ec2
            .delete_internet_gateway()
            .internet_gateway_id(&id)
            .send()
            .await;
        if !is_not_found(&result) {
            result.context(
                Resources::Remaining,
                format!("Unable to delete internet gateway '{}'", id),
            )?;
        }
    }
    Ok(())
}

async fn subnets(clients: &AwsClients, vpc_id: &str) -> ProviderResult<Vec<String>> {
    Ok(clients
        .ec2
        .describe_subnets()
        .filters(vpc_filter(vpc_id))
        .send()
        .await
        .context(
            Resources::Remaining,
            format!("Unable to list the subnets of '{}'", vpc_id),
        )?
        .subnets
        .unwrap_or_default()
        .into_iter()
        .filter_map(|subnet| subnet.subnet_id)
        .collect())
}

/// Route tables of the VPC other than its main one, which is deleted along with the VPC.
async fn route_tables(clients: &AwsClients, vpc_id: &str) -> ProviderResult<Vec<String>> {
    Ok(clients
        .ec2
        .describe_route_tables()
        .filters(vpc_filter(vpc_id))
        .send()
        .await
        .context(
            Resources::Remaining,
            format!("Unable to list the route tables of '{}'", vpc_id),
        )?
        .route_tables
        .unwrap_or_default()
        .into_iter()
        .filter(|table| {
            !table
                .associations
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|association| association.main == Some(true))
        })
        .filter_map(|table| table.route_table_id)
        .collect())
}
