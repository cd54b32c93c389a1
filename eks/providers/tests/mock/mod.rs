/*!

An in-memory stand-in for the AWS account, implementing every resource kind of the EKS stack. Calls
are logged as `"<operation> <logical name>"`, launch templates keep a version history, and creation
or deletion can be made to fail for chosen logical names.

Resources are tracked by their physical identifier, so an old incarnation and its replacement can
exist side by side. Like the real services, deleting a resource that a live resource still refers
to (a role used by a cluster, a cluster with node groups) is refused.

!*/

use eks_stack_types::kinds::{
    Addon, AddonArgs, AddonAttributes, Cluster, ClusterArgs, ClusterAttributes, LaunchTemplate,
    LaunchTemplateArgs, LaunchTemplateAttributes, LaunchTemplateData, Nodegroup, NodegroupArgs,
    NodegroupAttributes, OidcProvider, OidcProviderArgs, OidcProviderAttributes, Role, RoleArgs,
    RoleAttributes, Vpc, VpcArgs, VpcAttributes,
};
use resource_provider::{
    Create, Destroy, Previous, ProviderError, ProviderRegistry, ProviderResult, Request,
    Resources, Teardown, Update,
};
use stack_model::ResourceKind;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

pub const ACCOUNT: &str = "123456789012";
pub const ISSUER: &str = "oidc.eks.us-east-1.amazonaws.com/id/5C5B1B5D0B3F4C6A";

#[derive(Debug, Default)]
pub struct CloudState {
    next_id: u64,
    pub log: Vec<String>,
    /// Physical identifier to logical name of everything that currently exists.
    pub live: BTreeMap<String, String>,
    /// Physical identifier to the physical identifiers it refers to.
    pub uses: BTreeMap<String, BTreeSet<String>>,
    /// Launch template name to the data of each of its versions.
    pub templates: BTreeMap<String, Vec<LaunchTemplateData>>,
    pub fail_create: BTreeSet<String>,
    pub fail_destroy: BTreeSet<String>,
}

impl CloudState {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dependents_of(&self, id: &str) -> Vec<String> {
        self.uses
            .iter()
            .filter(|(user, used)| user.as_str() != id && used.contains(id))
            .filter_map(|(user, _)| self.live.get(user).cloned())
            .collect()
    }
}

/// A handle to the shared mock account.
#[derive(Clone, Debug, Default)]
pub struct Cloud(Arc<Mutex<CloudState>>);

impl Cloud {
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new()
            .with(Mock::<Vpc>::new(self))
            .with(Mock::<Role>::new(self))
            .with(Mock::<Cluster>::new(self))
            .with(Mock::<OidcProvider>::new(self))
            .with(Mock::<Addon>::new(self))
            .with(Mock::<LaunchTemplate>::new(self))
            .with(Mock::<Nodegroup>::new(self))
    }

    pub fn log(&self) -> Vec<String> {
        self.0.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.0.lock().unwrap().log.clear();
    }

    /// Logical names of everything that currently exists.
    pub fn live(&self) -> BTreeSet<String> {
        self.0.lock().unwrap().live.values().cloned().collect()
    }

    /// How many physical resources currently exist.
    pub fn live_count(&self) -> usize {
        self.0.lock().unwrap().live.len()
    }

    pub fn template_versions(&self, name: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .templates
            .get(name)
            .map(Vec::len)
            .unwrap_or_default()
    }

    pub fn fail_create(&self, name: &str, fail: bool) {
        let mut state = self.0.lock().unwrap();
        if fail {
            state.fail_create.insert(name.to_string());
        } else {
            state.fail_create.remove(name);
        }
    }

    pub fn fail_destroy(&self, name: &str, fail: bool) {
        let mut state = self.0.lock().unwrap();
        if fail {
            state.fail_destroy.insert(name.to_string());
        } else {
            state.fail_destroy.remove(name);
        }
    }
}

/// How the mock account answers for one kind.
pub trait MockKind: ResourceKind + Sized {
    /// The physical identifier other resources refer to this one by.
    fn id(attributes: &Self::Attributes) -> String;

    /// The physical identifiers of the resources these arguments refer to.
    fn uses(_args: &Self::Args) -> Vec<String> {
        Vec::new()
    }

    fn created(state: &mut CloudState, name: &str, args: &Self::Args) -> Self::Attributes;

    fn updated(
        _state: &mut CloudState,
        _name: &str,
        _args: &Self::Args,
        previous: Previous<Self>,
    ) -> Self::Attributes {
        previous.attributes
    }
}

pub struct Mock<K> {
    cloud: Cloud,
    kind: PhantomData<fn() -> K>,
}

impl<K> Mock<K> {
    pub fn new(cloud: &Cloud) -> Self {
        Self {
            cloud: cloud.clone(),
            kind: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<K: MockKind> Create for Mock<K> {
    type Kind = K;

    async fn create(&self, request: Request<'_, K>) -> ProviderResult<K::Attributes> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("create {}", request.name));
        if state.fail_create.contains(request.name) {
            return Err(ProviderError::new_with_context(
                Resources::Clear,
                format!("Limit exceeded creating '{}'", request.name),
            ));
        }
        let attributes = K::created(&mut state, request.name, &request.args);
        let id = K::id(&attributes);
        state.live.insert(id.clone(), request.name.to_string());
        state
            .uses
            .insert(id, K::uses(&request.args).into_iter().collect());
        Ok(attributes)
    }
}

#[async_trait::async_trait]
impl<K: MockKind> Update for Mock<K> {
    async fn update(
        &self,
        request: Request<'_, K>,
        previous: Previous<K>,
    ) -> ProviderResult<K::Attributes> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("update {}", request.name));
        let attributes = K::updated(&mut state, request.name, &request.args, previous);
        state.uses.insert(
            K::id(&attributes),
            K::uses(&request.args).into_iter().collect(),
        );
        Ok(attributes)
    }
}

#[async_trait::async_trait]
impl<K: MockKind> Destroy for Mock<K> {
    async fn destroy(&self, teardown: Teardown<'_, K>) -> ProviderResult<()> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("destroy {}", teardown.name));
        if state.fail_destroy.contains(teardown.name) {
            return Err(ProviderError::new_with_context(
                Resources::Remaining,
                format!("'{}' has a dependent object", teardown.name),
            ));
        }
        let id = match teardown.attributes.as_ref().map(K::id) {
            Some(id) => id,
            None => match state
                .live
                .iter()
                .find(|(_, name)| name.as_str() == teardown.name)
            {
                Some((id, _)) => id.clone(),
                None => return Ok(()),
            },
        };
        let dependents = state.dependents_of(&id);
        if !dependents.is_empty() {
            return Err(ProviderError::new_with_context(
                Resources::Remaining,
                format!(
                    "'{}' ({}) is still in use by {:?}",
                    teardown.name, id, dependents
                ),
            ));
        }
        state.live.remove(&id);
        state.uses.remove(&id);
        Ok(())
    }
}

impl MockKind for Vpc {
    fn id(attributes: &VpcAttributes) -> String {
        attributes.vpc_id.clone()
    }

    fn created(state: &mut CloudState, _: &str, args: &VpcArgs) -> VpcAttributes {
        let id = state.id();
        let zones: Vec<String> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .take(args.availability_zone_count)
            .map(|zone| format!("us-east-1{}", zone))
            .collect();
        VpcAttributes {
            vpc_id: format!("vpc-{:08x}", id),
            private_subnet_ids: zones
                .iter()
                .map(|zone| format!("subnet-private-{}", zone))
                .collect(),
            public_subnet_ids: zones
                .iter()
                .map(|zone| format!("subnet-public-{}", zone))
                .collect(),
            availability_zones: zones,
            ..VpcAttributes::default()
        }
    }
}

impl MockKind for Role {
    fn id(attributes: &RoleAttributes) -> String {
        attributes.arn.clone()
    }

    fn created(state: &mut CloudState, name: &str, args: &RoleArgs) -> RoleAttributes {
        let id = state.id();
        let role_name = args
            .role_name
            .clone()
            .unwrap_or_else(|| format!("{}-{:07x}", name, id));
        RoleAttributes {
            arn: format!("arn:aws:iam::{}:role/{}", ACCOUNT, role_name),
            role_id: format!("AROA{:016}", id),
            role_name,
        }
    }
}

impl MockKind for Cluster {
    fn id(attributes: &ClusterAttributes) -> String {
        attributes.name.clone()
    }

    fn uses(args: &ClusterArgs) -> Vec<String> {
        vec![args.role_arn.clone()]
    }

    fn created(state: &mut CloudState, name: &str, args: &ClusterArgs) -> ClusterAttributes {
        let id = state.id();
        let cluster_name = args
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{:07x}", name, id));
        ClusterAttributes {
            arn: format!("arn:aws:eks:us-east-1:{}:cluster/{}", ACCOUNT, cluster_name),
            endpoint: "https://5C5B1B5D0B3F4C6A.gr7.us-east-1.eks.amazonaws.com".to_string(),
            certificate_authority_data: "LS0tLS1CRUdJTg==".to_string(),
            open_id_connect_issuer_url: format!("https://{}", ISSUER),
            cluster_security_group_id: format!("sg-{:08x}", id),
            version: args.version.clone(),
            name: cluster_name,
        }
    }

    fn updated(
        _: &mut CloudState,
        _: &str,
        args: &ClusterArgs,
        previous: Previous<Self>,
    ) -> ClusterAttributes {
        ClusterAttributes {
            version: args.version.clone(),
            ..previous.attributes
        }
    }
}

impl MockKind for OidcProvider {
    fn id(attributes: &OidcProviderAttributes) -> String {
        attributes.arn.clone()
    }

    fn created(_: &mut CloudState, _: &str, args: &OidcProviderArgs) -> OidcProviderAttributes {
        OidcProviderAttributes {
            arn: format!(
                "arn:aws:iam::{}:oidc-provider/{}",
                ACCOUNT,
                args.url.trim_start_matches("https://")
            ),
        }
    }
}

impl MockKind for Addon {
    fn id(attributes: &AddonAttributes) -> String {
        attributes.arn.clone()
    }

    fn uses(args: &AddonArgs) -> Vec<String> {
        let mut uses = vec![args.cluster_name.clone()];
        uses.extend(args.service_account_role_arn.clone());
        uses
    }

    fn created(_: &mut CloudState, _: &str, args: &AddonArgs) -> AddonAttributes {
        AddonAttributes {
            arn: format!(
                "arn:aws:eks:us-east-1:{}:addon/{}/{}",
                ACCOUNT, args.cluster_name, args.addon_name
            ),
            addon_version: args
                .addon_version
                .clone()
                .unwrap_or_else(|| "v1.18.0-eksbuild.1".to_string()),
        }
    }
}

impl MockKind for LaunchTemplate {
    fn id(attributes: &LaunchTemplateAttributes) -> String {
        attributes.launch_template_name.clone()
    }

    fn created(
        state: &mut CloudState,
        name: &str,
        args: &LaunchTemplateArgs,
    ) -> LaunchTemplateAttributes {
        let id = state.id();
        let template_name = args
            .launch_template_name
            .clone()
            .unwrap_or_else(|| format!("{}-{:07x}", name, id));
        state.templates.insert(
            template_name.clone(),
            vec![args.launch_template_data.clone()],
        );
        LaunchTemplateAttributes {
            launch_template_id: format!("lt-{:017x}", id),
            launch_template_name: template_name,
            default_version_number: "1".to_string(),
            latest_version_number: "1".to_string(),
        }
    }

    fn updated(
        state: &mut CloudState,
        _: &str,
        args: &LaunchTemplateArgs,
        previous: Previous<Self>,
    ) -> LaunchTemplateAttributes {
        if previous.args.launch_template_data == args.launch_template_data {
            return previous.attributes;
        }
        let versions = state
            .templates
            .entry(previous.attributes.launch_template_name.clone())
            .or_default();
        versions.push(args.launch_template_data.clone());
        LaunchTemplateAttributes {
            default_version_number: versions.len().to_string(),
            latest_version_number: versions.len().to_string(),
            ..previous.attributes
        }
    }
}

impl MockKind for Nodegroup {
    fn id(attributes: &NodegroupAttributes) -> String {
        attributes.arn.clone()
    }

    fn uses(args: &NodegroupArgs) -> Vec<String> {
        vec![
            args.cluster_name.clone(),
            args.node_role.clone(),
            args.launch_template.name.clone(),
        ]
    }

    fn created(state: &mut CloudState, name: &str, args: &NodegroupArgs) -> NodegroupAttributes {
        let id = state.id();
        let nodegroup_name = args
            .nodegroup_name
            .clone()
            .unwrap_or_else(|| format!("{}-{:07x}", name, id));
        NodegroupAttributes {
            arn: format!(
                "arn:aws:eks:us-east-1:{}:nodegroup/{}/{}",
                ACCOUNT, args.cluster_name, nodegroup_name
            ),
            nodegroup_name,
            launch_template_version: args.launch_template.version.clone(),
        }
    }

    fn updated(
        _: &mut CloudState,
        _: &str,
        args: &NodegroupArgs,
        previous: Previous<Self>,
    ) -> NodegroupAttributes {
        NodegroupAttributes {
            launch_template_version: args.launch_template.version.clone(),
            ..previous.attributes
        }
    }
}
