pub(crate) mod mock;

use eks_stack_providers::{declare, CLUSTER_NAME_OUTPUT};
use eks_stack_types::trust::{CNI_SERVICE_ACCOUNT, STS_AUDIENCE};
use eks_stack_types::{NodeReplacementPolicy, StackConfig};
use mock::{Cloud, ACCOUNT, ISSUER};
use resource_provider::{Engine, MemoryStateStore};
use serde_json::{json, Value};
use stack_model::ResourceAction;

fn engine(cloud: &Cloud) -> Engine<MemoryStateStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::new(cloud.registry(), MemoryStateStore::new())
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|line| line == entry)
        .unwrap_or_else(|| panic!("'{}' is not in {:?}", entry, log))
}

#[tokio::test]
async fn up_creates_the_whole_stack_once() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();

    let report = engine.apply(&stack).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().create, 9);
    assert_eq!(cloud.live().len(), 9);

    let log = cloud.log();
    assert!(position(&log, "create eks-role-1747") < position(&log, "create eks-1747"));
    assert!(position(&log, "create vpc-repro-1747") < position(&log, "create eks-1747"));
    assert!(position(&log, "create eks-1747") < position(&log, "create oidc-provider-1747"));
    assert!(position(&log, "create oidc-provider-1747") < position(&log, "create vpc-cni-role"));
    assert!(position(&log, "create vpc-cni-role") < position(&log, "create vpc-cni-addon"));
    assert!(
        position(&log, "create cluster-launch-template") < position(&log, "create managed-nodes")
    );

    let cluster_name = report.outputs[CLUSTER_NAME_OUTPUT].as_str().unwrap();
    assert!(cluster_name.starts_with("eks-1747-"));
    assert_eq!(
        engine.outputs().await.unwrap()[CLUSTER_NAME_OUTPUT],
        json!(cluster_name)
    );

    cloud.clear_log();
    let report = engine.apply(&stack).await.unwrap();
    assert!(report.is_noop(), "{}", report);
    assert_eq!(report.summary().same, 9);
    assert!(cloud.log().is_empty());
}

#[tokio::test]
async fn resources_are_wired_through_recorded_attributes() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();
    engine.apply(&stack).await.unwrap();
    let state = engine.store().snapshot().await;

    let cluster = &state.get("eks-1747").unwrap().args;
    assert_eq!(
        cluster["resourcesVpcConfig"]["subnetIds"],
        json!([
            "subnet-private-us-east-1a",
            "subnet-private-us-east-1b",
            "subnet-private-us-east-1c",
            "subnet-public-us-east-1a",
            "subnet-public-us-east-1b",
            "subnet-public-us-east-1c",
        ])
    );
    assert_eq!(
        cluster["roleArn"],
        json!(format!("arn:aws:iam::{}:role/eks-role-1747", ACCOUNT))
    );

    let nodegroup = &state.get("managed-nodes").unwrap().args;
    assert_eq!(
        nodegroup["subnets"],
        json!([
            "subnet-private-us-east-1a",
            "subnet-private-us-east-1b",
            "subnet-private-us-east-1c",
        ])
    );
    assert_eq!(nodegroup["launchTemplate"]["version"], json!("1"));

    let template = &state.get("cluster-launch-template").unwrap().args;
    let security_group = &state.get("eks-1747").unwrap().attributes["clusterSecurityGroupId"];
    assert_eq!(
        template["launchTemplateData"]["securityGroupIds"],
        json!([security_group])
    );
}

#[tokio::test]
async fn cni_role_trusts_the_cluster_issuer() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();
    engine.apply(&stack).await.unwrap();
    let state = engine.store().snapshot().await;

    let document = &state.get("vpc-cni-role").unwrap().args["assumeRolePolicyDocument"];
    let statement = &document["Statement"][0];
    assert_eq!(statement["Action"], json!("sts:AssumeRoleWithWebIdentity"));
    assert_eq!(
        statement["Principal"]["Federated"],
        json!(format!("arn:aws:iam::{}:oidc-provider/{}", ACCOUNT, ISSUER))
    );
    let equals = &statement["Condition"]["StringEquals"];
    assert_eq!(
        equals[format!("{}:sub", ISSUER)],
        json!(CNI_SERVICE_ACCOUNT)
    );
    assert_eq!(equals[format!("{}:aud", ISSUER)], json!(STS_AUDIENCE));

    let addon = &state.get("vpc-cni-addon").unwrap().args;
    assert_eq!(
        addon["serviceAccountRoleArn"],
        state.get("vpc-cni-role").unwrap().attributes["arn"]
    );
}

#[tokio::test]
async fn image_change_rolls_a_new_template_version_to_the_nodes() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let mut config = StackConfig::default();
    engine.apply(&declare(&config).unwrap()).await.unwrap();

    config.nodes.image_id = "ami-0123456789abcdef0".to_string();
    let stack = declare(&config).unwrap();

    // The new version number is only known once the template has been updated.
    let plan = engine.preview(&stack).await.unwrap();
    assert_eq!(plan.summary().update, 2);
    assert_eq!(plan.summary().same, 7);
    let template = plan.step("cluster-launch-template").unwrap();
    assert_eq!(
        template.changed,
        vec!["/launchTemplateData/imageId".to_string()]
    );
    assert!(plan.step("managed-nodes").unwrap().pending);

    cloud.clear_log();
    let report = engine.apply(&stack).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().update, 2);
    assert_eq!(
        cloud.log(),
        vec!["update cluster-launch-template", "update managed-nodes"]
    );

    let state = engine.store().snapshot().await;
    let template_name = state.get("cluster-launch-template").unwrap().attributes
        ["launchTemplateName"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(cloud.template_versions(&template_name), 2);
    let template = &state.get("cluster-launch-template").unwrap().attributes;
    assert_eq!(template["latestVersionNumber"], json!("2"));
    assert_eq!(template["defaultVersionNumber"], json!("2"));
    assert_eq!(
        state.get("managed-nodes").unwrap().attributes["launchTemplateVersion"],
        json!("2")
    );
}

#[tokio::test]
async fn replacement_policy_creates_the_new_node_group_first() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let mut config = StackConfig::default();
    config.nodes.replacement = NodeReplacementPolicy::ReplaceOnTemplateVersionChange;
    engine.apply(&declare(&config).unwrap()).await.unwrap();
    let before = engine.store().snapshot().await.get("managed-nodes").unwrap().attributes
        ["nodegroupName"]
        .clone();

    config.nodes.image_id = "ami-0123456789abcdef0".to_string();
    cloud.clear_log();
    let report = engine.apply(&declare(&config).unwrap()).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().update, 1);
    assert_eq!(report.summary().replace, 1);
    assert_eq!(
        cloud.log(),
        vec![
            "update cluster-launch-template",
            "create managed-nodes",
            "destroy managed-nodes"
        ]
    );
    let after = engine.store().snapshot().await.get("managed-nodes").unwrap().attributes
        ["nodegroupName"]
        .clone();
    assert_ne!(before, after);
}

#[tokio::test]
async fn renamed_cluster_role_replaces_the_cluster_before_deleting_the_old_one() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let mut config = StackConfig::default();
    engine.apply(&declare(&config).unwrap()).await.unwrap();
    let old_cluster = engine.store().snapshot().await.get("eks-1747").unwrap().attributes["name"]
        .clone();

    config.names.cluster_role_name = "eks-role-renamed".to_string();
    cloud.clear_log();
    let report = engine.apply(&declare(&config).unwrap()).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().replace, 4);
    assert_eq!(report.summary().update, 1);

    // The old cluster goes only after its node group and add-on moved, and the old role after it.
    let log = cloud.log();
    assert!(position(&log, "create managed-nodes") < position(&log, "destroy managed-nodes"));
    assert!(position(&log, "create vpc-cni-addon") < position(&log, "destroy vpc-cni-addon"));
    assert!(position(&log, "destroy managed-nodes") < position(&log, "destroy eks-1747"));
    assert!(position(&log, "destroy vpc-cni-addon") < position(&log, "destroy eks-1747"));
    assert!(position(&log, "destroy eks-1747") < position(&log, "destroy eks-role-1747"));

    let state = engine.store().snapshot().await;
    assert!(state.replaced.is_empty());
    assert_ne!(state.get("eks-1747").unwrap().attributes["name"], old_cluster);
    assert_eq!(
        state.get("eks-1747").unwrap().args["roleArn"],
        json!(format!("arn:aws:iam::{}:role/eks-role-renamed", ACCOUNT))
    );
    assert_eq!(cloud.live_count(), 9);
    assert_eq!(
        report.outputs[CLUSTER_NAME_OUTPUT],
        state.get("eks-1747").unwrap().attributes["name"]
    );
}

#[tokio::test]
async fn replaced_cluster_is_kept_while_its_node_group_is_stuck_on_it() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let mut config = StackConfig::default();
    engine.apply(&declare(&config).unwrap()).await.unwrap();

    config.names.cluster_role_name = "eks-role-renamed".to_string();
    cloud.fail_create("managed-nodes", true);
    let report = engine.apply(&declare(&config).unwrap()).await.unwrap();
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].name, "managed-nodes");
    let log = cloud.log();
    assert!(!log.contains(&"destroy eks-1747".to_string()));
    assert!(!log.contains(&"destroy eks-role-1747".to_string()));
    // Only the old add-on is gone. The old node group still runs on the old cluster and role.
    assert!(log.contains(&"destroy vpc-cni-addon".to_string()));
    assert_eq!(cloud.live_count(), 11);
    let held: Vec<String> = engine
        .store()
        .snapshot()
        .await
        .replaced
        .iter()
        .map(|replaced| replaced.name.clone())
        .collect();
    assert!(held.contains(&"eks-1747".to_string()));
    assert!(held.contains(&"eks-role-1747".to_string()));

    cloud.fail_create("managed-nodes", false);
    let report = engine.apply(&declare(&config).unwrap()).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert!(engine.store().snapshot().await.replaced.is_empty());
    assert_eq!(cloud.live_count(), 9);
}

#[tokio::test]
async fn failed_cluster_keeps_what_was_built() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();
    cloud.fail_create("eks-1747", true);

    let report = engine.apply(&stack).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].name, "eks-1747");
    assert_eq!(report.failed()[0].action, ResourceAction::Create);
    assert_eq!(report.summary().create, 3);
    let mut skipped = report.skipped.clone();
    skipped.sort();
    assert_eq!(
        skipped,
        vec![
            "cluster-launch-template",
            "managed-nodes",
            "oidc-provider-1747",
            "vpc-cni-addon",
            "vpc-cni-role",
        ]
    );
    assert_eq!(
        cloud.live().into_iter().collect::<Vec<_>>(),
        vec!["eks-role-1747", "nodes-role", "vpc-repro-1747"]
    );
    assert!(!cloud.log().iter().any(|line| line.starts_with("destroy")));
    assert!(report.outputs.get(CLUSTER_NAME_OUTPUT).is_none());

    cloud.fail_create("eks-1747", false);
    let report = engine.apply(&stack).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().same, 3);
    assert_eq!(report.summary().create, 6);
}

#[tokio::test]
async fn destroy_removes_dependents_first() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();
    engine.apply(&stack).await.unwrap();
    cloud.clear_log();

    let report = engine.destroy(&stack).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.summary().delete, 9);
    let log = cloud.log();
    assert!(position(&log, "destroy managed-nodes") < position(&log, "destroy cluster-launch-template"));
    assert!(position(&log, "destroy vpc-cni-addon") < position(&log, "destroy vpc-cni-role"));
    assert!(position(&log, "destroy vpc-cni-role") < position(&log, "destroy oidc-provider-1747"));
    assert!(position(&log, "destroy oidc-provider-1747") < position(&log, "destroy eks-1747"));
    assert!(position(&log, "destroy eks-1747") < position(&log, "destroy vpc-repro-1747"));
    assert!(position(&log, "destroy eks-1747") < position(&log, "destroy eks-role-1747"));
    assert!(cloud.live().is_empty());

    let state = engine.store().snapshot().await;
    assert!(state.resources.is_empty());
    assert!(state.outputs.is_empty());
}

#[tokio::test]
async fn failed_destroy_stops_before_what_it_depends_on() {
    let cloud = Cloud::default();
    let engine = engine(&cloud);
    let stack = declare(&StackConfig::default()).unwrap();
    engine.apply(&stack).await.unwrap();
    cloud.fail_destroy("eks-1747", true);

    let report = engine.destroy(&stack).await.unwrap();
    assert_eq!(report.failed().len(), 1);
    assert!(report.skipped.contains(&"vpc-repro-1747".to_string()));
    assert!(cloud.live().contains("vpc-repro-1747"));
    assert!(!cloud.live().contains("managed-nodes"));

    cloud.fail_destroy("eks-1747", false);
    let report = engine.destroy(&stack).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert!(cloud.live().is_empty());
    assert_eq!(
        engine.store().snapshot().await.outputs.get(CLUSTER_NAME_OUTPUT),
        None::<&Value>
    );
}
