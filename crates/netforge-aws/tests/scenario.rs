//! End-to-end topology scenarios against the simulated provider

use netforge_aws::prelude::*;
use netforge_test_utils::{sample_config, RecordingProvider};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn sample(compute: ComputeVariant) -> TopologyConfig {
    TopologyConfig::from_str(sample_config(), ConfigFormat::Json)
        .unwrap()
        .with_compute(compute)
}

fn position(plan: &ResolvedPlan, name: &str) -> usize {
    plan.position(&ResourceName::new(name))
        .unwrap_or_else(|| panic!("{name} missing from plan"))
}

#[test]
fn sample_config_parses_nested_data() {
    let config = sample(ComputeVariant::AutoScaling);
    assert_eq!(config.vpc_cidr, "10.0.0.0/16");
    assert_eq!(config.availability_zone1, "us-east-1a");
    assert_eq!(config.availability_zone2, "us-east-1b");
    assert_eq!(config.stack_name, "netforge");
}

#[test]
fn scenario_order_puts_vpc_first_and_attachment_last() {
    let plan = resolve(&assemble(&sample(ComputeVariant::AutoScaling)).unwrap()).unwrap();
    let order: Vec<&str> = plan.names().map(ResourceName::as_str).collect();

    assert_eq!(order.first(), Some(&"netforge-vpc"));
    assert_eq!(order.last(), Some(&"netforge-asg-attachment"));

    let listener = position(&plan, "netforge-listener-http");
    assert!(listener > position(&plan, "netforge-lb"));
    assert!(listener > position(&plan, "netforge-tg"));

    for subnet in ["netforge-subnet-public", "netforge-subnet-public2"] {
        assert!(position(&plan, subnet) > position(&plan, "netforge-vpc"));
        assert!(position(&plan, "netforge-lb") > position(&plan, subnet));
    }
    assert!(position(&plan, "netforge-asg") > position(&plan, "netforge-lt"));
    assert!(position(&plan, "netforge-rt-public") > position(&plan, "netforge-igw"));
}

#[test]
fn every_dependency_precedes_its_dependent() {
    for compute in [
        ComputeVariant::AutoScaling,
        ComputeVariant::StaticInstances,
        ComputeVariant::Standalone,
    ] {
        let plan = resolve(&assemble(&sample(compute)).unwrap()).unwrap();
        for (index, declaration) in plan.iter().enumerate() {
            for dependency in &declaration.depends_on {
                assert!(
                    plan.position(dependency).unwrap() < index,
                    "{compute}: {dependency} must precede {}",
                    declaration.name
                );
            }
        }
    }
}

#[tokio::test]
async fn auto_scaling_apply_exports_load_balancer_url() {
    let plan = resolve(&assemble(&sample(ComputeVariant::AutoScaling)).unwrap()).unwrap();
    let provider = Arc::new(SimulatedProvider::new());
    let deployment = Executor::new(provider.clone()).apply(&plan).await.unwrap();

    let dns = deployment.export(DNS_EXPORT).unwrap();
    assert!(dns.starts_with("http://netforge-lb-"));
    assert!(dns.ends_with(".us-east-1.elb.amazonaws.com"));

    assert_eq!(deployment.resources.len(), plan.len());
    assert_eq!(provider.len(), plan.len());

    let order: Vec<&ResourceName> = deployment.resources.keys().collect();
    let planned: Vec<&ResourceName> = plan.names().collect();
    assert_eq!(order, planned);

    let vpc = deployment
        .resource(&ResourceName::new("netforge-vpc"))
        .unwrap();
    assert!(vpc.provider_id.starts_with("vpc-"));
}

#[tokio::test]
async fn parameters_carry_realized_ids() {
    let plan = resolve(&assemble(&sample(ComputeVariant::AutoScaling)).unwrap()).unwrap();
    let deployment = Executor::new(Arc::new(SimulatedProvider::new()))
        .apply(&plan)
        .await
        .unwrap();

    let vpc_id = &deployment
        .resource(&ResourceName::new("netforge-vpc"))
        .unwrap()
        .provider_id;
    let group = deployment
        .resource(&ResourceName::new("netforge-asg"))
        .unwrap();
    assert_eq!(group.provider_id, "netforge-asg");

    let attachment = deployment
        .resource(&ResourceName::new("netforge-asg-attachment"))
        .unwrap();
    assert!(attachment.provider_id.starts_with("netforge-asg-"));

    let subnet = deployment
        .resource(&ResourceName::new("netforge-subnet-public"))
        .unwrap();
    assert_eq!(
        subnet.attribute("availability_zone"),
        Some(serde_json::json!("us-east-1a"))
    );
    assert!(vpc_id.starts_with("vpc-"));
}

#[tokio::test]
async fn static_instances_register_both_targets() {
    let plan = resolve(&assemble(&sample(ComputeVariant::StaticInstances)).unwrap()).unwrap();
    let deployment = Executor::new(Arc::new(SimulatedProvider::new()))
        .apply(&plan)
        .await
        .unwrap();

    for suffix in ["a", "b"] {
        let instance = deployment
            .resource(&ResourceName::new(format!("netforge-ec2-{suffix}")))
            .unwrap();
        assert!(instance.provider_id.starts_with("i-"));
        assert!(deployment
            .resource(&ResourceName::new(format!("netforge-tg-attachment-{suffix}")))
            .is_some());
    }
    assert!(deployment.export(DNS_EXPORT).unwrap().starts_with("http://"));
}

#[tokio::test]
async fn standalone_exports_public_ip() {
    let plan = resolve(&assemble(&sample(ComputeVariant::Standalone)).unwrap()).unwrap();
    let deployment = Executor::new(Arc::new(SimulatedProvider::new()))
        .apply(&plan)
        .await
        .unwrap();

    assert!(deployment.export(DNS_EXPORT).is_none());
    let address = deployment.export(PUBLIC_IP_EXPORT).unwrap();
    assert_eq!(address.split('.').count(), 4);
}

#[tokio::test]
async fn concurrent_apply_realizes_the_same_resources() {
    let plan = resolve(&assemble(&sample(ComputeVariant::AutoScaling)).unwrap()).unwrap();
    let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(5)));
    let deployment = Executor::new(provider)
        .with_options(ApplyOptions::default().with_max_concurrency(4))
        .apply(&plan)
        .await
        .unwrap();

    let mut realized: Vec<&str> = deployment.resources.keys().map(ResourceName::as_str).collect();
    let mut planned: Vec<&str> = plan.names().map(ResourceName::as_str).collect();
    realized.sort_unstable();
    planned.sort_unstable();
    assert_eq!(realized, planned);
    assert!(deployment
        .export(DNS_EXPORT)
        .unwrap()
        .contains("elb.amazonaws.com"));
}

#[tokio::test]
async fn failure_mid_scenario_reports_what_remains() {
    let plan = resolve(&assemble(&sample(ComputeVariant::AutoScaling)).unwrap()).unwrap();
    let provider = Arc::new(RecordingProvider::new().fail_on("netforge-lb"));
    let err = Executor::new(provider.clone()).apply(&plan).await.unwrap_err();

    assert_eq!(
        err.failed_resource(),
        Some(&ResourceName::new("netforge-lb"))
    );
    let lb = position(&plan, "netforge-lb");
    let expected: Vec<&ResourceName> = plan.names().take(lb).collect();
    let realized: Vec<&ResourceName> = err.realized().iter().collect();
    assert_eq!(realized, expected);
    assert_eq!(provider.calls().len(), lb + 1);
}

#[test]
fn undeclared_vpc_reference_is_rejected() {
    let mut builder = GraphBuilder::new();
    let mut params = Parameters::new();
    params.insert("vpc_id".into(), ParamValue::reference("ghost-vpc", "id"));
    let err = builder
        .declare(ResourceKind::SecurityGroup, "sg", params, [])
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::InvalidReference {
            resource: ResourceName::new("sg"),
            reference: ResourceName::new("ghost-vpc"),
        }
    );
    assert_eq!(builder.node_count(), 0);
}

#[test]
fn config_file_round_trip_through_assembly() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(sample_config().as_bytes()).unwrap();

    let config = TopologyConfig::load(file.path())
        .unwrap()
        .with_stack_name("demo");
    let graph = assemble(&config).unwrap();
    assert!(graph.get(&ResourceName::new("demo-vpc")).is_some());
    assert!(graph.exports().contains_key(DNS_EXPORT));
}

#[tokio::test]
async fn manifest_applies_without_topology_code() {
    let manifest = Manifest::from_yaml(
        r"
resources:
  - kind: subnet
    name: public-a
    parameters:
      vpc_id: { ref: main-vpc }
      cidr_block: 10.0.1.0/24
      availability_zone: us-east-1a
  - kind: vpc
    name: main-vpc
    parameters:
      cidr_block: 10.0.0.0/16
exports:
  VPC: { ref: main-vpc }
  SUBNET_AZ: { ref: public-a, attr: availability_zone }
",
    )
    .unwrap();
    let plan = resolve(&ResourceGraph::from_manifest(manifest).unwrap()).unwrap();
    let order: Vec<&str> = plan.names().map(ResourceName::as_str).collect();
    assert_eq!(order, ["main-vpc", "public-a"]);

    let deployment = Executor::new(Arc::new(SimulatedProvider::new()))
        .apply(&plan)
        .await
        .unwrap();
    assert!(deployment.export("VPC").unwrap().starts_with("vpc-"));
    assert_eq!(deployment.export("SUBNET_AZ"), Some("us-east-1a"));
}

#[tokio::test]
async fn provider_rejects_incomplete_manifest() {
    let manifest = Manifest::from_yaml(
        r"
resources:
  - kind: vpc
    name: main-vpc
",
    )
    .unwrap();
    let plan = resolve(&ResourceGraph::from_manifest(manifest).unwrap()).unwrap();
    let err = Executor::new(Arc::new(SimulatedProvider::new()))
        .apply(&plan)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cidr_block"));
    assert!(err.realized().is_empty());
}
