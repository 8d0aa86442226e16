//! Topology assembly
//!
//! Turns a validated `TopologyConfig` into the resource graph of one of the
//! supported compute variants. All variants share the network core: VPC,
//! internet gateway, public route table, subnets with their associations,
//! and one security group.

use crate::bootstrap::BootstrapPayload;
use crate::builder::{InfraBuilder, ListenerProtocol, MachineImage, Route, TARGET_PORT};
use crate::config::TopologyConfig;
use crate::error::TopologyResult;
use crate::rules::SecurityRule;
use netforge_kernel::graph::ResourceGraph;
use netforge_kernel::{ParamValue, ResourceHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Name of the load balancer URL export
pub const DNS_EXPORT: &str = "DNS";

/// Name of the standalone instance address export
pub const PUBLIC_IP_EXPORT: &str = "PUBLIC_IP";

/// Compute layer behind the network; exactly one per topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeVariant {
    /// Launch template and auto-scaling group behind the load balancer
    #[default]
    AutoScaling,
    /// Two fixed instances registered with the load balancer
    StaticInstances,
    /// One public instance, no load balancer
    Standalone,
}

impl ComputeVariant {
    /// Snake-case name, as accepted in config files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoScaling => "auto_scaling",
            Self::StaticInstances => "static_instances",
            Self::Standalone => "standalone",
        }
    }
}

impl fmt::Display for ComputeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "auto_scaling" => Ok(Self::AutoScaling),
            "static_instances" => Ok(Self::StaticInstances),
            "standalone" => Ok(Self::Standalone),
            other => Err(format!(
                "unknown compute variant '{other}' \
                 (expected auto_scaling, static_instances or standalone)"
            )),
        }
    }
}

/// Resources shared by every variant
struct NetworkCore {
    vpc: ResourceHandle,
    subnets: Vec<ResourceHandle>,
    security_group: ResourceHandle,
}

/// Build the resource graph for `config`
///
/// # Errors
/// Any `TopologyError`; the configuration is validated first.
pub fn assemble(config: &TopologyConfig) -> TopologyResult<ResourceGraph> {
    config.validate()?;

    let mut builder = InfraBuilder::new().with_machine(MachineImage {
        ami: config.ami.clone(),
        instance_type: config.instance_type.clone(),
    });
    let stack = config.stack_name.as_str();
    let name = |suffix: &str| format!("{stack}-{suffix}");

    match config.compute {
        ComputeVariant::AutoScaling => {
            let core = network_core(&mut builder, config, 2)?;
            let load_balancer = public_load_balancer(&mut builder, &core, stack)?;
            let target_group = builder.create_target_group(&name("tg"), &core.vpc)?;
            builder.create_listener(
                &name("listener-http"),
                ListenerProtocol::Http,
                &target_group,
                &load_balancer,
            )?;
            let template = builder.create_launch_template(
                &name("lt"),
                &BootstrapPayload::http_listener(TARGET_PORT),
                &[&core.security_group],
            )?;
            let subnets: Vec<&ResourceHandle> = core.subnets.iter().collect();
            let group = builder.create_auto_scaling_group(
                &name("asg"),
                &template,
                &subnets,
                &[&target_group],
            )?;
            builder.create_asg_attachment(&name("asg-attachment"), &group, &target_group)?;
            export_dns(&mut builder, &load_balancer)?;
        }
        ComputeVariant::StaticInstances => {
            let core = network_core(&mut builder, config, 2)?;
            let key_pair = builder.create_key_pair(&name("key"), &config.key_pair_material)?;
            let payload = BootstrapPayload::http_listener(TARGET_PORT);
            let instances = ["a", "b"]
                .into_iter()
                .map(|suffix| {
                    builder.create_instance(
                        &name(&format!("ec2-{suffix}")),
                        &core.subnets[0],
                        Some(&key_pair),
                        Some(&payload),
                        &[&core.security_group],
                    )
                })
                .collect::<TopologyResult<Vec<_>>>()?;
            let load_balancer = public_load_balancer(&mut builder, &core, stack)?;
            let target_group = builder.create_target_group(&name("tg"), &core.vpc)?;
            for (instance, suffix) in instances.iter().zip(["a", "b"]) {
                builder.create_target_group_attachment(
                    &name(&format!("tg-attachment-{suffix}")),
                    &target_group,
                    instance,
                )?;
            }
            builder.create_listener(
                &name("listener-http"),
                ListenerProtocol::Http,
                &target_group,
                &load_balancer,
            )?;
            export_dns(&mut builder, &load_balancer)?;
        }
        ComputeVariant::Standalone => {
            let core = network_core(&mut builder, config, 1)?;
            let key_pair = builder.create_key_pair(&name("key"), &config.key_pair_material)?;
            let instance = builder.create_instance(
                &name("ec2-a"),
                &core.subnets[0],
                Some(&key_pair),
                Some(&BootstrapPayload::http_listener(TARGET_PORT)),
                &[&core.security_group],
            )?;
            builder.export(PUBLIC_IP_EXPORT, instance.attr("public_ip"))?;
        }
    }

    let graph = builder.finish();
    info!(
        stack,
        compute = %config.compute,
        resources = graph.len(),
        "assembled topology"
    );
    Ok(graph)
}

/// VPC, gateway, route table, `subnet_count` subnets with associations,
/// and the public security group
///
/// A single subnet maps public IPs on launch; with two, instances are
/// reached through the load balancer instead.
fn network_core(
    builder: &mut InfraBuilder,
    config: &TopologyConfig,
    subnet_count: usize,
) -> TopologyResult<NetworkCore> {
    let stack = config.stack_name.as_str();
    let name = |suffix: &str| format!("{stack}-{suffix}");

    let vpc = builder.create_vpc(&name("vpc"), &config.vpc_cidr)?;
    let gateway = builder.create_internet_gateway(&name("igw"), &vpc)?;
    let route_table = builder.create_route_table(
        &name("rt-public"),
        &vpc,
        &[Route::via_gateway(&config.anywhere_cidr, &gateway)],
    )?;

    let map_public_ip = subnet_count == 1;
    let layout = [
        (
            "subnet-public",
            "rta-public",
            &config.subnet_public_cidr,
            &config.availability_zone1,
        ),
        (
            "subnet-public2",
            "rta-public2",
            &config.subnet_private_cidr,
            &config.availability_zone2,
        ),
    ];
    let mut subnets = Vec::with_capacity(subnet_count);
    for (subnet_name, _, cidr, zone) in layout.iter().take(subnet_count) {
        let subnet = builder.create_subnet(&name(subnet_name), &vpc, cidr, zone, map_public_ip)?;
        subnets.push(subnet);
    }
    for ((_, association, _, _), subnet) in layout.iter().zip(&subnets) {
        builder.create_route_table_association(
            &name(association),
            &route_table,
            Some(subnet),
            None,
        )?;
    }

    let security_group = builder.create_security_group(
        &name("sg-public"),
        &vpc,
        &[SecurityRule::allow_all(&config.anywhere_cidr)],
        &[SecurityRule::egress_all(&config.anywhere_cidr)],
    )?;

    Ok(NetworkCore {
        vpc,
        subnets,
        security_group,
    })
}

fn public_load_balancer(
    builder: &mut InfraBuilder,
    core: &NetworkCore,
    stack: &str,
) -> TopologyResult<ResourceHandle> {
    let subnets: Vec<&ResourceHandle> = core.subnets.iter().collect();
    builder.create_load_balancer(&format!("{stack}-lb"), &[&core.security_group], &subnets)
}

fn export_dns(builder: &mut InfraBuilder, load_balancer: &ResourceHandle) -> TopologyResult<()> {
    builder.export(
        DNS_EXPORT,
        ParamValue::concat(["http://".into(), load_balancer.attr("dns_name")]),
    )
}
