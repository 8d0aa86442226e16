//! Typed AWS resource constructors
//!
//! `InfraBuilder` wraps the kernel `GraphBuilder` with one constructor per
//! AWS resource. Each constructor checks the kinds of the handles it is
//! given, tags the resource with `Name`, and expresses every cross-resource
//! value as a reference so the dependency edge follows automatically.

use crate::bootstrap::{BootstrapPayload, PayloadEncoding};
use crate::error::{TopologyError, TopologyResult};
use crate::rules::{NetworkAclRule, SecurityRule};
use netforge_kernel::construction::GraphBuilder;
use netforge_kernel::graph::ResourceGraph;
use netforge_kernel::{ParamValue, Parameters, ResourceHandle, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};

/// Image and size used for instances and launch templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineImage {
    /// AMI id
    pub ami: String,
    /// EC2 instance type
    pub instance_type: String,
}

impl Default for MachineImage {
    fn default() -> Self {
        Self {
            ami: "ami-0e68a7c5506b97265".to_string(),
            instance_type: "t2.micro".to_string(),
        }
    }
}

/// Target of a route table entry
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// Internet gateway
    Gateway(ResourceHandle),
    /// Instance, e.g. a NAT instance
    Instance(ResourceHandle),
}

/// One route table entry
#[derive(Debug, Clone)]
pub struct Route {
    /// Destination range
    pub cidr_block: String,
    /// Next hop
    pub target: RouteTarget,
}

impl Route {
    /// Route `cidr` through an internet gateway
    #[must_use]
    pub fn via_gateway(cidr: &str, gateway: &ResourceHandle) -> Self {
        Self {
            cidr_block: cidr.to_string(),
            target: RouteTarget::Gateway(gateway.clone()),
        }
    }

    /// Route `cidr` through an instance, e.g. a NAT instance
    #[must_use]
    pub fn via_instance(cidr: &str, instance: &ResourceHandle) -> Self {
        Self {
            cidr_block: cidr.to_string(),
            target: RouteTarget::Instance(instance.clone()),
        }
    }
}

/// Load balancer listener protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    /// HTTP on port 80
    Http,
    /// HTTPS on port 443
    Https,
}

impl ListenerProtocol {
    /// Protocol name as AWS spells it
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
        }
    }

    /// Listening port
    #[must_use]
    pub fn port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Port the target group forwards to and the bootstrap listener binds
pub const TARGET_PORT: u16 = 8000;

/// Builder for AWS resource graphs
#[derive(Debug, Default)]
pub struct InfraBuilder {
    graph: GraphBuilder,
    machine: MachineImage,
}

fn expect_kind(
    role: &'static str,
    handle: &ResourceHandle,
    expected: ResourceKind,
) -> TopologyResult<()> {
    if handle.kind() == expected {
        Ok(())
    } else {
        Err(TopologyError::KindMismatch {
            role,
            resource: handle.name().clone(),
            expected,
            actual: handle.kind(),
        })
    }
}

fn expect_all(
    role: &'static str,
    handles: &[&ResourceHandle],
    expected: ResourceKind,
) -> TopologyResult<()> {
    handles
        .iter()
        .try_for_each(|handle| expect_kind(role, handle, expected))
}

fn ids(handles: &[&ResourceHandle]) -> ParamValue {
    ParamValue::list(handles.iter().map(|handle| handle.id()))
}

fn object<const N: usize>(entries: [(&str, ParamValue); N]) -> ParamValue {
    ParamValue::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    )
}

impl InfraBuilder {
    /// Builder with the default machine image
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this image and instance type for instances and templates
    #[inline]
    #[must_use]
    pub fn with_machine(mut self, machine: MachineImage) -> Self {
        self.machine = machine;
        self
    }

    /// The underlying graph builder
    #[must_use]
    pub fn graph(&self) -> &GraphBuilder {
        &self.graph
    }

    /// Register a named output
    ///
    /// # Errors
    /// `Graph` if the value references an undeclared resource.
    pub fn export(&mut self, name: &str, value: ParamValue) -> TopologyResult<()> {
        self.graph.export(name, value)?;
        Ok(())
    }

    /// Freeze into a resource graph
    #[must_use]
    pub fn finish(self) -> ResourceGraph {
        self.graph.finish()
    }

    fn declare(
        &mut self,
        kind: ResourceKind,
        name: &str,
        mut parameters: Parameters,
    ) -> TopologyResult<ResourceHandle> {
        parameters.insert("tags".into(), object([("Name", name.into())]));
        Ok(self.graph.declare(kind, name, parameters, [])?)
    }

    /// # Errors
    /// `Graph` on a duplicate name.
    pub fn create_vpc(&mut self, name: &str, cidr: &str) -> TopologyResult<ResourceHandle> {
        let mut params = Parameters::new();
        params.insert("cidr_block".into(), cidr.into());
        self.declare(ResourceKind::Vpc, name, params)
    }

    /// # Errors
    /// `KindMismatch` unless `vpc` is a VPC; `Graph` on a duplicate name.
    pub fn create_internet_gateway(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        self.declare(ResourceKind::InternetGateway, name, params)
    }

    /// # Errors
    /// `KindMismatch` unless `vpc` is a VPC; `Graph` on a duplicate name.
    pub fn create_subnet(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
        cidr: &str,
        availability_zone: &str,
        map_public_ip: bool,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        params.insert("cidr_block".into(), cidr.into());
        params.insert("availability_zone".into(), availability_zone.into());
        params.insert("map_public_ip_on_launch".into(), map_public_ip.into());
        self.declare(ResourceKind::Subnet, name, params)
    }

    /// Route table with optional routes
    ///
    /// # Errors
    /// `KindMismatch` for a non-VPC `vpc`, or a gateway route whose target
    /// is not an internet gateway, or an instance route whose target is
    /// not an instance.
    pub fn create_route_table(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
        routes: &[Route],
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        let mut entries = Vec::with_capacity(routes.len());
        for route in routes {
            let target = match &route.target {
                RouteTarget::Gateway(gateway) => {
                    expect_kind("route gateway", gateway, ResourceKind::InternetGateway)?;
                    ("gateway_id", gateway.id())
                }
                RouteTarget::Instance(instance) => {
                    expect_kind("route instance", instance, ResourceKind::Instance)?;
                    ("instance_id", instance.id())
                }
            };
            entries.push(object([("cidr_block", route.cidr_block.as_str().into()), target]));
        }

        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        if !entries.is_empty() {
            params.insert("routes".into(), ParamValue::List(entries));
        }
        self.declare(ResourceKind::RouteTable, name, params)
    }

    /// Bind a route table to a subnet, a gateway, or both
    ///
    /// # Errors
    /// `InvalidTopology` if neither subnet nor gateway is given,
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_route_table_association(
        &mut self,
        name: &str,
        route_table: &ResourceHandle,
        subnet: Option<&ResourceHandle>,
        gateway: Option<&ResourceHandle>,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("route table", route_table, ResourceKind::RouteTable)?;
        if subnet.is_none() && gateway.is_none() {
            return Err(TopologyError::InvalidTopology(format!(
                "route table association '{name}' needs a subnet or a gateway"
            )));
        }

        let mut params = Parameters::new();
        params.insert("route_table_id".into(), route_table.id());
        if let Some(subnet) = subnet {
            expect_kind("subnet", subnet, ResourceKind::Subnet)?;
            params.insert("subnet_id".into(), subnet.id());
        }
        if let Some(gateway) = gateway {
            expect_kind("gateway", gateway, ResourceKind::InternetGateway)?;
            params.insert("gateway_id".into(), gateway.id());
        }
        self.declare(ResourceKind::RouteTableAssociation, name, params)
    }

    /// Security group created with its full rule set
    ///
    /// # Errors
    /// `KindMismatch` unless `vpc` is a VPC; `Graph` on a duplicate name.
    pub fn create_security_group(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
        ingress: &[SecurityRule],
        egress: &[SecurityRule],
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        params.insert("name".into(), name.into());
        params.insert(
            "ingress".into(),
            ParamValue::list(ingress.iter().map(SecurityRule::to_param)),
        );
        params.insert(
            "egress".into(),
            ParamValue::list(egress.iter().map(SecurityRule::to_param)),
        );
        self.declare(ResourceKind::SecurityGroup, name, params)
    }

    /// Network ACL attached to one subnet
    ///
    /// # Errors
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_network_acl(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
        subnet: &ResourceHandle,
        ingress: &[NetworkAclRule],
        egress: &[NetworkAclRule],
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        expect_kind("subnet", subnet, ResourceKind::Subnet)?;
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        params.insert("subnet_ids".into(), ids(&[subnet]));
        params.insert(
            "ingress".into(),
            ParamValue::list(ingress.iter().map(NetworkAclRule::to_param)),
        );
        params.insert(
            "egress".into(),
            ParamValue::list(egress.iter().map(NetworkAclRule::to_param)),
        );
        self.declare(ResourceKind::NetworkAcl, name, params)
    }

    /// # Errors
    /// `InvalidTopology` for empty key material.
    pub fn create_key_pair(
        &mut self,
        name: &str,
        public_key_material: &str,
    ) -> TopologyResult<ResourceHandle> {
        if public_key_material.trim().is_empty() {
            return Err(TopologyError::InvalidTopology(format!(
                "key pair '{name}' has no public key material"
            )));
        }
        let mut params = Parameters::new();
        params.insert("public_key".into(), public_key_material.into());
        params.insert("key_name".into(), name.into());
        self.declare(ResourceKind::KeyPair, name, params)
    }

    /// EC2 instance with a plain-text bootstrap payload
    ///
    /// # Errors
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_instance(
        &mut self,
        name: &str,
        subnet: &ResourceHandle,
        key_pair: Option<&ResourceHandle>,
        user_data: Option<&BootstrapPayload>,
        security_groups: &[&ResourceHandle],
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("subnet", subnet, ResourceKind::Subnet)?;
        expect_all("security group", security_groups, ResourceKind::SecurityGroup)?;

        let mut params = Parameters::new();
        params.insert("ami".into(), self.machine.ami.as_str().into());
        params.insert("instance_type".into(), self.machine.instance_type.as_str().into());
        params.insert("subnet_id".into(), subnet.id());
        params.insert("vpc_security_group_ids".into(), ids(security_groups));
        params.insert("user_data_replace_on_change".into(), true.into());
        if let Some(payload) = user_data {
            params.insert(
                "user_data".into(),
                payload.encode(PayloadEncoding::Plain).into(),
            );
        }
        if let Some(key_pair) = key_pair {
            expect_kind("key pair", key_pair, ResourceKind::KeyPair)?;
            params.insert("key_name".into(), key_pair.attr("key_name"));
        }
        self.declare(ResourceKind::Instance, name, params)
    }

    /// NAT instance: source/destination check disabled
    ///
    /// # Errors
    /// `KindMismatch` unless `subnet` is a subnet.
    pub fn create_nat_instance(
        &mut self,
        name: &str,
        subnet: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("subnet", subnet, ResourceKind::Subnet)?;
        let mut params = Parameters::new();
        params.insert("ami".into(), self.machine.ami.as_str().into());
        params.insert("instance_type".into(), self.machine.instance_type.as_str().into());
        params.insert("subnet_id".into(), subnet.id());
        params.insert("source_dest_check".into(), false.into());
        self.declare(ResourceKind::Instance, name, params)
    }

    /// Subnets must span at least two distinct availability zones
    ///
    /// Zones given as references are only known at apply time and count
    /// as distinct.
    fn expect_cross_zone(&self, name: &str, subnets: &[&ResourceHandle]) -> TopologyResult<()> {
        let mut zones = BTreeSet::new();
        let mut unresolved = 0usize;
        for subnet in subnets {
            match self
                .graph
                .get(subnet.name())
                .and_then(|decl| decl.parameters.get("availability_zone"))
            {
                Some(ParamValue::String(zone)) => {
                    zones.insert(zone.as_str());
                }
                _ => unresolved += 1,
            }
        }
        if zones.len() + unresolved < 2 {
            return Err(TopologyError::InvalidTopology(format!(
                "load balancer '{name}' needs subnets in 2 availability zones, got {}",
                zones.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(())
    }

    /// Internet-facing IPv4 load balancer
    ///
    /// # Errors
    /// `InvalidTopology` with fewer than two subnets, subnets that do not
    /// span two availability zones, or no security group. `KindMismatch`
    /// for wrongly typed handles.
    pub fn create_load_balancer(
        &mut self,
        name: &str,
        security_groups: &[&ResourceHandle],
        subnets: &[&ResourceHandle],
    ) -> TopologyResult<ResourceHandle> {
        if subnets.len() < 2 {
            return Err(TopologyError::InvalidTopology(format!(
                "load balancer '{name}' needs at least 2 subnets, got {}",
                subnets.len()
            )));
        }
        if security_groups.is_empty() {
            return Err(TopologyError::InvalidTopology(format!(
                "load balancer '{name}' needs at least 1 security group"
            )));
        }
        expect_all("security group", security_groups, ResourceKind::SecurityGroup)?;
        expect_all("subnet", subnets, ResourceKind::Subnet)?;
        self.expect_cross_zone(name, subnets)?;

        let mut params = Parameters::new();
        params.insert("name".into(), name.into());
        params.insert("internal".into(), false.into());
        params.insert("ip_address_type".into(), "ipv4".into());
        params.insert("security_groups".into(), ids(security_groups));
        params.insert("subnets".into(), ids(subnets));
        self.declare(ResourceKind::LoadBalancer, name, params)
    }

    /// Instance target group forwarding HTTP to port 8000
    ///
    /// # Errors
    /// `KindMismatch` unless `vpc` is a VPC.
    pub fn create_target_group(
        &mut self,
        name: &str,
        vpc: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("vpc", vpc, ResourceKind::Vpc)?;
        let mut params = Parameters::new();
        params.insert("name".into(), name.into());
        params.insert("target_type".into(), "instance".into());
        params.insert("protocol".into(), "HTTP".into());
        params.insert("port".into(), TARGET_PORT.into());
        params.insert("protocol_version".into(), "HTTP1".into());
        params.insert("vpc_id".into(), vpc.id());
        self.declare(ResourceKind::TargetGroup, name, params)
    }

    /// Listener forwarding to a target group
    ///
    /// # Errors
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_listener(
        &mut self,
        name: &str,
        protocol: ListenerProtocol,
        target_group: &ResourceHandle,
        load_balancer: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("target group", target_group, ResourceKind::TargetGroup)?;
        expect_kind("load balancer", load_balancer, ResourceKind::LoadBalancer)?;

        let action = object([
            ("type", "forward".into()),
            ("target_group_arn", target_group.attr("arn")),
        ]);
        let mut params = Parameters::new();
        params.insert("default_actions".into(), ParamValue::List(vec![action]));
        params.insert("load_balancer_arn".into(), load_balancer.attr("arn"));
        params.insert("protocol".into(), protocol.as_str().into());
        params.insert("port".into(), protocol.port().into());
        self.declare(ResourceKind::Listener, name, params)
    }

    /// Register an instance with a target group on port 8000
    ///
    /// # Errors
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_target_group_attachment(
        &mut self,
        name: &str,
        target_group: &ResourceHandle,
        instance: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("target group", target_group, ResourceKind::TargetGroup)?;
        expect_kind("instance", instance, ResourceKind::Instance)?;
        let mut params = Parameters::new();
        params.insert("port".into(), TARGET_PORT.into());
        params.insert("target_group_arn".into(), target_group.attr("arn"));
        params.insert("target_id".into(), instance.id());
        self.declare(ResourceKind::TargetGroupAttachment, name, params)
    }

    /// Launch template with a base64 bootstrap payload
    ///
    /// # Errors
    /// `KindMismatch` unless every security group is one.
    pub fn create_launch_template(
        &mut self,
        name: &str,
        user_data: &BootstrapPayload,
        security_groups: &[&ResourceHandle],
    ) -> TopologyResult<ResourceHandle> {
        expect_all("security group", security_groups, ResourceKind::SecurityGroup)?;
        let mut params = Parameters::new();
        params.insert("name".into(), name.into());
        params.insert("description".into(), name.into());
        params.insert("image_id".into(), self.machine.ami.as_str().into());
        params.insert("instance_type".into(), self.machine.instance_type.as_str().into());
        params.insert(
            "user_data".into(),
            user_data.encode(PayloadEncoding::Base64).into(),
        );
        params.insert("vpc_security_group_ids".into(), ids(security_groups));
        params.insert("default_version".into(), 1u32.into());
        self.declare(ResourceKind::LaunchTemplate, name, params)
    }

    /// Auto-scaling group of exactly one instance
    ///
    /// # Errors
    /// `InvalidTopology` without subnets, `KindMismatch` for wrongly typed
    /// handles.
    pub fn create_auto_scaling_group(
        &mut self,
        name: &str,
        launch_template: &ResourceHandle,
        subnets: &[&ResourceHandle],
        target_groups: &[&ResourceHandle],
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("launch template", launch_template, ResourceKind::LaunchTemplate)?;
        expect_all("subnet", subnets, ResourceKind::Subnet)?;
        expect_all("target group", target_groups, ResourceKind::TargetGroup)?;
        if subnets.is_empty() {
            return Err(TopologyError::InvalidTopology(format!(
                "auto-scaling group '{name}' needs at least 1 subnet"
            )));
        }

        let mut params = Parameters::new();
        params.insert("name".into(), name.into());
        params.insert("desired_capacity".into(), 1u32.into());
        params.insert("min_size".into(), 1u32.into());
        params.insert("max_size".into(), 1u32.into());
        params.insert(
            "launch_template".into(),
            object([
                ("id", launch_template.id()),
                ("version", "$Latest".into()),
            ]),
        );
        params.insert("vpc_zone_identifiers".into(), ids(subnets));
        params.insert(
            "target_group_arns".into(),
            ParamValue::list(target_groups.iter().map(|tg| tg.attr("arn"))),
        );
        self.declare(ResourceKind::AutoScalingGroup, name, params)
    }

    /// Attach an auto-scaling group to a target group
    ///
    /// # Errors
    /// `KindMismatch` for wrongly typed handles.
    pub fn create_asg_attachment(
        &mut self,
        name: &str,
        group: &ResourceHandle,
        target_group: &ResourceHandle,
    ) -> TopologyResult<ResourceHandle> {
        expect_kind("auto-scaling group", group, ResourceKind::AutoScalingGroup)?;
        expect_kind("target group", target_group, ResourceKind::TargetGroup)?;
        let mut params = Parameters::new();
        params.insert("autoscaling_group_name".into(), group.id());
        params.insert("lb_target_group_arn".into(), target_group.attr("arn"));
        self.declare(ResourceKind::AsgAttachment, name, params)
    }
}
