//! In-memory simulated provider
//!
//! Realizes resources without a cloud: checks the parameters each kind
//! needs and fabricates AWS-shaped ids and attributes. Ids are sequential,
//! so the same plan always yields the same ids.

use async_trait::async_trait;
use indexmap::IndexMap;
use netforge_kernel::executor::{ProviderAdapter, RealizeRequest, Realized};
use netforge_kernel::{ProviderError, ResourceKind, ResourceName};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_ACCOUNT: &str = "123456789012";

/// One realized resource in the simulated inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Resource kind
    pub kind: ResourceKind,
    /// Declared name
    pub name: ResourceName,
    /// Fabricated id
    pub provider_id: String,
}

#[derive(Debug, Default)]
struct Inventory {
    next_serial: u64,
    entries: IndexMap<String, InventoryEntry>,
}

/// Simulated AWS provider
#[derive(Debug)]
pub struct SimulatedProvider {
    region: String,
    account_id: String,
    latency: Option<Duration>,
    inventory: Mutex<Inventory>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    /// Provider in the default region
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT.to_string(),
            latency: None,
            inventory: Mutex::new(Inventory::default()),
        }
    }

    /// Region used in ARNs and DNS names
    #[inline]
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Delay every realization, which makes concurrent apply observable
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Realized resources in realization order
    #[must_use]
    pub fn inventory(&self) -> Vec<InventoryEntry> {
        self.inventory.lock().entries.values().cloned().collect()
    }

    /// Number of realized resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.inventory.lock().entries.len()
    }

    /// True before anything was realized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{}:{resource}", self.region, self.account_id)
    }

    fn fabricate(&self, request: &RealizeRequest, serial: u64) -> Result<Realized, ProviderError> {
        let name = request.name().as_str();
        let hex = format!("{serial:017x}");
        let short = &hex[hex.len() - 8..];

        let realized = match request.kind() {
            ResourceKind::Vpc => Realized::new(format!("vpc-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("vpc/vpc-{hex}")))
                .with_attribute("cidr_block", require_str(request, "cidr_block")?),
            ResourceKind::Subnet => Realized::new(format!("subnet-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("subnet/subnet-{hex}")))
                .with_attribute(
                    "availability_zone",
                    request.param_str("availability_zone").unwrap_or(&self.region),
                ),
            ResourceKind::InternetGateway => Realized::new(format!("igw-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("internet-gateway/igw-{hex}"))),
            ResourceKind::RouteTable => Realized::new(format!("rtb-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("route-table/rtb-{hex}"))),
            ResourceKind::RouteTableAssociation => Realized::new(format!("rtbassoc-{hex}")),
            ResourceKind::SecurityGroup => Realized::new(format!("sg-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("security-group/sg-{hex}"))),
            ResourceKind::NetworkAcl => Realized::new(format!("acl-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("network-acl/acl-{hex}"))),
            ResourceKind::KeyPair => {
                let key_name = request.param_str("key_name").unwrap_or(name).to_string();
                Realized::new(format!("key-{hex}"))
                    .with_attribute("arn", self.arn("ec2", &format!("key-pair/{key_name}")))
                    .with_attribute("key_name", key_name)
            }
            ResourceKind::Instance => {
                let [a, b] = serial_octets(serial);
                Realized::new(format!("i-{hex}"))
                    .with_attribute("arn", self.arn("ec2", &format!("instance/i-{hex}")))
                    .with_attribute("public_ip", format!("54.{}.{a}.{b}", 160 + serial % 32))
            }
            ResourceKind::LaunchTemplate => Realized::new(format!("lt-{hex}"))
                .with_attribute("arn", self.arn("ec2", &format!("launch-template/lt-{hex}")))
                .with_attribute("latest_version", 1),
            ResourceKind::LoadBalancer => {
                let arn = self.arn(
                    "elasticloadbalancing",
                    &format!("loadbalancer/app/{name}/{short}"),
                );
                Realized::new(arn.clone())
                    .with_attribute("arn", arn)
                    .with_attribute(
                        "dns_name",
                        format!("{name}-{serial}.{}.elb.amazonaws.com", self.region),
                    )
            }
            ResourceKind::TargetGroup => {
                let arn = self.arn("elasticloadbalancing", &format!("targetgroup/{name}/{short}"));
                Realized::new(arn.clone()).with_attribute("arn", arn)
            }
            ResourceKind::Listener => {
                let arn = self.arn("elasticloadbalancing", &format!("listener/app/{name}/{short}"));
                Realized::new(arn.clone()).with_attribute("arn", arn)
            }
            ResourceKind::TargetGroupAttachment => Realized::new(format!(
                "{}-{short}",
                require_str(request, "target_group_arn")?
            )),
            ResourceKind::AutoScalingGroup => {
                let group_name = request.param_str("name").unwrap_or(name).to_string();
                Realized::new(group_name.clone()).with_attribute(
                    "arn",
                    self.arn(
                        "autoscaling",
                        &format!("autoScalingGroup:{short}:autoScalingGroupName/{group_name}"),
                    ),
                )
            }
            ResourceKind::AsgAttachment => Realized::new(format!(
                "{}-{short}",
                require_str(request, "autoscaling_group_name")?
            )),
        };
        Ok(realized)
    }
}

fn serial_octets(serial: u64) -> [u8; 2] {
    let [.., a, b] = serial.to_be_bytes();
    [a, b]
}

/// Parameters a kind cannot be realized without
fn required_parameters(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Vpc => &["cidr_block"],
        ResourceKind::Subnet => &["vpc_id", "cidr_block"],
        ResourceKind::InternetGateway
        | ResourceKind::RouteTable
        | ResourceKind::SecurityGroup
        | ResourceKind::NetworkAcl => &["vpc_id"],
        ResourceKind::RouteTableAssociation => &["route_table_id"],
        ResourceKind::LoadBalancer => &["subnets", "security_groups"],
        ResourceKind::Listener => &["load_balancer_arn", "default_actions", "port"],
        ResourceKind::TargetGroup => &["vpc_id", "port", "protocol"],
        ResourceKind::TargetGroupAttachment => &["target_group_arn", "target_id"],
        ResourceKind::LaunchTemplate => &["image_id", "instance_type"],
        ResourceKind::AutoScalingGroup => &["launch_template", "vpc_zone_identifiers"],
        ResourceKind::AsgAttachment => &["autoscaling_group_name", "lb_target_group_arn"],
        ResourceKind::Instance => &["ami", "instance_type", "subnet_id"],
        ResourceKind::KeyPair => &["public_key"],
    }
}

fn require_str<'a>(request: &'a RealizeRequest, key: &str) -> Result<&'a str, ProviderError> {
    request.param_str(key).ok_or_else(|| {
        ProviderError::new(format!(
            "{} '{}' requires string parameter '{key}'",
            request.kind(),
            request.name()
        ))
    })
}

fn check_parameters(request: &RealizeRequest) -> Result<(), ProviderError> {
    for key in required_parameters(request.kind()) {
        let present = match request.param(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ProviderError::new(format!(
                "missing required parameter '{key}' for {} '{}'",
                request.kind(),
                request.name()
            )));
        }
    }

    match request.kind() {
        ResourceKind::LoadBalancer => {
            let subnets = request
                .param("subnets")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if subnets < 2 {
                return Err(ProviderError::new(format!(
                    "load balancer '{}' must span at least 2 subnets",
                    request.name()
                )));
            }
        }
        ResourceKind::RouteTableAssociation => {
            if request.param("subnet_id").is_none() && request.param("gateway_id").is_none() {
                return Err(ProviderError::new(format!(
                    "route table association '{}' needs subnet_id or gateway_id",
                    request.name()
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    async fn realize(&self, request: RealizeRequest) -> Result<Realized, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        check_parameters(&request)?;

        let mut inventory = self.inventory.lock();
        if inventory.entries.values().any(|entry| entry.name == *request.name()) {
            return Err(ProviderError::new(format!(
                "{} '{}' already exists",
                request.kind(),
                request.name()
            )));
        }
        inventory.next_serial += 1;
        let realized = self.fabricate(&request, inventory.next_serial)?;

        debug!(
            resource = %request.name(),
            kind = %request.kind(),
            provider_id = %realized.provider_id,
            "simulated realization"
        );
        inventory.entries.insert(
            realized.provider_id.clone(),
            InventoryEntry {
                kind: request.kind(),
                name: request.name().clone(),
                provider_id: realized.provider_id.clone(),
            },
        );
        Ok(realized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netforge_kernel::ResourceDeclaration;
    use serde_json::{json, Map};

    fn request(kind: ResourceKind, name: &str, parameters: Value) -> RealizeRequest {
        let parameters: Map<String, Value> = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RealizeRequest {
            declaration: ResourceDeclaration::new(kind, name),
            parameters,
            dependencies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fabricates_aws_shaped_ids() {
        let provider = SimulatedProvider::new();
        let vpc = provider
            .realize(request(ResourceKind::Vpc, "vpc", json!({ "cidr_block": "10.0.0.0/16" })))
            .await
            .unwrap();
        assert!(vpc.provider_id.starts_with("vpc-"));
        assert_eq!(vpc.computed_attributes["cidr_block"], json!("10.0.0.0/16"));

        let lb = provider
            .realize(request(
                ResourceKind::LoadBalancer,
                "web",
                json!({ "subnets": ["subnet-1", "subnet-2"], "security_groups": ["sg-1"] }),
            ))
            .await
            .unwrap();
        let dns = lb.computed_attributes["dns_name"].as_str().unwrap();
        assert!(dns.ends_with(".us-east-1.elb.amazonaws.com"));
        assert!(lb.provider_id.starts_with("arn:aws:elasticloadbalancing:us-east-1:"));
        assert_eq!(provider.len(), 2);
    }

    #[tokio::test]
    async fn missing_parameter_is_rejected() {
        let provider = SimulatedProvider::new();
        let err = provider
            .realize(request(
                ResourceKind::Subnet,
                "subnet",
                json!({ "cidr_block": "10.0.1.0/24" }),
            ))
            .await
            .unwrap_err();
        assert!(err.message.contains("vpc_id"));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn load_balancer_needs_two_subnets() {
        let provider = SimulatedProvider::new();
        let err = provider
            .realize(request(
                ResourceKind::LoadBalancer,
                "web",
                json!({ "subnets": ["subnet-1"], "security_groups": ["sg-1"] }),
            ))
            .await
            .unwrap_err();
        assert!(err.message.contains("at least 2 subnets"));
    }

    #[tokio::test]
    async fn same_name_cannot_be_realized_twice() {
        let provider = SimulatedProvider::new();
        let params = json!({ "public_key": "ssh-rsa AAAA", "key_name": "deploy" });
        provider
            .realize(request(ResourceKind::KeyPair, "deploy", params.clone()))
            .await
            .unwrap();
        assert!(provider
            .realize(request(ResourceKind::KeyPair, "deploy", params))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn key_pair_exposes_key_name() {
        let provider = SimulatedProvider::new().with_region("eu-west-1");
        let key = provider
            .realize(request(
                ResourceKind::KeyPair,
                "deploy",
                json!({ "public_key": "ssh-rsa AAAA", "key_name": "deploy-key" }),
            ))
            .await
            .unwrap();
        assert_eq!(key.computed_attributes["key_name"], json!("deploy-key"));
        assert!(key.computed_attributes["arn"]
            .as_str()
            .unwrap()
            .contains(":eu-west-1:"));
    }
}
