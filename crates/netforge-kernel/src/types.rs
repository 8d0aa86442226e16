//! Core types for the resource graph
//!
//! Defines the vocabulary shared by construction, resolution and apply:
//! - Resource kinds and names
//! - Parameter values and attribute references
//! - Declarations and their realized counterparts

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of infrastructure resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual private cloud
    Vpc,
    /// Subnet within a VPC
    Subnet,
    /// Route table
    RouteTable,
    /// Route table bound to a subnet or gateway
    RouteTableAssociation,
    /// Security group
    SecurityGroup,
    /// Network ACL
    NetworkAcl,
    /// Application load balancer
    LoadBalancer,
    /// Load balancer listener
    Listener,
    /// Load balancer target group
    TargetGroup,
    /// Instance registered with a target group
    TargetGroupAttachment,
    /// EC2 launch template
    LaunchTemplate,
    /// Auto-scaling group
    AutoScalingGroup,
    /// Auto-scaling group bound to a target group
    AsgAttachment,
    /// EC2 instance
    Instance,
    /// SSH key pair
    KeyPair,
    /// Internet gateway
    InternetGateway,
}

impl ResourceKind {
    /// All kinds, in a stable order
    pub const ALL: [ResourceKind; 16] = [
        Self::Vpc,
        Self::Subnet,
        Self::RouteTable,
        Self::RouteTableAssociation,
        Self::SecurityGroup,
        Self::NetworkAcl,
        Self::LoadBalancer,
        Self::Listener,
        Self::TargetGroup,
        Self::TargetGroupAttachment,
        Self::LaunchTemplate,
        Self::AutoScalingGroup,
        Self::AsgAttachment,
        Self::Instance,
        Self::KeyPair,
        Self::InternetGateway,
    ];

    /// AWS-style display name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "VPC",
            Self::Subnet => "Subnet",
            Self::RouteTable => "RouteTable",
            Self::RouteTableAssociation => "RouteTableAssociation",
            Self::SecurityGroup => "SecurityGroup",
            Self::NetworkAcl => "NetworkAcl",
            Self::LoadBalancer => "LoadBalancer",
            Self::Listener => "Listener",
            Self::TargetGroup => "TargetGroup",
            Self::TargetGroupAttachment => "TargetGroupAttachment",
            Self::LaunchTemplate => "LaunchTemplate",
            Self::AutoScalingGroup => "AutoScalingGroup",
            Self::AsgAttachment => "ASGAttachment",
            Self::Instance => "Instance",
            Self::KeyPair => "KeyPair",
            Self::InternetGateway => "InternetGateway",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique name of a resource within one graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    /// Create a resource name
    ///
    /// Emptiness is checked by the builder, not here, so that manifests
    /// can be deserialized before validation.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for empty or whitespace-only names
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ResourceName> for ResourceName {
    fn from(value: &ResourceName) -> Self {
        value.clone()
    }
}

/// Name of the attribute carrying the provider id
pub const ID_ATTRIBUTE: &str = "id";

/// Reference to a computed attribute of another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeRef {
    /// Referenced resource
    #[serde(rename = "ref")]
    pub resource: ResourceName,
    /// Attribute name; defaults to `id`
    #[serde(rename = "attr", default = "default_attribute")]
    pub attribute: String,
}

fn default_attribute() -> String {
    ID_ATTRIBUTE.to_string()
}

impl AttributeRef {
    /// Reference to `attribute` of `resource`
    #[must_use]
    pub fn new(resource: impl Into<ResourceName>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// String interpolation resolved at apply time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Concat {
    /// Parts joined in order
    pub concat: Vec<ParamValue>,
}

/// A parameter value: literal or reference
///
/// Serialized untagged so manifests read naturally:
/// `cidr_block: 10.0.0.0/16`, `vpc_id: { ref: my-vpc }`,
/// `url: { concat: ["http://", { ref: lb, attr: dns_name }] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// String literal
    String(String),
    /// List of values
    List(Vec<ParamValue>),
    /// Reference to another resource's attribute
    Ref(AttributeRef),
    /// String built at apply time
    Concat(Concat),
    /// Nested map, e.g. tags or rules
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Reference to another resource's attribute
    #[must_use]
    pub fn reference(resource: impl Into<ResourceName>, attribute: impl Into<String>) -> Self {
        Self::Ref(AttributeRef::new(resource, attribute))
    }

    /// Concatenation of parts into one string
    #[must_use]
    pub fn concat(parts: impl IntoIterator<Item = ParamValue>) -> Self {
        Self::Concat(Concat {
            concat: parts.into_iter().collect(),
        })
    }

    /// List parameter
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = ParamValue>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Visit every attribute reference nested in this value
    pub fn for_each_ref<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a AttributeRef),
    {
        match self {
            Self::Ref(r) => f(r),
            Self::List(items) | Self::Concat(Concat { concat: items }) => {
                for item in items {
                    item.for_each_ref(&mut *f);
                }
            }
            Self::Map(map) => {
                for item in map.values() {
                    item.for_each_ref(&mut *f);
                }
            }
            Self::Bool(_) | Self::Int(_) | Self::String(_) => {}
        }
    }

    /// All attribute references, in visiting order
    #[must_use]
    pub fn references(&self) -> Vec<&AttributeRef> {
        let mut refs = Vec::new();
        self.for_each_ref(&mut |r| refs.push(r));
        refs
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for ParamValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<AttributeRef> for ParamValue {
    fn from(value: AttributeRef) -> Self {
        Self::Ref(value)
    }
}

impl<V: Into<ParamValue>> From<Vec<V>> for ParamValue {
    fn from(value: Vec<V>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Parameters of a declaration, keyed by attribute name
pub type Parameters = BTreeMap<String, ParamValue>;

/// A declared resource
///
/// Immutable once added to a graph. `depends_on` holds explicit edges
/// plus every resource referenced from `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Resource kind
    pub kind: ResourceKind,
    /// Unique name
    pub name: ResourceName,
    /// Parameter values, literal or referenced
    #[serde(default)]
    pub parameters: Parameters,
    /// Names realized before this resource
    #[serde(default)]
    pub depends_on: IndexSet<ResourceName>,
}

impl ResourceDeclaration {
    /// Create a declaration with no parameters or dependencies
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<ResourceName>) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters: Parameters::new(),
            depends_on: IndexSet::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<ResourceName>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    /// Fold parameter references into `depends_on`
    pub(crate) fn absorb_references(&mut self) {
        let referenced: Vec<ResourceName> = self
            .parameters
            .values()
            .flat_map(ParamValue::references)
            .map(|r| r.resource.clone())
            .collect();
        self.depends_on.extend(referenced);
    }
}

/// Cheap handle to a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    kind: ResourceKind,
    name: ResourceName,
}

impl ResourceHandle {
    pub(crate) fn new(kind: ResourceKind, name: ResourceName) -> Self {
        Self { kind, name }
    }

    /// Kind of the referenced resource
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Name of the referenced resource
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Reference to the provider id of this resource
    #[must_use]
    pub fn id(&self) -> ParamValue {
        self.attr(ID_ATTRIBUTE)
    }

    /// Reference to a computed attribute of this resource
    #[must_use]
    pub fn attr(&self, attribute: &str) -> ParamValue {
        ParamValue::reference(self.name.clone(), attribute)
    }
}

impl From<&ResourceHandle> for ResourceName {
    fn from(value: &ResourceHandle) -> Self {
        value.name.clone()
    }
}

/// Computed attributes of a realized resource
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A realized resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    /// The declaration this resource realizes
    pub declaration: ResourceDeclaration,
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Attributes computed by the provider
    pub computed_attributes: Attributes,
}

impl ResolvedResource {
    /// Name of the realized resource
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.declaration.name
    }

    /// Look up an attribute; `id` maps to the provider id
    #[must_use]
    pub fn attribute(&self, attribute: &str) -> Option<serde_json::Value> {
        if attribute == ID_ATTRIBUTE {
            return Some(serde_json::Value::String(self.provider_id.clone()));
        }
        self.computed_attributes.get(attribute).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_collected_from_nested_values() {
        let value = ParamValue::concat([
            ParamValue::from("http://"),
            ParamValue::reference("lb", "dns_name"),
            ParamValue::list([ParamValue::reference("sg", "id")]),
        ]);

        let refs: Vec<String> = value.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["lb.dns_name", "sg.id"]);
    }

    #[test]
    fn param_value_untagged_yaml() {
        let yaml = r#"
cidr: 10.0.0.0/16
vpc: { ref: main-vpc }
port: 80
public: true
url: { concat: ["http://", { ref: lb, attr: dns_name }] }
"#;
        let params: Parameters = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params["cidr"], ParamValue::from("10.0.0.0/16"));
        assert_eq!(params["vpc"], ParamValue::reference("main-vpc", "id"));
        assert_eq!(params["port"], ParamValue::Int(80));
        assert_eq!(params["public"], ParamValue::Bool(true));
        assert_eq!(params["url"].references().len(), 1);
    }

    #[test]
    fn plain_maps_are_not_mistaken_for_references() {
        let yaml = "tags: { Name: main-vpc }";
        let params: Parameters = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(params["tags"], ParamValue::Map(_)));
        assert!(params["tags"].references().is_empty());
    }

    #[test]
    fn absorb_references_extends_depends_on() {
        let mut decl = ResourceDeclaration::new(ResourceKind::Subnet, "subnet")
            .with_dependency("explicit")
            .with_param("vpc_id", ParamValue::reference("vpc", "id"));
        decl.absorb_references();

        let deps: Vec<&str> = decl.depends_on.iter().map(ResourceName::as_str).collect();
        assert_eq!(deps, vec!["explicit", "vpc"]);
    }

    #[test]
    fn resolved_resource_id_attribute() {
        let resolved = ResolvedResource {
            declaration: ResourceDeclaration::new(ResourceKind::Vpc, "vpc"),
            provider_id: "vpc-123".to_string(),
            computed_attributes: Attributes::new(),
        };
        assert_eq!(
            resolved.attribute("id"),
            Some(serde_json::Value::String("vpc-123".into()))
        );
        assert_eq!(resolved.attribute("arn"), None);
    }

    #[test]
    fn kind_display_uses_aws_names() {
        assert_eq!(ResourceKind::Vpc.to_string(), "VPC");
        assert_eq!(ResourceKind::AsgAttachment.to_string(), "ASGAttachment");
    }
}
