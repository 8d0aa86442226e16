//! Security group and network ACL rule records

use netforge_kernel::{ParamValue, Parameters};
use serde::{Deserialize, Serialize};
use std::fmt;

/// IP protocol of a rule; `All` is AWS's `-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// Any protocol
    #[serde(rename = "-1")]
    All,
}

impl Protocol {
    /// AWS protocol string
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "-1",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One security group ingress or egress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// IP protocol
    pub protocol: Protocol,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
    /// Source or destination ranges
    pub cidr_blocks: Vec<String>,
}

impl SecurityRule {
    /// TCP on a single port
    #[must_use]
    pub fn tcp(port: u16, cidr: &str) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            cidr_blocks: vec![cidr.to_string()],
        }
    }

    /// All traffic in
    #[must_use]
    pub fn allow_all(cidr: &str) -> Self {
        Self {
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            cidr_blocks: vec![cidr.to_string()],
        }
    }

    /// TCP 22
    #[must_use]
    pub fn ssh(cidr: &str) -> Self {
        Self::tcp(22, cidr)
    }

    /// TCP 80
    #[must_use]
    pub fn http(cidr: &str) -> Self {
        Self::tcp(80, cidr)
    }

    /// TCP 443
    #[must_use]
    pub fn https(cidr: &str) -> Self {
        Self::tcp(443, cidr)
    }

    /// All traffic out
    #[must_use]
    pub fn egress_all(cidr: &str) -> Self {
        Self::allow_all(cidr)
    }

    pub(crate) fn to_param(&self) -> ParamValue {
        let mut map = Parameters::new();
        map.insert("protocol".into(), self.protocol.as_str().into());
        map.insert("from_port".into(), self.from_port.into());
        map.insert("to_port".into(), self.to_port.into());
        map.insert("cidr_blocks".into(), self.cidr_blocks.clone().into());
        ParamValue::Map(map)
    }
}

/// Whether a network ACL rule admits or drops traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Admit matching traffic
    Allow,
    /// Drop matching traffic
    Deny,
}

impl RuleAction {
    /// AWS action string
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// One network ACL entry; lower `rule_no` is evaluated first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAclRule {
    /// Evaluation order
    pub rule_no: u16,
    /// IP protocol
    pub protocol: Protocol,
    /// Allow or deny
    pub action: RuleAction,
    /// Source or destination range
    pub cidr_block: String,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
}

impl NetworkAclRule {
    /// Allow all traffic to or from `cidr`
    #[must_use]
    pub fn allow_all(rule_no: u16, cidr: &str) -> Self {
        Self {
            rule_no,
            protocol: Protocol::All,
            action: RuleAction::Allow,
            cidr_block: cidr.to_string(),
            from_port: 0,
            to_port: 0,
        }
    }

    /// Allow TCP on a port range
    #[must_use]
    pub fn allow_tcp(rule_no: u16, cidr: &str, from_port: u16, to_port: u16) -> Self {
        Self {
            rule_no,
            protocol: Protocol::Tcp,
            action: RuleAction::Allow,
            cidr_block: cidr.to_string(),
            from_port,
            to_port,
        }
    }

    /// Deny all traffic to or from `cidr`
    #[must_use]
    pub fn deny_all(rule_no: u16, cidr: &str) -> Self {
        Self {
            action: RuleAction::Deny,
            ..Self::allow_all(rule_no, cidr)
        }
    }

    pub(crate) fn to_param(&self) -> ParamValue {
        let mut map = Parameters::new();
        map.insert("rule_no".into(), self.rule_no.into());
        map.insert("protocol".into(), self.protocol.as_str().into());
        map.insert("action".into(), self.action.as_str().into());
        map.insert("cidr_block".into(), self.cidr_block.clone().into());
        map.insert("from_port".into(), self.from_port.into());
        map.insert("to_port".into(), self.to_port.into());
        ParamValue::Map(map)
    }
}
