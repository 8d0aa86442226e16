//! Topology configuration
//!
//! Loaded from JSON, YAML or TOML. Stack configuration files nest the
//! record under a top-level `data` key; that wrapper is removed before
//! the fields are read.

use crate::topology::ComputeVariant;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Configuration errors; all are fatal before any resource is declared
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The text is not valid for its format
    #[error("failed to parse {format} config: {message}")]
    Parse {
        /// Format the text was parsed as
        format: ConfigFormat,
        /// Parser message
        message: String,
    },

    /// A required field is absent or empty
    #[error("missing required config field '{field}'")]
    MissingField {
        /// Field name
        field: &'static str,
    },

    /// A CIDR field does not parse
    #[error("config field '{field}' is not a valid IPv4 CIDR: '{value}'")]
    InvalidCidr {
        /// Field name
        field: &'static str,
        /// Value as given
        value: String,
    },

    /// A semantic check failed
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The file extension names no known format
    #[error("unsupported config format '{extension}' (expected json, yaml, yml or toml)")]
    UnsupportedFormat {
        /// Extension as found, lowercased
        extension: String,
    },
}

/// Supported configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON
    Json,
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

impl ConfigFormat {
    /// Pick a format from a file extension
    ///
    /// # Errors
    /// `UnsupportedFormat` for anything but json, yaml, yml or toml.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "JSON",
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
        })
    }
}

/// IPv4 CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix_length: u8,
}

impl Ipv4Cidr {
    /// Address as written
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length, 0 to 32
    #[must_use]
    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    fn mask(prefix_length: u8) -> u32 {
        if prefix_length == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_length))
        }
    }

    /// First address of the block
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & Self::mask(self.prefix_length))
    }

    /// Whether `other` lies entirely inside this block
    #[must_use]
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        let mask = Self::mask(self.prefix_length);
        other.prefix_length >= self.prefix_length
            && u32::from(other.address) & mask == u32::from(self.address) & mask
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(cidr: &str) -> Result<Self, Self::Err> {
        let (addr_str, prefix_str) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("missing prefix length in '{cidr}'"))?;
        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| format!("invalid IPv4 address '{addr_str}'"))?;
        let prefix_length = prefix_str
            .parse::<u8>()
            .map_err(|_| format!("invalid prefix length '{prefix_str}'"))?;
        if prefix_length > 32 {
            return Err(format!("prefix length {prefix_length} exceeds 32"));
        }
        Ok(Self {
            address,
            prefix_length,
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_length)
    }
}

fn default_stack_name() -> String {
    "netforge".to_string()
}

/// Topology configuration record
///
/// Required fields default to empty during deserialization so that
/// `validate` can name the missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// VPC range
    #[serde(default)]
    pub vpc_cidr: String,
    /// First subnet range
    #[serde(default)]
    pub subnet_public_cidr: String,
    /// Second subnet; public in the load-balanced variants
    #[serde(default)]
    pub subnet_private_cidr: String,
    /// Range allowed in and out, usually `0.0.0.0/0`
    #[serde(default)]
    pub anywhere_cidr: String,
    #[serde(default)]
    pub availability_zone1: String,
    #[serde(default)]
    pub availability_zone2: String,
    /// EC2 instance type
    #[serde(default)]
    pub instance_type: String,
    /// AMI id
    #[serde(default)]
    pub ami: String,
    /// Public key for the instance key pair
    #[serde(default)]
    pub key_pair_material: String,
    /// Prefix for every resource name
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Compute layer behind the network
    #[serde(default)]
    pub compute: ComputeVariant,
}

impl TopologyConfig {
    /// Load and validate a config file; the format follows the extension
    ///
    /// # Errors
    /// `Io`, `UnsupportedFormat`, `Parse`, or any validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), %format, "loading topology config");
        Self::from_str(&text, format)
    }

    /// Parse and validate config text
    ///
    /// # Errors
    /// `Parse` for malformed text, otherwise any validation error.
    pub fn from_str(text: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse { format, message };
        let value: Value = match format {
            ConfigFormat::Json => {
                serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?
            }
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        };

        let value = match value {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };

        let config: Self =
            serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields, CIDRs and availability zones
    ///
    /// # Errors
    /// The first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("vpc_cidr", &self.vpc_cidr),
            ("subnet_public_cidr", &self.subnet_public_cidr),
            ("subnet_private_cidr", &self.subnet_private_cidr),
            ("anywhere_cidr", &self.anywhere_cidr),
            ("availability_zone1", &self.availability_zone1),
            ("availability_zone2", &self.availability_zone2),
            ("instance_type", &self.instance_type),
            ("ami", &self.ami),
            ("key_pair_material", &self.key_pair_material),
            ("stack_name", &self.stack_name),
        ];
        if let Some(&(field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::MissingField { field });
        }

        let vpc = parse_cidr("vpc_cidr", &self.vpc_cidr)?;
        let public = parse_cidr("subnet_public_cidr", &self.subnet_public_cidr)?;
        let private = parse_cidr("subnet_private_cidr", &self.subnet_private_cidr)?;
        parse_cidr("anywhere_cidr", &self.anywhere_cidr)?;

        for (field, subnet) in [("subnet_public_cidr", public), ("subnet_private_cidr", private)] {
            if !vpc.contains(&subnet) {
                return Err(ConfigError::Invalid(format!(
                    "{field} {subnet} is outside vpc_cidr {vpc}"
                )));
            }
        }
        if public.contains(&private) || private.contains(&public) {
            return Err(ConfigError::Invalid(format!(
                "subnet CIDRs {public} and {private} overlap"
            )));
        }
        if self.availability_zone1 == self.availability_zone2 {
            return Err(ConfigError::Invalid(format!(
                "availability zones must differ, both are '{}'",
                self.availability_zone1
            )));
        }
        Ok(())
    }

    /// Replace the compute variant
    #[inline]
    #[must_use]
    pub fn with_compute(mut self, compute: ComputeVariant) -> Self {
        self.compute = compute;
        self
    }

    /// Replace the stack name
    #[inline]
    #[must_use]
    pub fn with_stack_name(mut self, stack_name: impl Into<String>) -> Self {
        self.stack_name = stack_name.into();
        self
    }
}

fn parse_cidr(field: &'static str, value: &str) -> Result<Ipv4Cidr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidCidr {
        field,
        value: value.to_string(),
    })
}
