//! netforge AWS topology
//!
//! Typed constructors over the kernel graph builder, configuration loading,
//! the supported topology variants and an in-memory simulated provider.
//!
//! ```rust,ignore
//! use netforge_aws::prelude::*;
//!
//! let config = TopologyConfig::load("network.yaml")?;
//! let plan = resolve(&assemble(&config)?)?;
//! let deployment = Executor::new(Arc::new(SimulatedProvider::new()))
//!     .apply(&plan)
//!     .await?;
//! println!("{}", deployment.export(DNS_EXPORT).unwrap_or_default());
//! ```

pub mod bootstrap;
pub mod builder;
pub mod config;
pub mod error;
pub mod provider;
pub mod rules;
pub mod topology;

pub use error::{TopologyError, TopologyResult};

/// Re-export the common types
pub mod prelude {
    pub use crate::bootstrap::{BootstrapPayload, PayloadEncoding};
    pub use crate::builder::{InfraBuilder, ListenerProtocol, MachineImage, Route, RouteTarget};
    pub use crate::config::{ConfigError, ConfigFormat, Ipv4Cidr, TopologyConfig};
    pub use crate::error::{TopologyError, TopologyResult};
    pub use crate::provider::{InventoryEntry, SimulatedProvider};
    pub use crate::rules::{NetworkAclRule, Protocol, RuleAction, SecurityRule};
    pub use crate::topology::{assemble, ComputeVariant, DNS_EXPORT, PUBLIC_IP_EXPORT};
    pub use netforge_kernel::prelude::*;
}
