//! netforge kernel
//!
//! Two-phase resource graph engine:
//! 1. **Construction Phase**: declare resources, freeze, resolve an order
//! 2. **Apply Phase**: realize resources in that order through a provider
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use netforge_kernel::prelude::*;
//!
//! // Construction phase
//! let mut builder = GraphBuilder::new();
//! let vpc = builder.declare(ResourceKind::Vpc, "main-vpc", params, [])?;
//! let plan = resolve(&builder.finish())?;
//!
//! // Apply phase
//! let deployment = Executor::new(provider).apply(&plan).await?;
//! ```

pub mod construction;
pub mod error;
pub mod executor;
pub mod graph;
pub mod resolver;
pub mod types;

pub use error::*;
pub use types::*;

/// Re-export the common types
pub mod prelude {
    pub use crate::construction::GraphBuilder;
    pub use crate::error::{ApplyError, GraphError, KernelError, KernelResult, ProviderError};
    pub use crate::executor::{
        ApplyOptions, Deployment, DeploymentId, Executor, ProviderAdapter, RealizeRequest,
        Realized,
    };
    pub use crate::graph::{Manifest, ResourceGraph};
    pub use crate::resolver::{resolve, ResolvedPlan};
    pub use crate::types::{
        AttributeRef, Attributes, ParamValue, Parameters, ResolvedResource, ResourceDeclaration,
        ResourceHandle, ResourceKind, ResourceName,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
