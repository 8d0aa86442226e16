//! Graph Builder
//!
//! The primary interface for the build phase. Accumulates declarations and
//! edges, rejecting duplicates and dangling references as they arrive,
//! then freezes into a `ResourceGraph`.

use crate::error::GraphError;
use crate::graph::ResourceGraph;
use crate::types::{
    Parameters, ParamValue, ResourceDeclaration, ResourceHandle, ResourceKind, ResourceName,
};
use indexmap::IndexMap;
use tracing::debug;

/// Builder for resource graphs
///
/// Usage:
/// ```rust
/// use netforge_kernel::prelude::*;
///
/// let mut builder = GraphBuilder::new();
/// let vpc = builder
///     .declare(ResourceKind::Vpc, "main-vpc", Parameters::new(), [])
///     .unwrap();
/// let mut params = Parameters::new();
/// params.insert("vpc_id".into(), vpc.id());
/// builder
///     .declare(ResourceKind::Subnet, "public-a", params, [])
///     .unwrap();
/// let graph = builder.finish();
/// assert_eq!(graph.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    declarations: IndexMap<ResourceName, ResourceDeclaration>,
    exports: IndexMap<String, ParamValue>,
}

impl GraphBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of declarations so far
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.declarations.len()
    }

    /// Number of dependency edges so far
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.declarations.values().map(|d| d.depends_on.len()).sum()
    }

    /// True if `name` is declared
    #[must_use]
    pub fn contains(&self, name: &ResourceName) -> bool {
        self.declarations.contains_key(name)
    }

    /// Declaration by name
    #[must_use]
    pub fn get(&self, name: &ResourceName) -> Option<&ResourceDeclaration> {
        self.declarations.get(name)
    }

    /// Declare a resource
    ///
    /// Dependencies are the explicit edges; every resource referenced from
    /// `parameters` is added to them. All of them must already be declared.
    ///
    /// # Errors
    /// - `EmptyName` for a blank name
    /// - `DuplicateName` if `name` is taken (the first declaration stays)
    /// - `InvalidReference` for any undeclared dependency or reference
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        name: impl Into<ResourceName>,
        parameters: Parameters,
        dependencies: impl IntoIterator<Item = ResourceName>,
    ) -> Result<ResourceHandle, GraphError> {
        let mut declaration = ResourceDeclaration::new(kind, name);
        declaration.parameters = parameters;
        declaration.depends_on.extend(dependencies);
        self.insert(declaration)
    }

    /// Add a fully formed declaration
    ///
    /// # Errors
    /// Same as [`GraphBuilder::declare`].
    pub fn insert(
        &mut self,
        mut declaration: ResourceDeclaration,
    ) -> Result<ResourceHandle, GraphError> {
        if declaration.name.is_empty() {
            return Err(GraphError::EmptyName);
        }
        if self.declarations.contains_key(&declaration.name) {
            return Err(GraphError::DuplicateName {
                name: declaration.name,
            });
        }

        declaration.absorb_references();

        if let Some(missing) = declaration
            .depends_on
            .iter()
            .find(|dep| !self.declarations.contains_key(*dep))
        {
            return Err(GraphError::InvalidReference {
                resource: declaration.name.clone(),
                reference: missing.clone(),
            });
        }

        debug!(
            resource = %declaration.name,
            kind = %declaration.kind,
            dependencies = declaration.depends_on.len(),
            "declared resource"
        );

        let handle = ResourceHandle::new(declaration.kind, declaration.name.clone());
        self.declarations.insert(declaration.name.clone(), declaration);
        Ok(handle)
    }

    /// Add an edge: `dependent` is realized after `dependency`
    ///
    /// Cycles are not checked here; the resolver rejects them.
    ///
    /// # Errors
    /// `InvalidReference` if either side is undeclared.
    pub fn add_dependency(
        &mut self,
        dependent: &ResourceName,
        dependency: &ResourceName,
    ) -> Result<(), GraphError> {
        if !self.declarations.contains_key(dependency) {
            return Err(GraphError::InvalidReference {
                resource: dependent.clone(),
                reference: dependency.clone(),
            });
        }
        let Some(declaration) = self.declarations.get_mut(dependent) else {
            return Err(GraphError::InvalidReference {
                resource: dependency.clone(),
                reference: dependent.clone(),
            });
        };
        declaration.depends_on.insert(dependency.clone());
        Ok(())
    }

    /// Register a named output resolved after apply
    ///
    /// # Errors
    /// `EmptyName` for a blank export name, `InvalidReference` if the value
    /// references an undeclared resource.
    pub fn export(&mut self, name: impl Into<String>, value: ParamValue) -> Result<(), GraphError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(GraphError::EmptyName);
        }
        if let Some(missing) = value
            .references()
            .into_iter()
            .find(|r| !self.declarations.contains_key(&r.resource))
        {
            return Err(GraphError::InvalidReference {
                resource: ResourceName::new(name),
                reference: missing.resource.clone(),
            });
        }
        self.exports.insert(name, value);
        Ok(())
    }

    /// Freeze the graph
    #[must_use]
    pub fn finish(self) -> ResourceGraph {
        ResourceGraph::from_parts(self.declarations, self.exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc_params() -> Parameters {
        let mut params = Parameters::new();
        params.insert("cidr_block".into(), "10.0.0.0/16".into());
        params
    }

    #[test]
    fn test_builder_creates_nodes() {
        let mut builder = GraphBuilder::new();

        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", vpc_params(), [])
            .unwrap();
        let igw = builder
            .declare(ResourceKind::InternetGateway, "igw", Parameters::new(), [vpc.name().clone()])
            .unwrap();

        assert_eq!(builder.node_count(), 2);
        assert_eq!(builder.edge_count(), 1);
        assert_eq!(igw.kind(), ResourceKind::InternetGateway);
    }

    #[test]
    fn test_duplicate_name_keeps_first_declaration() {
        let mut builder = GraphBuilder::new();
        builder
            .declare(ResourceKind::Vpc, "vpc", vpc_params(), [])
            .unwrap();

        let result = builder.declare(ResourceKind::Subnet, "vpc", Parameters::new(), []);

        assert_eq!(result, Err(GraphError::DuplicateName { name: "vpc".into() }));
        assert_eq!(builder.node_count(), 1);
        let kept = builder.get(&"vpc".into()).unwrap();
        assert_eq!(kept.kind, ResourceKind::Vpc);
        assert_eq!(kept.parameters, vpc_params());
    }

    #[test]
    fn test_reference_to_undeclared_resource_fails_at_declaration() {
        let mut builder = GraphBuilder::new();
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), ParamValue::reference("missing-vpc", "id"));

        let result = builder.declare(ResourceKind::SecurityGroup, "sg", params, []);

        assert_eq!(
            result,
            Err(GraphError::InvalidReference {
                resource: "sg".into(),
                reference: "missing-vpc".into(),
            })
        );
        assert_eq!(builder.node_count(), 0);
    }

    #[test]
    fn test_explicit_dependency_must_exist() {
        let mut builder = GraphBuilder::new();
        let result =
            builder.declare(ResourceKind::Subnet, "subnet", Parameters::new(), ["vpc".into()]);
        assert!(matches!(result, Err(GraphError::InvalidReference { .. })));
    }

    #[test]
    fn test_parameter_references_become_edges() {
        let mut builder = GraphBuilder::new();
        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", vpc_params(), [])
            .unwrap();
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        builder
            .declare(ResourceKind::Subnet, "subnet", params, [])
            .unwrap();

        let subnet = builder.get(&"subnet".into()).unwrap();
        assert!(subnet.depends_on.contains(&ResourceName::from("vpc")));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut builder = GraphBuilder::new();
        let result = builder.declare(ResourceKind::Vpc, "  ", Parameters::new(), []);
        assert_eq!(result, Err(GraphError::EmptyName));
    }

    #[test]
    fn test_add_dependency_requires_both_sides() {
        let mut builder = GraphBuilder::new();
        builder
            .declare(ResourceKind::Vpc, "vpc", vpc_params(), [])
            .unwrap();

        assert!(builder.add_dependency(&"vpc".into(), &"nowhere".into()).is_err());
        assert!(builder.add_dependency(&"nowhere".into(), &"vpc".into()).is_err());
    }

    #[test]
    fn test_export_checks_references() {
        let mut builder = GraphBuilder::new();
        let result = builder.export("DNS", ParamValue::reference("lb", "dns_name"));
        assert!(matches!(result, Err(GraphError::InvalidReference { .. })));
    }
}
