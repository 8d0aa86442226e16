//! Frozen resource graph
//!
//! A `ResourceGraph` can only come out of `GraphBuilder::finish` or a
//! validated manifest, so every edge points at a declared resource.

use crate::error::GraphError;
use crate::types::{ParamValue, ResourceDeclaration, ResourceName};
use indexmap::IndexMap;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

/// Serialized form of a graph
///
/// ```yaml
/// resources:
///   - kind: vpc
///     name: main-vpc
///     parameters: { cidr_block: 10.0.0.0/16 }
///   - kind: subnet
///     name: public-a
///     parameters: { vpc_id: { ref: main-vpc } }
/// exports:
///   VPC: { ref: main-vpc }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Declarations in document order
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
    /// Named outputs
    #[serde(default)]
    pub exports: IndexMap<String, ParamValue>,
}

impl Manifest {
    /// Parse a YAML (or JSON, which is YAML) manifest
    ///
    /// # Errors
    /// Returns the parser error for malformed documents.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

/// Immutable graph of declarations, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGraph {
    declarations: IndexMap<ResourceName, ResourceDeclaration>,
    exports: IndexMap<String, ParamValue>,
}

impl ResourceGraph {
    pub(crate) fn from_parts(
        declarations: IndexMap<ResourceName, ResourceDeclaration>,
        exports: IndexMap<String, ParamValue>,
    ) -> Self {
        Self {
            declarations,
            exports,
        }
    }

    /// Build a graph from a manifest
    ///
    /// Forward references are allowed since the manifest is one document,
    /// which also means it may contain cycles; `resolve` rejects those.
    ///
    /// # Errors
    /// `EmptyName`, `DuplicateName` or `InvalidReference`.
    pub fn from_manifest(manifest: Manifest) -> Result<Self, GraphError> {
        let mut declarations = IndexMap::with_capacity(manifest.resources.len());
        for mut declaration in manifest.resources {
            if declaration.name.is_empty() {
                return Err(GraphError::EmptyName);
            }
            if declarations.contains_key(&declaration.name) {
                return Err(GraphError::DuplicateName {
                    name: declaration.name,
                });
            }
            declaration.absorb_references();
            declarations.insert(declaration.name.clone(), declaration);
        }

        for declaration in declarations.values() {
            if let Some(missing) = declaration
                .depends_on
                .iter()
                .find(|dep| !declarations.contains_key(*dep))
            {
                return Err(GraphError::InvalidReference {
                    resource: declaration.name.clone(),
                    reference: missing.clone(),
                });
            }
        }

        for (name, value) in &manifest.exports {
            if let Some(missing) = value
                .references()
                .into_iter()
                .find(|r| !declarations.contains_key(&r.resource))
            {
                return Err(GraphError::InvalidReference {
                    resource: ResourceName::new(name.clone()),
                    reference: missing.resource.clone(),
                });
            }
        }

        Ok(Self::from_parts(declarations, manifest.exports))
    }

    /// Serialize back into a manifest
    #[must_use]
    pub fn to_manifest(&self) -> Manifest {
        Manifest {
            resources: self.declarations.values().cloned().collect(),
            exports: self.exports.clone(),
        }
    }

    /// Number of declarations
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// True for a graph with no declarations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Number of dependency edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.declarations.values().map(|d| d.depends_on.len()).sum()
    }

    /// Declaration by name
    #[must_use]
    pub fn get(&self, name: &ResourceName) -> Option<&ResourceDeclaration> {
        self.declarations.get(name)
    }

    /// Position of a declaration in declaration order
    #[must_use]
    pub fn index_of(&self, name: &ResourceName) -> Option<usize> {
        self.declarations.get_index_of(name)
    }

    /// Declaration at a position
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&ResourceDeclaration> {
        self.declarations.get_index(index).map(|(_, d)| d)
    }

    /// Declarations in declaration order
    pub fn declarations(&self) -> impl Iterator<Item = &ResourceDeclaration> + '_ {
        self.declarations.values()
    }

    /// Named outputs
    #[must_use]
    pub fn exports(&self) -> &IndexMap<String, ParamValue> {
        &self.exports
    }

    /// Names of resources that directly depend on `name`
    #[must_use]
    pub fn dependents(&self, name: &ResourceName) -> Vec<&ResourceName> {
        self.declarations
            .values()
            .filter(|d| d.depends_on.contains(name))
            .map(|d| &d.name)
            .collect()
    }

    /// Petgraph view; edges run from dependency to dependent
    #[must_use]
    pub fn to_petgraph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::with_capacity(self.len(), self.edge_count());
        let indices: Vec<_> = self
            .declarations
            .values()
            .map(|d| graph.add_node(format!("{} ({})", d.name, d.kind)))
            .collect();

        for (to, declaration) in self.declarations.values().enumerate() {
            for dep in &declaration.depends_on {
                if let Some(from) = self.declarations.get_index_of(dep) {
                    graph.add_edge(indices[from], indices[to], ());
                }
            }
        }
        graph
    }

    /// Graphviz DOT rendering
    #[must_use]
    pub fn to_dot(&self) -> String {
        let graph = self.to_petgraph();
        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    const MANIFEST: &str = r#"
resources:
  - kind: vpc
    name: main-vpc
    parameters: { cidr_block: 10.0.0.0/16 }
  - kind: load_balancer
    name: web-lb
    parameters: { subnets: [{ ref: public-a }] }
  - kind: subnet
    name: public-a
    parameters: { vpc_id: { ref: main-vpc } }
exports:
  DNS: { concat: ["http://", { ref: web-lb, attr: dns_name }] }
"#;

    #[test]
    fn manifest_allows_forward_references() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let graph = ResourceGraph::from_manifest(manifest).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 2);
        let lb = graph.get(&"web-lb".into()).unwrap();
        assert_eq!(lb.kind, ResourceKind::LoadBalancer);
        assert!(lb.depends_on.contains(&ResourceName::from("public-a")));
        assert_eq!(graph.exports().len(), 1);
    }

    #[test]
    fn manifest_rejects_empty_name() {
        let manifest = Manifest::from_yaml(
            "resources:\n  - kind: vpc\n    name: main-vpc\n  - kind: subnet\n    name: ''\n",
        )
        .unwrap();
        assert_eq!(ResourceGraph::from_manifest(manifest), Err(GraphError::EmptyName));
    }

    #[test]
    fn manifest_rejects_unknown_reference() {
        let manifest = Manifest::from_yaml(
            "resources:\n  - kind: subnet\n    name: a\n    depends_on: [ghost]\n",
        )
        .unwrap();
        assert_eq!(
            ResourceGraph::from_manifest(manifest),
            Err(GraphError::InvalidReference {
                resource: "a".into(),
                reference: "ghost".into(),
            })
        );
    }

    #[test]
    fn manifest_rejects_duplicates() {
        let manifest = Manifest::from_yaml(
            "resources:\n  - { kind: vpc, name: a }\n  - { kind: subnet, name: a }\n",
        )
        .unwrap();
        assert!(matches!(
            ResourceGraph::from_manifest(manifest),
            Err(GraphError::DuplicateName { .. })
        ));
    }

    #[test]
    fn manifest_round_trip_preserves_order() {
        let graph = ResourceGraph::from_manifest(Manifest::from_yaml(MANIFEST).unwrap()).unwrap();
        let again = ResourceGraph::from_manifest(graph.to_manifest()).unwrap();
        assert_eq!(graph, again);
    }

    #[test]
    fn dependents_and_dot() {
        let graph = ResourceGraph::from_manifest(Manifest::from_yaml(MANIFEST).unwrap()).unwrap();
        let dependents = graph.dependents(&"main-vpc".into());
        assert_eq!(dependents, vec![&ResourceName::from("public-a")]);

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("main-vpc (VPC)"));
    }
}
