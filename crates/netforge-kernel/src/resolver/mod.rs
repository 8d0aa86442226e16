//! Dependency Resolver
//!
//! Turns a `ResourceGraph` into a total order in which every declaration
//! comes after all of its dependencies. Kahn's algorithm, with the ready
//! set ordered by declaration position so the result never depends on
//! hashing or timing.

use crate::error::GraphError;
use crate::graph::ResourceGraph;
use crate::types::{ParamValue, ResourceDeclaration, ResourceName};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// A graph together with a valid realization order
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    graph: ResourceGraph,
    /// Declaration indices in realization order
    order: Vec<usize>,
    /// Wave of each entry of `order`
    depth: Vec<usize>,
}

/// Resolve a graph into a deterministic realization order
///
/// # Errors
/// `GraphError::CycleDetected` if the dependencies do not form a DAG.
pub fn resolve(graph: &ResourceGraph) -> Result<ResolvedPlan, GraphError> {
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (index, declaration) in graph.declarations().enumerate() {
        for dep in &declaration.depends_on {
            // Builder and manifest loader guarantee every edge resolves
            if let Some(dep_index) = graph.index_of(dep) {
                in_degree[index] += 1;
                dependents[dep_index].push(index);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < n {
        let cycle = find_cycle(graph, &in_degree);
        debug!(blocked = n - order.len(), cycle_len = cycle.len(), "dependency cycle");
        return Err(GraphError::CycleDetected { cycle });
    }

    let mut depth_of = vec![0usize; n];
    for &index in &order {
        if let Some(declaration) = graph.get_index(index) {
            depth_of[index] = declaration
                .depends_on
                .iter()
                .filter_map(|dep| graph.index_of(dep))
                .map(|dep| depth_of[dep] + 1)
                .max()
                .unwrap_or(0);
        }
    }
    let depth = order.iter().map(|&index| depth_of[index]).collect();

    debug!(resources = n, edges = graph.edge_count(), "resolved realization order");

    Ok(ResolvedPlan {
        graph: graph.clone(),
        order,
        depth,
    })
}

/// Walk blocked nodes until one repeats
///
/// Every blocked node has at least one blocked dependency, so the walk
/// from the earliest blocked node always closes a loop. The loop is
/// rotated to start at its earliest-declared member.
fn find_cycle(graph: &ResourceGraph, in_degree: &[usize]) -> Vec<ResourceName> {
    let blocked = |index: usize| in_degree[index] > 0;
    let Some(start) = (0..in_degree.len()).find(|&index| blocked(index)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut seen_at = vec![None; in_degree.len()];
    let mut current = start;
    loop {
        if let Some(position) = seen_at[current] {
            path = path.split_off(position);
            break;
        }
        seen_at[current] = Some(path.len());
        path.push(current);

        let next = graph.get_index(current).and_then(|declaration| {
            declaration
                .depends_on
                .iter()
                .filter_map(|dep| graph.index_of(dep))
                .find(|&dep| blocked(dep))
        });
        match next {
            Some(next) => current = next,
            None => break,
        }
    }

    if let Some(first) = path
        .iter()
        .enumerate()
        .min_by_key(|(_, index)| **index)
        .map(|(position, _)| position)
    {
        path.rotate_left(first);
    }

    path.into_iter()
        .filter_map(|index| graph.get_index(index).map(|d| d.name.clone()))
        .collect()
}

impl ResolvedPlan {
    /// Declarations in realization order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDeclaration> + '_ {
        self.order
            .iter()
            .filter_map(|&index| self.graph.get_index(index))
    }

    /// Names in realization order
    pub fn names(&self) -> impl Iterator<Item = &ResourceName> + '_ {
        self.iter().map(|declaration| &declaration.name)
    }

    /// Position of a resource in realization order
    #[must_use]
    pub fn position(&self, name: &ResourceName) -> Option<usize> {
        let index = self.graph.index_of(name)?;
        self.order.iter().position(|&i| i == index)
    }

    /// Number of resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True for an empty plan
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The graph this plan was resolved from
    #[must_use]
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Named outputs of the graph
    #[must_use]
    pub fn exports(&self) -> &IndexMap<String, ParamValue> {
        self.graph.exports()
    }

    /// Dependency layers
    ///
    /// Wave 0 holds resources without dependencies; every other resource
    /// sits one wave after its deepest dependency. Within a wave resources
    /// keep realization order.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<&ResourceDeclaration>> {
        let count = self.depth.iter().max().map_or(0, |max| max + 1);
        let mut waves = vec![Vec::new(); count];
        for (declaration, &depth) in self.iter().zip(&self.depth) {
            waves[depth].push(declaration);
        }
        waves
    }

    /// SHA-256 hex digest of the ordered declarations and exports
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for declaration in self.iter() {
            hasher.update(declaration.kind.as_str());
            hasher.update([0u8]);
            hasher.update(declaration.name.as_str());
            hasher.update([0u8]);
            for (key, value) in &declaration.parameters {
                hasher.update(key);
                hasher.update([b'=']);
                hash_value(&mut hasher, value);
                hasher.update([0u8]);
            }
            for dep in &declaration.depends_on {
                hasher.update([b'<']);
                hasher.update(dep.as_str());
            }
            hasher.update([b'\n']);
        }
        for (name, value) in self.exports() {
            hasher.update(name);
            hasher.update([b'=']);
            hash_value(&mut hasher, value);
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }
}

fn hash_value(hasher: &mut Sha256, value: &ParamValue) {
    match value {
        ParamValue::Bool(b) => hasher.update(if *b { "b:true" } else { "b:false" }),
        ParamValue::Int(i) => hasher.update(format!("i:{i}")),
        ParamValue::String(s) => {
            hasher.update("s:");
            hasher.update(s);
        }
        ParamValue::Ref(r) => hasher.update(format!("r:{r}")),
        ParamValue::List(items) => {
            hasher.update("[");
            for item in items {
                hash_value(hasher, item);
                hasher.update(",");
            }
            hasher.update("]");
        }
        ParamValue::Concat(concat) => {
            hasher.update("c(");
            for item in &concat.concat {
                hash_value(hasher, item);
                hasher.update(",");
            }
            hasher.update(")");
        }
        ParamValue::Map(map) => {
            hasher.update("{");
            for (key, item) in map {
                hasher.update(key);
                hasher.update(":");
                hash_value(hasher, item);
                hasher.update(",");
            }
            hasher.update("}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::GraphBuilder;
    use crate::types::{Parameters, ResourceKind};
    use pretty_assertions::assert_eq;

    fn names(plan: &ResolvedPlan) -> Vec<&str> {
        plan.names().map(ResourceName::as_str).collect()
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let mut builder = GraphBuilder::new();
        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", Parameters::new(), [])
            .unwrap();
        builder
            .declare(ResourceKind::KeyPair, "key", Parameters::new(), [])
            .unwrap();
        builder
            .declare(ResourceKind::Subnet, "b", Parameters::new(), [vpc.name().clone()])
            .unwrap();
        builder
            .declare(ResourceKind::Subnet, "a", Parameters::new(), [vpc.name().clone()])
            .unwrap();

        let plan = resolve(&builder.finish()).unwrap();
        assert_eq!(names(&plan), vec!["vpc", "key", "b", "a"]);
        assert_eq!(plan.position(&"a".into()), Some(3));
    }

    #[test]
    fn late_dependency_reorders() {
        let mut builder = GraphBuilder::new();
        for name in ["a", "b", "c"] {
            builder
                .declare(ResourceKind::Subnet, name, Parameters::new(), [])
                .unwrap();
        }
        builder.add_dependency(&"a".into(), &"c".into()).unwrap();

        let plan = resolve(&builder.finish()).unwrap();
        assert_eq!(names(&plan), vec!["b", "c", "a"]);
    }

    #[test]
    fn cycle_is_reported_from_earliest_member() {
        let mut builder = GraphBuilder::new();
        for name in ["root", "x", "y", "z"] {
            builder
                .declare(ResourceKind::Subnet, name, Parameters::new(), [])
                .unwrap();
        }
        builder.add_dependency(&"y".into(), &"x".into()).unwrap();
        builder.add_dependency(&"z".into(), &"y".into()).unwrap();
        builder.add_dependency(&"x".into(), &"z".into()).unwrap();

        let err = resolve(&builder.finish()).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["x".into(), "z".into(), "y".into()],
            }
        );
        assert_eq!(err.to_string(), "dependency cycle detected: x -> z -> y -> x");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut builder = GraphBuilder::new();
        builder
            .declare(ResourceKind::Vpc, "vpc", Parameters::new(), [])
            .unwrap();
        builder.add_dependency(&"vpc".into(), &"vpc".into()).unwrap();

        let err = resolve(&builder.finish()).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { cycle: vec!["vpc".into()] });
    }

    #[test]
    fn waves_follow_deepest_dependency() {
        let mut builder = GraphBuilder::new();
        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", Parameters::new(), [])
            .unwrap();
        let igw = builder
            .declare(ResourceKind::InternetGateway, "igw", Parameters::new(), [vpc.name().clone()])
            .unwrap();
        builder
            .declare(
                ResourceKind::RouteTable,
                "rt",
                Parameters::new(),
                [vpc.name().clone(), igw.name().clone()],
            )
            .unwrap();
        builder
            .declare(ResourceKind::Subnet, "subnet", Parameters::new(), [vpc.name().clone()])
            .unwrap();

        let plan = resolve(&builder.finish()).unwrap();
        let waves: Vec<Vec<&str>> = plan
            .waves()
            .iter()
            .map(|wave| wave.iter().map(|d| d.name.as_str()).collect())
            .collect();
        assert_eq!(waves, vec![vec!["vpc"], vec!["igw", "subnet"], vec!["rt"]]);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let build = |cidr: &str| {
            let mut builder = GraphBuilder::new();
            let mut params = Parameters::new();
            params.insert("cidr_block".into(), cidr.into());
            builder
                .declare(ResourceKind::Vpc, "vpc", params, [])
                .unwrap();
            resolve(&builder.finish()).unwrap()
        };

        assert_eq!(build("10.0.0.0/16").fingerprint(), build("10.0.0.0/16").fingerprint());
        assert_ne!(build("10.0.0.0/16").fingerprint(), build("10.1.0.0/16").fingerprint());
        assert_eq!(build("10.0.0.0/16").fingerprint().len(), 64);
    }

    #[test]
    fn empty_graph_resolves_to_empty_plan() {
        let plan = resolve(&GraphBuilder::new().finish()).unwrap();
        assert!(plan.is_empty());
        assert!(plan.waves().is_empty());
    }
}
