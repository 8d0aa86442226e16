//! Testing utilities for the netforge workspace
//!
//! Shared test helpers, fixtures, and provider doubles.

#![allow(missing_docs)]

use netforge_kernel::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Configuration used throughout the scenario tests, in the stack-config
/// shape with the record nested under `data`.
pub const SAMPLE_CONFIG_JSON: &str = r#"{
  "data": {
    "vpc_cidr": "10.0.0.0/16",
    "subnet_public_cidr": "10.0.1.0/24",
    "subnet_private_cidr": "10.0.2.0/24",
    "anywhere_cidr": "0.0.0.0/0",
    "availability_zone1": "us-east-1a",
    "availability_zone2": "us-east-1b",
    "instance_type": "t2.micro",
    "ami": "ami-0c55b159cbfafe1f0",
    "key_pair_material": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ test@netforge"
  }
}"#;

/// The sample configuration text
#[must_use]
pub fn sample_config() -> &'static str {
    SAMPLE_CONFIG_JSON
}

/// Provider that records calls and can be told to fail
///
/// Ids are `<name>-<call number>`; every resource also gets `arn` and
/// `dns_name` attributes derived from its name.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ResourceName>>,
    fail_at: Option<usize>,
    fail_on: Option<ResourceName>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RecordingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th call (1-based)
    #[must_use]
    pub fn fail_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Fail whenever the named resource is realized
    #[must_use]
    pub fn fail_on(mut self, name: impl Into<ResourceName>) -> Self {
        self.fail_on = Some(name.into());
        self
    }

    /// Sleep this long inside every call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Names passed to `realize`, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<ResourceName> {
        self.calls.lock().clone()
    }

    /// Call names as plain strings
    #[must_use]
    pub fn call_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|name| name.as_str().to_string())
            .collect()
    }

    /// Highest number of overlapping calls seen
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for RecordingProvider {
    async fn realize(&self, request: RealizeRequest) -> Result<Realized, ProviderError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(request.name().clone());
            calls.len()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_at == Some(call) || self.fail_on.as_ref() == Some(request.name()) {
            return Err(ProviderError::new(format!(
                "injected failure on call {call}"
            )));
        }

        let name = request.name();
        Ok(Realized::new(format!("{name}-{call}"))
            .with_attribute("arn", format!("arn:test:{name}"))
            .with_attribute("dns_name", format!("{name}.test")))
    }
}

/// Linear graph `r0 <- r1 <- ... <- r(n-1)`
#[must_use]
pub fn chain_graph(n: usize) -> ResourceGraph {
    let mut builder = GraphBuilder::new();
    let mut previous: Option<ResourceName> = None;
    for i in 0..n {
        let handle = builder
            .declare(
                ResourceKind::Subnet,
                format!("r{i}"),
                Parameters::new(),
                previous.take(),
            )
            .expect("chain declarations are valid");
        previous = Some(handle.name().clone());
    }
    builder.finish()
}

/// Graph of `n` independent resources `r0..r(n-1)`
#[must_use]
pub fn flat_graph(n: usize) -> ResourceGraph {
    let mut builder = GraphBuilder::new();
    for i in 0..n {
        builder
            .declare(ResourceKind::Subnet, format!("r{i}"), Parameters::new(), [])
            .expect("flat declarations are valid");
    }
    builder.finish()
}

/// Declare nodes `n0..` in `declaration_order`, then add `edges`
///
/// `edges[i]` lists the nodes that node `i` depends on. Edges are added
/// after all nodes exist, so any shape (cycles included) can be built.
#[must_use]
pub fn graph_from_edges(edges: &[Vec<usize>], declaration_order: &[usize]) -> ResourceGraph {
    let name = |i: usize| ResourceName::new(format!("n{i}"));
    let mut builder = GraphBuilder::new();
    for &i in declaration_order {
        builder
            .declare(ResourceKind::Subnet, name(i), Parameters::new(), [])
            .expect("generated names are unique");
    }
    for (node, deps) in edges.iter().enumerate() {
        for &dep in deps {
            builder
                .add_dependency(&name(node), &name(dep))
                .expect("generated edges reference declared nodes");
        }
    }
    builder.finish()
}

/// Random DAG: node `i` only depends on nodes `< i`, declared in a
/// shuffled order so dependencies may be declared after dependents.
pub fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
    (1..=max_nodes.max(1)).prop_flat_map(|n| {
        let edges = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..=i.min(3))
                        .prop_map(|mut deps| {
                            deps.sort_unstable();
                            deps.dedup();
                            deps
                        })
                        .boxed()
                }
            })
            .collect::<Vec<_>>();
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (edges, order)
    })
}

/// A DAG from `dag_strategy` plus one back edge that closes a cycle
pub fn cyclic_strategy(max_nodes: usize) -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
    (2..=max_nodes.max(2)).prop_flat_map(|n| {
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (1..n, order).prop_map(move |(last, order)| {
            // 0 <- 1 <- ... <- last, then 0 depends on last
            let mut edges = vec![Vec::new(); n];
            for (i, deps) in edges.iter_mut().enumerate().take(last + 1).skip(1) {
                deps.push(i - 1);
            }
            edges[0].push(last);
            (edges, order)
        })
    })
}
