//! Apply Phase
//!
//! The executor only accepts a `ResolvedPlan`, so ordering was settled
//! before anything is realized. It:
//! - Substitutes references with the attributes of realized dependencies
//! - Hands each resource to the `ProviderAdapter`
//! - Stops at the first failure and reports what stays realized
//!
//! It never retries and never rolls back.

use crate::error::{ApplyError, ProviderError};
use crate::resolver::ResolvedPlan;
use crate::types::{
    AttributeRef, Attributes, ParamValue, ResolvedResource, ResourceDeclaration, ResourceKind,
    ResourceName,
};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ulid::Ulid;

/// One resource handed to a provider
#[derive(Debug, Clone)]
pub struct RealizeRequest {
    /// Declaration being realized
    pub declaration: ResourceDeclaration,
    /// Parameters with every reference replaced by its concrete value
    pub parameters: Map<String, Value>,
    /// Realized direct dependencies, in `depends_on` order
    pub dependencies: Vec<ResolvedResource>,
}

impl RealizeRequest {
    /// Kind being realized
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.declaration.kind
    }

    /// Name being realized
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.declaration.name
    }

    /// Resolved parameter
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// String parameter, if present and a string
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// What a provider returns for a realized resource
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Realized {
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Attributes exposed to dependents
    pub computed_attributes: Attributes,
}

impl Realized {
    /// Result with no computed attributes
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            computed_attributes: Attributes::new(),
        }
    }

    /// Add a computed attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.computed_attributes.insert(key.into(), value.into());
        self
    }
}

/// Provider adapter trait
///
/// Implement this to realize resources against a concrete backend.
/// Retries and backoff, if any, belong here.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Realize a single resource
    async fn realize(&self, request: RealizeRequest) -> Result<Realized, ProviderError>;
}

/// Apply options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Maximum number of realizations in flight; 1 is sequential
    pub max_concurrency: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self { max_concurrency: 1 }
    }
}

impl ApplyOptions {
    /// Set the limit; values below 1 become 1
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

/// Identifier of one apply pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeploymentId(Ulid);

impl DeploymentId {
    /// Fresh time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a successful apply
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    /// Deployment id
    pub id: DeploymentId,
    /// Wall-clock start of the apply
    pub started_at: DateTime<Utc>,
    /// Time spent applying
    pub elapsed: Duration,
    /// Realized resources in realization order
    pub resources: IndexMap<ResourceName, ResolvedResource>,
    /// Resolved export strings
    pub exports: IndexMap<String, String>,
}

impl Deployment {
    /// Realized resource by name
    #[must_use]
    pub fn resource(&self, name: &ResourceName) -> Option<&ResolvedResource> {
        self.resources.get(name)
    }

    /// Resolved export value
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&str> {
        self.exports.get(name).map(String::as_str)
    }
}

/// Why scheduling stopped early
enum Halt {
    Provider {
        declaration: ResourceDeclaration,
        source: ProviderError,
    },
    MissingAttribute {
        resource: ResourceName,
        reference: AttributeRef,
    },
}

/// Plan executor
pub struct Executor {
    adapter: Arc<dyn ProviderAdapter>,
    options: ApplyOptions,
}

impl Executor {
    /// Create a sequential executor
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            options: ApplyOptions::default(),
        }
    }

    /// Replace the apply options
    #[must_use]
    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Current apply options
    #[must_use]
    pub fn options(&self) -> ApplyOptions {
        self.options
    }

    /// Apply a resolved plan
    ///
    /// # Errors
    /// See [`Executor::apply_with_cancel`].
    pub async fn apply(&self, plan: &ResolvedPlan) -> Result<Deployment, ApplyError> {
        self.apply_with_cancel(plan, CancellationToken::new()).await
    }

    /// Apply a resolved plan until done, failed or cancelled
    ///
    /// A resource is started only once all of its dependencies are
    /// realized. Ready resources start in plan order, up to
    /// `max_concurrency` at a time. After the first failure, or once
    /// `cancel` fires, nothing new starts; realizations already in flight
    /// are awaited and recorded.
    ///
    /// # Errors
    /// - `Provider` when the adapter fails a resource
    /// - `MissingAttribute` when a reference cannot be satisfied
    /// - `Cancelled` when `cancel` fired before the plan completed
    pub async fn apply_with_cancel(
        &self,
        plan: &ResolvedPlan,
        cancel: CancellationToken,
    ) -> Result<Deployment, ApplyError> {
        let id = DeploymentId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            deployment = %id,
            resources = plan.len(),
            max_concurrency = self.options.max_concurrency,
            "starting apply"
        );

        let declarations: Vec<&ResourceDeclaration> = plan.iter().collect();
        let max_in_flight = self.options.max_concurrency.max(1);
        let mut pending: Vec<usize> = (0..declarations.len()).collect();
        let mut realized: IndexMap<ResourceName, ResolvedResource> =
            IndexMap::with_capacity(declarations.len());
        let mut in_flight = FuturesUnordered::new();
        let mut halt: Option<Halt> = None;
        let mut cancelled = false;

        loop {
            if halt.is_none() && !cancelled {
                if cancel.is_cancelled() {
                    cancelled = true;
                    warn!(deployment = %id, realized = realized.len(), "apply cancelled");
                } else {
                    let mut cursor = 0;
                    while cursor < pending.len() && in_flight.len() < max_in_flight {
                        let declaration = declarations[pending[cursor]];
                        let ready = declaration
                            .depends_on
                            .iter()
                            .all(|dep| realized.contains_key(dep));
                        if !ready {
                            cursor += 1;
                            continue;
                        }
                        pending.remove(cursor);
                        match build_request(declaration, &realized) {
                            Ok(request) => in_flight.push(self.launch(request)),
                            Err(reference) => {
                                error!(
                                    resource = %declaration.name,
                                    reference = %reference,
                                    "missing attribute"
                                );
                                halt = Some(Halt::MissingAttribute {
                                    resource: declaration.name.clone(),
                                    reference,
                                });
                                break;
                            }
                        }
                    }
                }
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancelled && halt.is_none() => {
                    cancelled = true;
                    warn!(deployment = %id, realized = realized.len(), "apply cancelled");
                    continue;
                }
                next = in_flight.next() => next,
            };
            let Some((declaration, result)) = next else {
                break;
            };

            match result {
                Ok(outcome) => {
                    info!(
                        resource = %declaration.name,
                        kind = %declaration.kind,
                        provider_id = %outcome.provider_id,
                        "realized resource"
                    );
                    realized.insert(
                        declaration.name.clone(),
                        ResolvedResource {
                            declaration,
                            provider_id: outcome.provider_id,
                            computed_attributes: outcome.computed_attributes,
                        },
                    );
                }
                Err(source) => {
                    error!(
                        resource = %declaration.name,
                        kind = %declaration.kind,
                        error = %source,
                        "realization failed"
                    );
                    if halt.is_none() {
                        halt = Some(Halt::Provider {
                            declaration,
                            source,
                        });
                    }
                }
            }
        }

        let realized_names = || realized.keys().cloned().collect::<Vec<_>>();
        match halt {
            Some(Halt::Provider {
                declaration,
                source,
            }) => {
                return Err(ApplyError::Provider {
                    resource: declaration.name,
                    kind: declaration.kind,
                    source,
                    realized: realized_names(),
                })
            }
            Some(Halt::MissingAttribute {
                resource,
                reference,
            }) => {
                return Err(ApplyError::MissingAttribute {
                    resource,
                    reference,
                    realized: realized_names(),
                })
            }
            None => {}
        }
        if realized.len() < declarations.len() {
            return Err(ApplyError::Cancelled {
                realized: realized_names(),
            });
        }

        let mut exports = IndexMap::with_capacity(plan.exports().len());
        for (name, value) in plan.exports() {
            let resolved = resolve_value(value, &realized).map_err(|reference| {
                ApplyError::MissingAttribute {
                    resource: ResourceName::new(name.clone()),
                    reference,
                    realized: realized_names(),
                }
            })?;
            exports.insert(name.clone(), value_to_string(resolved));
        }

        let elapsed = start.elapsed();
        info!(
            deployment = %id,
            resources = realized.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "apply complete"
        );

        Ok(Deployment {
            id,
            started_at,
            elapsed,
            resources: realized,
            exports,
        })
    }

    async fn launch(
        &self,
        request: RealizeRequest,
    ) -> (ResourceDeclaration, Result<Realized, ProviderError>) {
        let declaration = request.declaration.clone();
        let result = self.adapter.realize(request).await;
        (declaration, result)
    }
}

fn build_request(
    declaration: &ResourceDeclaration,
    realized: &IndexMap<ResourceName, ResolvedResource>,
) -> Result<RealizeRequest, AttributeRef> {
    let mut parameters = Map::new();
    for (key, value) in &declaration.parameters {
        parameters.insert(key.clone(), resolve_value(value, realized)?);
    }
    let dependencies = declaration
        .depends_on
        .iter()
        .filter_map(|dep| realized.get(dep).cloned())
        .collect();

    Ok(RealizeRequest {
        declaration: declaration.clone(),
        parameters,
        dependencies,
    })
}

/// Replace references with the attributes of realized resources
fn resolve_value(
    value: &ParamValue,
    realized: &IndexMap<ResourceName, ResolvedResource>,
) -> Result<Value, AttributeRef> {
    Ok(match value {
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Int(i) => Value::from(*i),
        ParamValue::String(s) => Value::String(s.clone()),
        ParamValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, realized))
                .collect::<Result<_, _>>()?,
        ),
        ParamValue::Map(map) => Value::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), resolve_value(item, realized)?)))
                .collect::<Result<_, _>>()?,
        ),
        ParamValue::Ref(reference) => realized
            .get(&reference.resource)
            .and_then(|resource| resource.attribute(&reference.attribute))
            .ok_or_else(|| reference.clone())?,
        ParamValue::Concat(concat) => {
            let mut joined = String::new();
            for part in &concat.concat {
                joined.push_str(&value_to_string(resolve_value(part, realized)?));
            }
            Value::String(joined)
        }
    })
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::GraphBuilder;
    use crate::resolver::resolve;
    use crate::types::Parameters;
    use parking_lot::Mutex;

    /// Records calls and fabricates `<name>-id` plus a `dns_name`
    #[derive(Default)]
    struct EchoProvider {
        calls: Mutex<Vec<RealizeRequest>>,
        fail: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for EchoProvider {
        async fn realize(&self, request: RealizeRequest) -> Result<Realized, ProviderError> {
            self.calls.lock().push(request.clone());
            if self.fail == Some(request.name().as_str()) {
                return Err(ProviderError::new("boom"));
            }
            Ok(Realized::new(format!("{}-id", request.name()))
                .with_attribute("dns_name", format!("{}.example", request.name())))
        }
    }

    fn web_plan() -> ResolvedPlan {
        let mut builder = GraphBuilder::new();
        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", Parameters::new(), [])
            .unwrap();
        let mut params = Parameters::new();
        params.insert("vpc_id".into(), vpc.id());
        params.insert("port".into(), 80u16.into());
        let lb = builder
            .declare(ResourceKind::LoadBalancer, "lb", params, [])
            .unwrap();
        builder
            .export(
                "DNS",
                ParamValue::concat(["http://".into(), lb.attr("dns_name")]),
            )
            .unwrap();
        resolve(&builder.finish()).unwrap()
    }

    #[tokio::test]
    async fn references_are_substituted_and_exports_resolved() {
        let provider = Arc::new(EchoProvider::default());
        let executor = Executor::new(provider.clone());

        let deployment = executor.apply(&web_plan()).await.unwrap();

        assert_eq!(deployment.export("DNS"), Some("http://lb.example"));
        assert_eq!(deployment.resources.len(), 2);

        let calls = provider.calls.lock();
        assert_eq!(calls[1].param_str("vpc_id"), Some("vpc-id"));
        assert_eq!(calls[1].param("port"), Some(&Value::from(80)));
        assert_eq!(calls[1].dependencies.len(), 1);
        assert_eq!(calls[1].dependencies[0].provider_id, "vpc-id");
    }

    #[tokio::test]
    async fn failure_reports_realized_prefix() {
        let provider = Arc::new(EchoProvider {
            fail: Some("lb"),
            ..EchoProvider::default()
        });
        let executor = Executor::new(provider);

        let err = executor.apply(&web_plan()).await.unwrap_err();
        match err {
            ApplyError::Provider {
                resource,
                kind,
                realized,
                ..
            } => {
                assert_eq!(resource.as_str(), "lb");
                assert_eq!(kind, ResourceKind::LoadBalancer);
                assert_eq!(realized, vec![ResourceName::from("vpc")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_attribute_is_reported() {
        let mut builder = GraphBuilder::new();
        let vpc = builder
            .declare(ResourceKind::Vpc, "vpc", Parameters::new(), [])
            .unwrap();
        let mut params = Parameters::new();
        params.insert("arn".into(), vpc.attr("arn"));
        builder
            .declare(ResourceKind::Subnet, "subnet", params, [])
            .unwrap();
        let plan = resolve(&builder.finish()).unwrap();

        let err = Executor::new(Arc::new(EchoProvider::default()))
            .apply(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingAttribute { .. }));
        assert_eq!(err.realized(), &[ResourceName::from("vpc")]);
    }

    #[tokio::test]
    async fn cancelled_token_starts_nothing() {
        let provider = Arc::new(EchoProvider::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Executor::new(provider.clone())
            .apply_with_cancel(&web_plan(), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::Cancelled { realized: vec![] });
        assert!(provider.calls.lock().is_empty());
    }

    #[test]
    fn concat_renders_numbers_without_quotes() {
        let value = ParamValue::concat(["port-".into(), ParamValue::Int(8000)]);
        let resolved = resolve_value(&value, &IndexMap::new()).unwrap();
        assert_eq!(resolved, Value::String("port-8000".into()));
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(ApplyOptions::default().with_max_concurrency(0).max_concurrency, 1);
    }
}
