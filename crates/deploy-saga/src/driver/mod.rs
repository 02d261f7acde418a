//! Resource drivers: one adapter per infrastructure provider.
//!
//! A driver knows how to create and destroy a single resource. The executor
//! never talks to drivers directly; [`DriverStep`] binds a driver and a
//! resource spec into the forward/compensation pair of a saga step.

#[cfg(any(test, feature = "testing"))]
mod simulated;
mod step;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
pub use simulated::SimulatedDriver;
pub use step::DriverStep;

use crate::saga::ResultRef;

/// Failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
	#[error("network error: {0}")]
	Network(String),
	#[error("quota exceeded: {0}")]
	QuotaExceeded(String),
	#[error("permission denied: {0}")]
	PermissionDenied(String),
	#[error("resource not found: {0}")]
	NotFound(String),
	#[error("invalid resource spec: {0}")]
	InvalidSpec(String),
	#[error("operation timed out after {0:?}")]
	Timeout(Duration),
	#[error("provider error: {0}")]
	Provider(String),
}

impl DriverError {
	/// Whether another attempt can reasonably succeed.
	///
	/// Permission and spec errors will fail the same way every time.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::PermissionDenied(_) | Self::InvalidSpec(_))
	}
}

/// Tag selecting the driver for a resource, e.g. `proxmox` or `mikrotik`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderType(String);

impl ProviderType {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ProviderType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ProviderType {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for ProviderType {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Desired state of one resource, as handed to [`ResourceDriver::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
	pub name: String,
	pub resource_type: String,
	pub provider: ProviderType,
	#[serde(default)]
	pub spec: Value,
	/// Names of the resources this one is built on.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub depends_on: Vec<String>,
	/// Result refs of `depends_on`, filled in right before `create`.
	#[serde(default, skip_serializing_if = "IndexMap::is_empty")]
	pub dependency_refs: IndexMap<String, ResultRef>,
}

impl ResourceSpec {
	pub fn new(
		name: impl Into<String>,
		resource_type: impl Into<String>,
		provider: impl Into<ProviderType>,
	) -> Self {
		Self {
			name: name.into(),
			resource_type: resource_type.into(),
			provider: provider.into(),
			spec: Value::Null,
			depends_on: Vec::new(),
			dependency_refs: IndexMap::new(),
		}
	}

	pub fn with_spec(mut self, spec: Value) -> Self {
		self.spec = spec;
		self
	}

	pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
		self.depends_on = depends_on;
		self
	}
}

/// Observed state of a created resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
	pub state: String,
	pub ready: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub metadata: Value,
}

/// Provider adapter.
///
/// Implementations must be safe to call concurrently for different
/// resources. Holding no saga state, they map a desired spec to a result or
/// an error.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
	fn provider(&self) -> ProviderType;

	/// Resource types this driver can create. Empty means any.
	fn supported_types(&self) -> Vec<String> {
		Vec::new()
	}

	/// Create the resource, or return the existing one if it was already
	/// created for the same spec.
	async fn create(&self, spec: &ResourceSpec) -> Result<ResultRef, DriverError>;

	/// Destroy the resource. Must succeed when it is already gone.
	async fn destroy(&self, result_ref: &ResultRef) -> Result<(), DriverError>;

	/// Look up a resource created for `spec` whose result never reached the
	/// caller, e.g. because `create` timed out after the provider acted.
	///
	/// The default cannot tell, so a failed step is then assumed to have
	/// created nothing.
	async fn find(&self, _spec: &ResourceSpec) -> Result<Option<ResultRef>, DriverError> {
		Ok(None)
	}

	async fn get_state(&self, result_ref: &ResultRef) -> Result<ResourceState, DriverError>;

	/// Cheap liveness check for the layer above. Not used by the executor.
	async fn health_check(&self) -> bool;
}

/// Drivers indexed by provider tag.
#[derive(Clone, Default)]
pub struct DriverRegistry {
	drivers: HashMap<ProviderType, Arc<dyn ResourceDriver>>,
}

impl DriverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a driver under its own provider tag, replacing any previous
	/// driver for that tag.
	pub fn register(&mut self, driver: Arc<dyn ResourceDriver>) -> &mut Self {
		let provider = driver.provider();
		debug!(%provider, "registering resource driver");
		self.drivers.insert(provider, driver);
		self
	}

	pub fn with_driver(mut self, driver: Arc<dyn ResourceDriver>) -> Self {
		self.register(driver);
		self
	}

	pub fn get(&self, provider: &ProviderType) -> Option<Arc<dyn ResourceDriver>> {
		self.drivers.get(provider).cloned()
	}

	pub fn providers(&self) -> Vec<ProviderType> {
		let mut providers: Vec<_> = self.drivers.keys().cloned().collect();
		providers.sort();
		providers
	}

	pub fn len(&self) -> usize {
		self.drivers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.drivers.is_empty()
	}

	/// Health of every registered driver, checked concurrently, keyed by
	/// provider in sorted order.
	pub async fn health_report(&self) -> IndexMap<ProviderType, bool> {
		let providers = self.providers();
		let checks = providers.iter().map(|p| {
			let driver = self.drivers.get(p).cloned();
			async move {
				match driver {
					Some(driver) => driver.health_check().await,
					None => false,
				}
			}
		});
		let results = join_all(checks).await;
		providers.into_iter().zip(results).collect()
	}

	/// True when every registered driver reports healthy.
	pub async fn all_healthy(&self) -> bool {
		self.health_report().await.values().all(|healthy| *healthy)
	}
}

impl fmt::Debug for DriverRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DriverRegistry")
			.field("providers", &self.providers())
			.finish()
	}
}
