//! Declarative deployment blueprints.
//!
//! ```yaml
//! name: web-stack
//! resources:
//!   - name: db
//!     type: StorageVolume
//!     provider: proxmox
//!     specs: { size: 20Gi }
//!   - name: lb
//!     type: ServiceInstance
//!     provider: mikrotik
//!     dependencies: [db]
//! ```

mod order;
mod planner;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use order::deployment_order;
pub use planner::DeploymentPlanner;

use crate::driver::{ProviderType, ResourceSpec};
use crate::error::SagaError;
use crate::retry::RetryPolicy;
use crate::serde_dur_option;

#[derive(Debug, Error)]
pub enum BlueprintError {
	#[error("failed to parse blueprint: {0}")]
	Parse(String),

	#[error("failed to read blueprint: {0}")]
	Io(#[from] std::io::Error),

	#[error("resource '{0}' is declared more than once")]
	DuplicateResource(String),

	#[error("resource '{resource}' depends on undeclared resource '{dependency}'")]
	MissingDependency { resource: String, dependency: String },

	#[error("dependency cycle: {}", .0.join(" -> "))]
	DependencyCycle(Vec<String>),

	#[error("no driver registered for provider '{provider}' (resource '{resource}')")]
	UnknownProvider { resource: String, provider: ProviderType },

	#[error("provider '{provider}' does not support type '{resource_type}' (resource '{resource}')")]
	UnsupportedType {
		resource: String,
		provider: ProviderType,
		resource_type: String,
	},

	#[error(transparent)]
	Saga(#[from] SagaError),
}

/// A named set of resources to deploy together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
	pub name: String,
	#[serde(default = "default_version")]
	pub version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default)]
	pub resources: Vec<ResourceDefinition>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Map<String, Value>,
}

fn default_version() -> String {
	"v1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
	pub name: String,
	#[serde(rename = "type", alias = "kind")]
	pub resource_type: String,
	pub provider: ProviderType,
	#[serde(default, alias = "spec", skip_serializing_if = "Value::is_null")]
	pub specs: Value,
	/// Names of resources that must exist before this one is created.
	#[serde(default, alias = "dependsOn", skip_serializing_if = "Vec::is_empty")]
	pub dependencies: Vec<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Map<String, Value>,
	/// Overrides the executor's forward retry policy for this resource.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry: Option<RetryPolicy>,
	/// Overrides the executor's per-attempt timeout for this resource.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "serde_dur_option")]
	pub timeout: Option<Duration>,
}

impl ResourceDefinition {
	/// What the driver gets to see.
	pub fn to_spec(&self) -> ResourceSpec {
		ResourceSpec::new(&self.name, &self.resource_type, self.provider.clone())
			.with_spec(self.specs.clone())
			.with_dependencies(self.dependencies.clone())
	}
}

impl Blueprint {
	pub fn from_yaml_str(s: &str) -> Result<Self, BlueprintError> {
		serde_yaml::from_str(s).map_err(|e| BlueprintError::Parse(e.to_string()))
	}

	pub fn from_json_str(s: &str) -> Result<Self, BlueprintError> {
		serde_json::from_str(s).map_err(|e| BlueprintError::Parse(e.to_string()))
	}

	/// Load from a `.json`, `.yaml` or `.yml` file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BlueprintError> {
		let path = path.as_ref();
		let contents = fs_err::read_to_string(path)?;
		match path.extension().and_then(|e| e.to_str()) {
			Some("json") => Self::from_json_str(&contents),
			_ => Self::from_yaml_str(&contents),
		}
	}

	pub fn resource(&self, name: &str) -> Option<&ResourceDefinition> {
		self.resources.iter().find(|r| r.name == name)
	}
}
