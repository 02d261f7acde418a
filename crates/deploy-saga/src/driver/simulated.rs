//! In-memory resource driver for tests and local runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::{DriverError, ProviderType, ResourceDriver, ResourceSpec, ResourceState};
use crate::saga::ResultRef;

/// In-memory provider that pretends to create resources.
///
/// Failures can be injected per resource name, and every call is recorded
/// so tests can assert on ordering.
pub struct SimulatedDriver {
	provider: ProviderType,
	latency: Option<Duration>,
	state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
	healthy: bool,
	/// result ref -> spec of a live resource
	deployed: HashMap<String, ResourceSpec>,
	/// resource name -> (remaining failures, error to return)
	create_failures: HashMap<String, (u32, DriverError)>,
	destroy_failures: HashMap<String, (u32, DriverError)>,
	calls: Vec<String>,
}

impl SimulatedDriver {
	pub fn new(provider: impl Into<String>) -> Self {
		Self {
			provider: ProviderType::new(provider),
			latency: None,
			state: Mutex::new(SimState {
				healthy: true,
				..SimState::default()
			}),
		}
	}

	/// Sleep this long inside every create and destroy.
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);
		self
	}

	/// Fail the next `times` creates of `name` with `error`.
	pub fn fail_create(&self, name: impl Into<String>, times: u32, error: DriverError) {
		self
			.state
			.lock()
			.create_failures
			.insert(name.into(), (times, error));
	}

	/// Fail the next `times` destroys of `name` with `error`.
	pub fn fail_destroy(&self, name: impl Into<String>, times: u32, error: DriverError) {
		self
			.state
			.lock()
			.destroy_failures
			.insert(name.into(), (times, error));
	}

	pub fn set_healthy(&self, healthy: bool) {
		self.state.lock().healthy = healthy;
	}

	/// Calls made so far, as `create:<name>` and `destroy:<name>`.
	pub fn calls(&self) -> Vec<String> {
		self.state.lock().calls.clone()
	}

	/// Names of resources currently alive, sorted.
	pub fn deployed(&self) -> Vec<String> {
		let mut names: Vec<_> = self
			.state
			.lock()
			.deployed
			.values()
			.map(|spec| spec.name.clone())
			.collect();
		names.sort();
		names
	}

	/// The spec a live resource was created from.
	pub fn spec_of(&self, name: &str) -> Option<ResourceSpec> {
		let key = self.result_ref_for(name);
		self.state.lock().deployed.get(&key).cloned()
	}

	fn result_ref_for(&self, name: &str) -> String {
		format!("{}/{}", self.provider, name)
	}

	async fn simulate_latency(&self) {
		if let Some(latency) = self.latency {
			tokio::time::sleep(latency).await;
		}
	}
}

fn take_failure(failures: &mut HashMap<String, (u32, DriverError)>, name: &str) -> Option<DriverError> {
	let (remaining, error) = failures.get_mut(name)?;
	if *remaining == 0 {
		return None;
	}
	*remaining -= 1;
	Some(error.clone())
}

#[async_trait]
impl ResourceDriver for SimulatedDriver {
	fn provider(&self) -> ProviderType {
		self.provider.clone()
	}

	async fn create(&self, spec: &ResourceSpec) -> Result<ResultRef, DriverError> {
		self.simulate_latency().await;
		let mut state = self.state.lock();
		state.calls.push(format!("create:{}", spec.name));
		if let Some(error) = take_failure(&mut state.create_failures, &spec.name) {
			return Err(error);
		}
		let result_ref = self.result_ref_for(&spec.name);
		state
			.deployed
			.entry(result_ref.clone())
			.or_insert_with(|| spec.clone());
		Ok(ResultRef::from(result_ref))
	}

	async fn destroy(&self, result_ref: &ResultRef) -> Result<(), DriverError> {
		self.simulate_latency().await;
		let mut state = self.state.lock();
		let name = result_ref
			.as_str()
			.rsplit_once('/')
			.map_or(result_ref.as_str(), |(_, name)| name)
			.to_string();
		state.calls.push(format!("destroy:{name}"));
		if let Some(error) = take_failure(&mut state.destroy_failures, &name) {
			return Err(error);
		}
		state.deployed.remove(result_ref.as_str());
		Ok(())
	}

	async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResultRef>, DriverError> {
		let result_ref = self.result_ref_for(&spec.name);
		let found = self.state.lock().deployed.contains_key(&result_ref);
		Ok(found.then(|| ResultRef::from(result_ref)))
	}

	async fn get_state(&self, result_ref: &ResultRef) -> Result<ResourceState, DriverError> {
		let state = self.state.lock();
		match state.deployed.get(result_ref.as_str()) {
			Some(spec) => Ok(ResourceState {
				state: "running".to_string(),
				ready: true,
				endpoint: Some(format!("http://{}.local", spec.name)),
				metadata: json!({"provider": self.provider, "type": spec.resource_type}),
			}),
			None => Err(DriverError::NotFound(result_ref.to_string())),
		}
	}

	async fn health_check(&self) -> bool {
		self.state.lock().healthy
	}
}
