//! Saga construction.
//!
//! The builder is where each forward action gets bound to its compensation.
//! A step without a compensation is a definition bug and is rejected here,
//! long before anything is provisioned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::state::StepStatus;
use super::step::{CompensationAction, Step, StepAction};
use super::types::{Saga, SagaId};
use crate::error::SagaError;
use crate::retry::RetryPolicy;

/// Definition of one step, before it is validated into a [`Step`].
pub struct StepDefinition {
	resource_ref: String,
	forward: Option<Arc<dyn StepAction>>,
	compensation: Option<Arc<dyn CompensationAction>>,
	retry: Option<RetryPolicy>,
	timeout: Option<Duration>,
}

impl StepDefinition {
	pub fn new(resource_ref: impl Into<String>) -> Self {
		Self {
			resource_ref: resource_ref.into(),
			forward: None,
			compensation: None,
			retry: None,
			timeout: None,
		}
	}

	pub fn forward(mut self, action: Arc<dyn StepAction>) -> Self {
		self.forward = Some(action);
		self
	}

	pub fn compensate(mut self, action: Arc<dyn CompensationAction>) -> Self {
		self.compensation = Some(action);
		self
	}

	/// Use one value for both directions, e.g. a driver-backed step.
	pub fn reversible<T>(self, action: Arc<T>) -> Self
	where
		T: StepAction + CompensationAction + 'static,
	{
		self.forward(action.clone()).compensate(action)
	}

	/// Override the executor's forward retry policy for this step.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = Some(retry);
		self
	}

	/// Override the executor's per-attempt timeout for this step.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}
}

/// Builds a [`Saga`] from an ordered list of step definitions.
///
/// The order given here is the execution order; callers are expected to
/// have sorted resources by dependency already (see
/// [`deployment_order`](crate::blueprint::deployment_order)).
pub struct SagaBuilder {
	id: Option<SagaId>,
	name: String,
	steps: Vec<StepDefinition>,
	cancel: Option<CancellationToken>,
	correlation_id: Option<String>,
	payload: Value,
}

impl SagaBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			id: None,
			name: name.into(),
			steps: Vec::new(),
			cancel: None,
			correlation_id: None,
			payload: Value::Null,
		}
	}

	/// Use a known id instead of a generated one, e.g. to rebuild a saga
	/// definition for [`resume`](super::SagaExecutor::resume).
	pub fn with_id(mut self, id: impl Into<SagaId>) -> Self {
		self.id = Some(id.into());
		self
	}

	/// Cancel the saga through a caller-owned token, e.g. a child of a
	/// process-wide shutdown token.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());
		self
	}

	/// Input handed to every step through [`StepContext::payload`](super::StepContext::payload).
	pub fn with_payload(mut self, payload: Value) -> Self {
		self.payload = payload;
		self
	}

	pub fn step(mut self, step: StepDefinition) -> Self {
		self.steps.push(step);
		self
	}

	pub fn add_step(&mut self, step: StepDefinition) -> &mut Self {
		self.steps.push(step);
		self
	}

	/// Shorthand for a step with a separate forward action and compensation.
	pub fn action(
		self,
		resource_ref: impl Into<String>,
		forward: Arc<dyn StepAction>,
		compensation: Arc<dyn CompensationAction>,
	) -> Self {
		self.step(
			StepDefinition::new(resource_ref)
				.forward(forward)
				.compensate(compensation),
		)
	}

	pub fn build(self) -> Result<Saga, SagaError> {
		let mut seen = HashSet::new();
		let mut steps = Vec::with_capacity(self.steps.len());

		for (index, def) in self.steps.into_iter().enumerate() {
			if !seen.insert(def.resource_ref.clone()) {
				return Err(SagaError::DuplicateStep {
					resource_ref: def.resource_ref,
				});
			}
			let Some(forward) = def.forward else {
				return Err(SagaError::MissingAction {
					resource_ref: def.resource_ref,
				});
			};
			let Some(compensation) = def.compensation else {
				return Err(SagaError::MissingCompensation {
					resource_ref: def.resource_ref,
				});
			};
			steps.push(Step {
				index,
				resource_ref: def.resource_ref,
				forward,
				compensation,
				retry: def.retry,
				timeout: def.timeout,
				status: StepStatus::NotStarted,
				attempt: 0,
				result_ref: None,
				last_error: None,
			});
		}

		let id = self.id.unwrap_or_else(SagaId::generate);
		let cancel = self.cancel.unwrap_or_default();
		let mut saga = Saga::new(id, self.name, steps, cancel);
		saga.correlation_id = self.correlation_id;
		saga.payload = self.payload;
		Ok(saga)
	}
}
