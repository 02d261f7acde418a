//! The saga aggregate and the outcome handed back to callers.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::state::SagaState;
use super::step::{ResultRef, Step, StepContext};

/// Opaque saga identifier, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(String);

impl SagaId {
	/// Generate a fresh random identifier.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SagaId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for SagaId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for SagaId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// An ordered sequence of steps belonging to one deployment.
///
/// Built with [`SagaBuilder`](super::SagaBuilder). Once handed to the
/// executor, only the executor mutates it; callers observe it through the
/// accessors below and may request cancellation through
/// [`Saga::cancellation`].
pub struct Saga {
	pub(crate) id: SagaId,
	pub(crate) name: String,
	pub(crate) correlation_id: Option<String>,
	pub(crate) payload: Value,
	pub(crate) steps: Vec<Step>,
	pub(crate) state: SagaState,
	pub(crate) cursor: usize,
	pub(crate) cancel: CancellationToken,
	pub(crate) cancelled: bool,
	pub(crate) failed_step: Option<usize>,
	pub(crate) compensation_errors: Vec<CompensationFailure>,
}

impl Saga {
	pub(crate) fn new(id: SagaId, name: String, steps: Vec<Step>, cancel: CancellationToken) -> Self {
		Self {
			id,
			name,
			correlation_id: None,
			payload: Value::Null,
			steps,
			state: SagaState::Pending,
			cursor: 0,
			cancel,
			cancelled: false,
			failed_step: None,
			compensation_errors: Vec::new(),
		}
	}

	pub fn id(&self) -> &SagaId {
		&self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Caller-side id tying the saga to the request that started it.
	pub fn correlation_id(&self) -> Option<&str> {
		self.correlation_id.as_deref()
	}

	/// Input shared by every step of the saga.
	pub fn payload(&self) -> &Value {
		&self.payload
	}

	pub fn state(&self) -> SagaState {
		self.state
	}

	/// Index of the step currently executing or last attempted.
	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn steps(&self) -> &[Step] {
		&self.steps
	}

	pub fn step(&self, index: usize) -> Option<&Step> {
		self.steps.get(index)
	}

	pub fn len(&self) -> usize {
		self.steps.len()
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	/// Token that cancels the saga at the next step boundary.
	pub fn cancellation(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Request cancellation. Equivalent to `saga.cancellation().cancel()`.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub(crate) fn set_state(&mut self, next: SagaState) {
		debug_assert!(
			self.state.can_transition_to(next),
			"illegal saga transition {} -> {} for {}",
			self.state,
			next,
			self.id
		);
		self.state = next;
	}

	/// Indices of steps whose forward action succeeded, in ascending order.
	pub fn succeeded_steps(&self) -> Vec<usize> {
		self
			.steps
			.iter()
			.filter(|s| s.result_ref.is_some())
			.map(|s| s.index)
			.collect()
	}

	/// Context for invoking step `index`. Carries the result refs of the
	/// steps before it that have one, in step order.
	pub(crate) fn step_context(&self, index: usize) -> StepContext {
		let step = &self.steps[index];
		let prior_results: IndexMap<String, ResultRef> = self.steps[..index]
			.iter()
			.filter_map(|s| Some((s.resource_ref.clone(), s.result_ref.clone()?)))
			.collect();
		StepContext {
			saga_id: self.id.clone(),
			correlation_id: self.correlation_id.clone(),
			step_index: index,
			resource_ref: step.resource_ref.clone(),
			attempt: step.attempt,
			result_ref: step.result_ref.clone(),
			payload: self.payload.clone(),
			prior_results,
		}
	}

	pub(crate) fn outcome(&self) -> SagaOutcome {
		let failed_step_error = self
			.failed_step
			.and_then(|i| self.steps.get(i))
			.and_then(|s| s.last_error.clone());
		SagaOutcome {
			saga_id: self.id.clone(),
			final_state: self.state,
			succeeded_steps: self.succeeded_steps(),
			failed_step_index: self.failed_step,
			failed_step_error,
			compensation_errors: self.compensation_errors.clone(),
			cancelled: self.cancelled,
			partial_cleanup: !self.compensation_errors.is_empty(),
		}
	}
}

impl fmt::Debug for Saga {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Saga")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("correlation_id", &self.correlation_id)
			.field("state", &self.state)
			.field("cursor", &self.cursor)
			.field("steps", &self.steps)
			.finish_non_exhaustive()
	}
}

/// A compensation that could not be completed.
///
/// Each entry names a resource that may still exist and needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFailure {
	pub step_index: usize,
	pub resource_ref: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result_ref: Option<ResultRef>,
	pub error: String,
}

/// Terminal result of running or resuming a saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaOutcome {
	pub saga_id: SagaId,
	pub final_state: SagaState,
	/// Steps whose forward action succeeded, whether or not they were later
	/// compensated.
	pub succeeded_steps: Vec<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failed_step_index: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failed_step_error: Option<String>,
	pub compensation_errors: Vec<CompensationFailure>,
	pub cancelled: bool,
	/// Set when rollback left resources behind.
	pub partial_cleanup: bool,
}

impl SagaOutcome {
	pub fn is_completed(&self) -> bool {
		self.final_state == SagaState::Completed
	}

	/// True when some resources could not be cleaned up automatically.
	pub fn requires_manual_intervention(&self) -> bool {
		self.partial_cleanup
	}

	/// Resource refs of the compensations that failed.
	pub fn orphaned_resources(&self) -> Vec<&str> {
		self
			.compensation_errors
			.iter()
			.map(|f| f.resource_ref.as_str())
			.collect()
	}
}
