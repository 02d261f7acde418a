//! Saga steps and the action traits they are built from.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::StepStatus;
use super::types::SagaId;
use crate::driver::DriverError;
use crate::retry::RetryPolicy;

/// Opaque handle returned by a successful forward action.
///
/// Compensation uses it to target the resource that was actually created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ResultRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ResultRef {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for ResultRef {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// What an action gets to see when it is invoked.
#[derive(Debug, Clone)]
pub struct StepContext {
	pub saga_id: SagaId,
	pub correlation_id: Option<String>,
	pub step_index: usize,
	pub resource_ref: String,
	/// 1-based attempt number of the current invocation.
	pub attempt: u32,
	/// Set for compensations when the forward action succeeded.
	pub result_ref: Option<ResultRef>,
	/// Saga-wide input, see [`SagaBuilder::with_payload`](super::SagaBuilder::with_payload).
	pub payload: Value,
	/// Result refs of earlier steps keyed by resource ref, in step order.
	pub prior_results: IndexMap<String, ResultRef>,
}

/// The forward direction of a step.
///
/// Must be idempotent: after a crash the executor may invoke it again for a
/// step whose outcome never reached the event log.
#[async_trait]
pub trait StepAction: Send + Sync {
	async fn execute(&self, ctx: &StepContext) -> Result<ResultRef, DriverError>;
}

/// The reverse direction of a step.
///
/// Must succeed (as a no-op) when the resource is already gone or was never
/// created, i.e. when `ctx.result_ref` is `None`.
#[async_trait]
pub trait CompensationAction: Send + Sync {
	async fn compensate(&self, ctx: &StepContext) -> Result<(), DriverError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
	F: Fn(StepContext) -> Fut + Send + Sync,
	Fut: Future<Output = Result<ResultRef, DriverError>> + Send + 'static,
{
	async fn execute(&self, ctx: &StepContext) -> Result<ResultRef, DriverError> {
		(self.0)(ctx.clone()).await
	}
}

struct FnCompensation<F>(F);

#[async_trait]
impl<F, Fut> CompensationAction for FnCompensation<F>
where
	F: Fn(StepContext) -> Fut + Send + Sync,
	Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
{
	async fn compensate(&self, ctx: &StepContext) -> Result<(), DriverError> {
		(self.0)(ctx.clone()).await
	}
}

/// Wrap an async closure as a forward action.
pub fn forward_fn<F, Fut>(f: F) -> Arc<dyn StepAction>
where
	F: Fn(StepContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<ResultRef, DriverError>> + Send + 'static,
{
	Arc::new(FnAction(f))
}

/// Wrap an async closure as a compensation.
pub fn compensation_fn<F, Fut>(f: F) -> Arc<dyn CompensationAction>
where
	F: Fn(StepContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
{
	Arc::new(FnCompensation(f))
}

/// A single forward action, its compensation and the bookkeeping the
/// executor keeps about it.
pub struct Step {
	pub(crate) index: usize,
	pub(crate) resource_ref: String,
	pub(crate) forward: Arc<dyn StepAction>,
	pub(crate) compensation: Arc<dyn CompensationAction>,
	pub(crate) retry: Option<RetryPolicy>,
	pub(crate) timeout: Option<Duration>,
	pub(crate) status: StepStatus,
	pub(crate) attempt: u32,
	pub(crate) result_ref: Option<ResultRef>,
	pub(crate) last_error: Option<String>,
}

impl Step {
	pub fn index(&self) -> usize {
		self.index
	}

	pub fn resource_ref(&self) -> &str {
		&self.resource_ref
	}

	pub fn status(&self) -> StepStatus {
		self.status
	}

	/// Number of forward attempts made so far.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn result_ref(&self) -> Option<&ResultRef> {
		self.result_ref.as_ref()
	}

	pub fn last_error(&self) -> Option<&str> {
		self.last_error.as_deref()
	}

	pub(crate) fn set_status(&mut self, next: StepStatus) {
		debug_assert!(
			self.status.can_transition_to(next),
			"illegal step transition {} -> {} for '{}'",
			self.status,
			next,
			self.resource_ref
		);
		self.status = next;
	}
}

impl fmt::Debug for Step {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Step")
			.field("index", &self.index)
			.field("resource_ref", &self.resource_ref)
			.field("status", &self.status)
			.field("attempt", &self.attempt)
			.field("result_ref", &self.result_ref)
			.field("last_error", &self.last_error)
			.finish_non_exhaustive()
	}
}
