//! Saga executor.
//!
//! Drives a saga forward step by step, records every transition in the event
//! log before acting on it, and unwinds completed steps in reverse order
//! when forward execution stops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::replay::SagaSnapshot;
use super::state::{SagaState, StepStatus};
use super::types::{CompensationFailure, Saga, SagaId, SagaOutcome};
use crate::config::ExecutorConfig;
use crate::driver::DriverError;
use crate::error::SagaError;
use crate::event_log::{Event, EventLog, EventType};

/// Runs sagas against a shared event log.
///
/// Cheap to clone; clones share the log and configuration, so independent
/// sagas can be driven on separate tasks.
#[derive(Clone)]
pub struct SagaExecutor {
	log: Arc<dyn EventLog>,
	config: Arc<ExecutorConfig>,
}

impl SagaExecutor {
	pub fn new(log: Arc<dyn EventLog>, config: ExecutorConfig) -> Self {
		Self {
			log,
			config: Arc::new(config),
		}
	}

	pub fn event_log(&self) -> &Arc<dyn EventLog> {
		&self.log
	}

	pub fn config(&self) -> &ExecutorConfig {
		&self.config
	}

	/// Execute a `PENDING` saga to a terminal state.
	///
	/// Step failures are reported in the returned [`SagaOutcome`]. An `Err`
	/// means the saga could not be driven at all: it was not pending, or the
	/// event log failed, in which case the saga is left where the log says
	/// it is and can be picked up again with [`resume`](Self::resume).
	pub async fn run(&self, saga: &mut Saga) -> Result<SagaOutcome, SagaError> {
		if saga.state != SagaState::Pending {
			return Err(SagaError::invalid_state(&saga.id, saga.state, "run"));
		}
		let span = info_span!("saga", saga_id = %saga.id, name = %saga.name);
		async move {
			let refs: Vec<&str> = saga.steps.iter().map(|s| s.resource_ref.as_str()).collect();
			self
				.record(
					Event::saga(
						saga.id.clone(),
						EventType::SagaStarted,
						json!({
							"name": saga.name,
							"correlationId": saga.correlation_id,
							"steps": refs,
							"payload": saga.payload,
						}),
					),
				)
				.await?;
			saga.set_state(SagaState::Running);
			info!(steps = saga.steps.len(), "saga started");
			self.drive(saga, 0).await
		}
		.instrument(span)
		.await
	}

	/// Continue a saga after a crash.
	///
	/// `saga` must be a freshly built definition carrying the id of the
	/// interrupted saga (see [`SagaBuilder::with_id`](super::SagaBuilder::with_id)).
	/// Its history is replayed from the event log and execution continues
	/// from the last durable point: forward from the first step without a
	/// recorded outcome, or with the remaining compensations. A step whose
	/// start was recorded but not its outcome is attempted again.
	pub async fn resume(&self, saga: &mut Saga) -> Result<SagaOutcome, SagaError> {
		if saga.state != SagaState::Pending {
			return Err(SagaError::invalid_state(&saga.id, saga.state, "resume"));
		}
		let events = self.log.read_all(&saga.id).await?;
		let Some(snapshot) = SagaSnapshot::replay(&saga.id, &events)? else {
			debug!(saga_id = %saga.id, "no recorded history, starting from scratch");
			return self.run(saga).await;
		};
		snapshot.restore(saga)?;
		if saga.state.is_terminal() {
			return Err(SagaError::invalid_state(&saga.id, saga.state, "resume"));
		}

		let span = info_span!("saga", saga_id = %saga.id, name = %saga.name);
		async move {
			let next = saga
				.steps
				.iter()
				.position(|s| s.status == StepStatus::NotStarted)
				.unwrap_or(saga.steps.len());
			info!(
				state = %saga.state,
				events = events.len(),
				next_step = next,
				"resuming saga"
			);
			self.drive(saga, next).await
		}
		.instrument(span)
		.await
	}

	async fn drive(&self, saga: &mut Saga, start: usize) -> Result<SagaOutcome, SagaError> {
		if saga.state == SagaState::Running {
			let halted = saga.failed_step.is_some() || saga.cancelled;
			if !halted && self.forward(saga, start).await? {
				self
					.record(Event::saga(saga.id.clone(), EventType::SagaCompleted, Value::Null))
					.await?;
				saga.set_state(SagaState::Completed);
				info!("saga completed");
				return Ok(saga.outcome());
			}

			if saga.succeeded_steps().is_empty() {
				self
					.record(Event::saga(
						saga.id.clone(),
						EventType::SagaFailed,
						json!({"failedStep": saga.failed_step, "cancelled": saga.cancelled}),
					))
					.await?;
				saga.set_state(SagaState::Failed);
				warn!(
					failed_step = ?saga.failed_step,
					cancelled = saga.cancelled,
					"saga failed with nothing to compensate"
				);
				return Ok(saga.outcome());
			}

			self
				.record(Event::saga(
					saga.id.clone(),
					EventType::CompensationStarted,
					json!({"failedStep": saga.failed_step, "cancelled": saga.cancelled}),
				))
				.await?;
			saga.set_state(SagaState::Compensating);
			info!(
				succeeded = saga.succeeded_steps().len(),
				"compensating completed steps"
			);
		}

		self.compensate(saga).await?;
		Ok(saga.outcome())
	}

	/// Returns `true` when every step from `start` on succeeded.
	async fn forward(&self, saga: &mut Saga, start: usize) -> Result<bool, SagaError> {
		for index in start..saga.steps.len() {
			if saga.cancel.is_cancelled() {
				warn!(step_index = index, "cancellation requested, stopping forward execution");
				self
					.record(Event::saga(
						saga.id.clone(),
						EventType::SagaCancelled,
						json!({"atStep": index}),
					))
					.await?;
				saga.cancelled = true;
				return Ok(false);
			}
			if !self.run_step(saga, index).await? {
				saga.failed_step = Some(index);
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Run one forward step with retries. Returns whether it succeeded.
	async fn run_step(&self, saga: &mut Saga, index: usize) -> Result<bool, SagaError> {
		let saga_id = saga.id.clone();
		saga.cursor = index;
		let mut ctx = saga.step_context(index);
		let step = &mut saga.steps[index];
		let policy = step.retry.as_ref().unwrap_or(&self.config.forward_retry).clone();
		let timeout = step.timeout.or(self.config.step_timeout);

		self
			.record(Event::step(
				saga_id.clone(),
				index,
				EventType::StepStarted,
				json!({"resourceRef": step.resource_ref}),
			))
			.await?;
		step.set_status(StepStatus::Running);
		debug!(step_index = index, resource_ref = %step.resource_ref, "step started");

		let mut attempt = 0;
		loop {
			attempt += 1;
			step.attempt = attempt;
			ctx.attempt = attempt;
			let result = with_timeout(timeout, step.forward.execute(&ctx)).await;

			let err = match result {
				Ok(result_ref) => {
					self
						.record(Event::step(
							saga_id.clone(),
							index,
							EventType::StepSucceeded,
							json!({"resultRef": result_ref, "attempt": attempt}),
						))
						.await?;
					info!(
						step_index = index,
						resource_ref = %step.resource_ref,
						%result_ref,
						attempt,
						"step succeeded"
					);
					step.result_ref = Some(result_ref);
					step.last_error = None;
					step.set_status(StepStatus::Succeeded);
					return Ok(true);
				},
				Err(err) => err,
			};

			if attempt < policy.max_attempts() && err.is_retryable() {
				let delay = policy.delay_after(attempt);
				warn!(
					step_index = index,
					resource_ref = %step.resource_ref,
					attempt,
					error = %err,
					?delay,
					"step attempt failed, retrying"
				);
				self
					.record(Event::step(
						saga_id.clone(),
						index,
						EventType::StepRetrying,
						json!({"error": err.to_string(), "attempt": attempt}),
					))
					.await?;
				step.last_error = Some(err.to_string());
				tokio::time::sleep(delay).await;
				continue;
			}

			error!(
				step_index = index,
				resource_ref = %step.resource_ref,
				attempt,
				error = %err,
				"step failed"
			);
			self
				.record(Event::step(
					saga_id.clone(),
					index,
					EventType::StepFailed,
					json!({"error": err.to_string(), "attempt": attempt}),
				))
				.await?;
			step.last_error = Some(err.to_string());
			step.set_status(StepStatus::Failed);
			return Ok(false);
		}
	}

	/// Compensate every step that still needs it, highest index first, then
	/// settle the saga in `COMPENSATED` or `FAILED`.
	async fn compensate(&self, saga: &mut Saga) -> Result<(), SagaError> {
		let pending: Vec<usize> = saga
			.steps
			.iter()
			.rev()
			.filter(|step| match step.status {
				StepStatus::Succeeded | StepStatus::Compensating => true,
				// The failed step may have left a partial resource behind.
				StepStatus::Failed => {
					saga.failed_step == Some(step.index)
						&& !saga
							.compensation_errors
							.iter()
							.any(|f| f.step_index == step.index)
				},
				_ => false,
			})
			.map(|step| step.index)
			.collect();

		for index in pending {
			if let Some(failure) = self.compensate_step(saga, index).await? {
				saga.compensation_errors.push(failure);
			}
		}

		if saga.compensation_errors.is_empty() {
			self
				.record(Event::saga(saga.id.clone(), EventType::SagaCompensated, Value::Null))
				.await?;
			saga.set_state(SagaState::Compensated);
			info!("saga compensated");
		} else {
			let orphaned: Vec<&str> = saga
				.compensation_errors
				.iter()
				.map(|f| f.resource_ref.as_str())
				.collect();
			self
				.record(Event::saga(
					saga.id.clone(),
					EventType::SagaFailed,
					json!({"partialCleanup": true, "orphaned": orphaned}),
				))
				.await?;
			error!(
				orphaned = ?orphaned,
				"saga failed, resources left behind need manual cleanup"
			);
			saga.set_state(SagaState::Failed);
		}
		Ok(())
	}

	async fn compensate_step(
		&self,
		saga: &mut Saga,
		index: usize,
	) -> Result<Option<CompensationFailure>, SagaError> {
		let saga_id = saga.id.clone();
		let mut ctx = saga.step_context(index);
		let step = &mut saga.steps[index];
		let policy = &self.config.compensation_retry;
		let timeout = self.config.compensation_timeout;

		self
			.record(Event::step(
				saga_id.clone(),
				index,
				EventType::CompensationStarted,
				json!({"resourceRef": step.resource_ref, "resultRef": step.result_ref}),
			))
			.await?;
		if step.status != StepStatus::Compensating {
			step.set_status(StepStatus::Compensating);
		}
		debug!(step_index = index, resource_ref = %step.resource_ref, "compensating step");

		let mut attempt = 0;
		loop {
			attempt += 1;
			ctx.attempt = attempt;
			let err = match with_timeout(timeout, step.compensation.compensate(&ctx)).await {
				Ok(()) => {
					self
						.record(Event::step(
							saga_id.clone(),
							index,
							EventType::CompensationSucceeded,
							Value::Null,
						))
						.await?;
					info!(step_index = index, resource_ref = %step.resource_ref, "step compensated");
					step.set_status(StepStatus::Compensated);
					return Ok(None);
				},
				Err(err) => err,
			};

			if attempt < policy.max_attempts() && err.is_retryable() {
				let delay = policy.delay_after(attempt);
				warn!(
					step_index = index,
					resource_ref = %step.resource_ref,
					attempt,
					error = %err,
					"compensation attempt failed, retrying"
				);
				self
					.record(Event::step(
						saga_id.clone(),
						index,
						EventType::CompensationRetrying,
						json!({"error": err.to_string(), "attempt": attempt}),
					))
					.await?;
				tokio::time::sleep(delay).await;
				continue;
			}

			error!(
				step_index = index,
				resource_ref = %step.resource_ref,
				attempt,
				error = %err,
				"compensation failed, continuing with remaining steps"
			);
			self
				.record(Event::step(
					saga_id.clone(),
					index,
					EventType::CompensationFailed,
					json!({"error": err.to_string(), "attempt": attempt}),
				))
				.await?;
			step.set_status(StepStatus::Failed);
			return Ok(Some(CompensationFailure {
				step_index: index,
				resource_ref: step.resource_ref.clone(),
				result_ref: step.result_ref.clone(),
				error: err.to_string(),
			}));
		}
	}

	async fn record(&self, event: Event) -> Result<(), SagaError> {
		let event_type = event.event_type;
		self.log.append(event).await.map_err(|e| {
			error!(%event_type, error = %e, "failed to record event, halting saga");
			SagaError::Append(e)
		})
	}
}

async fn with_timeout<T, F>(limit: Option<Duration>, action: F) -> Result<T, DriverError>
where
	F: Future<Output = Result<T, DriverError>>,
{
	match limit {
		Some(limit) => tokio::time::timeout(limit, action)
			.await
			.map_err(|_| DriverError::Timeout(limit))?,
		None => action.await,
	}
}
