//! Rebuilding saga state from its event stream.
//!
//! Replay is a pure fold over events. It does not need the step actions, so
//! recovery tooling can inspect a saga without its definition.

use serde::Serialize;
use serde_json::Value;

use super::state::{SagaState, StepStatus};
use super::step::ResultRef;
use super::types::{CompensationFailure, Saga, SagaId};
use crate::error::SagaError;
use crate::event_log::{Event, EventType};

/// Last known state of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
	pub resource_ref: String,
	pub status: StepStatus,
	pub attempt: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result_ref: Option<ResultRef>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
}

/// Saga state as recorded in the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaSnapshot {
	pub saga_id: SagaId,
	pub name: String,
	pub state: SagaState,
	pub cursor: usize,
	pub steps: Vec<StepSnapshot>,
	pub failed_step: Option<usize>,
	pub cancelled: bool,
	pub compensation_errors: Vec<CompensationFailure>,
}

impl SagaSnapshot {
	/// Fold `events` into a snapshot.
	///
	/// Returns `Ok(None)` for an empty history: the saga never durably
	/// started.
	pub fn replay(saga_id: &SagaId, events: &[Event]) -> Result<Option<Self>, SagaError> {
		let Some((first, rest)) = events.split_first() else {
			return Ok(None);
		};
		if first.event_type != EventType::SagaStarted {
			return Err(SagaError::replay_mismatch(
				saga_id,
				format!("history starts with {} instead of SagaStarted", first.event_type),
			));
		}

		let name = first.payload_str("name").unwrap_or_default().to_string();
		let steps = first
			.payload
			.get("steps")
			.and_then(Value::as_array)
			.map(|refs| {
				refs
					.iter()
					.filter_map(Value::as_str)
					.map(|resource_ref| StepSnapshot {
						resource_ref: resource_ref.to_string(),
						status: StepStatus::NotStarted,
						attempt: 0,
						result_ref: None,
						last_error: None,
					})
					.collect()
			})
			.unwrap_or_default();

		let mut snapshot = Self {
			saga_id: saga_id.clone(),
			name,
			state: SagaState::Running,
			cursor: 0,
			steps,
			failed_step: None,
			cancelled: false,
			compensation_errors: Vec::new(),
		};
		check_saga_id(saga_id, first)?;
		for event in rest {
			check_saga_id(saga_id, event)?;
			snapshot.apply(event)?;
		}
		Ok(Some(snapshot))
	}

	fn apply(&mut self, event: &Event) -> Result<(), SagaError> {
		if self.state.is_terminal() {
			return Err(SagaError::replay_mismatch(
				&self.saga_id,
				format!("{} recorded after terminal state {}", event.event_type, self.state),
			));
		}

		match (event.event_type, event.step_index) {
			(EventType::SagaStarted, _) => {
				return Err(SagaError::replay_mismatch(
					&self.saga_id,
					"SagaStarted recorded twice",
				));
			},
			(EventType::SagaCancelled, _) => self.cancelled = true,
			(EventType::CompensationStarted, None) => self.state = SagaState::Compensating,
			(EventType::SagaCompleted, _) => self.state = SagaState::Completed,
			(EventType::SagaCompensated, _) => self.state = SagaState::Compensated,
			(EventType::SagaFailed, _) => self.state = SagaState::Failed,
			(event_type, Some(index)) => self.apply_step(index, event_type, event)?,
			(event_type, None) => {
				return Err(SagaError::replay_mismatch(
					&self.saga_id,
					format!("{event_type} without a step index"),
				));
			},
		}
		Ok(())
	}

	fn apply_step(&mut self, index: usize, event_type: EventType, event: &Event) -> Result<(), SagaError> {
		let Some(step) = self.steps.get_mut(index) else {
			return Err(SagaError::replay_mismatch(
				&self.saga_id,
				format!("{event_type} for unknown step {index}"),
			));
		};
		let attempt = event.payload_u32("attempt");
		let error = event.payload_str("error").map(str::to_string);

		match event_type {
			EventType::StepStarted => {
				step.status = StepStatus::Running;
				step.attempt = 0;
				self.cursor = index;
			},
			EventType::StepRetrying => {
				step.attempt = attempt.unwrap_or(step.attempt + 1);
				step.last_error = error;
			},
			EventType::StepSucceeded => {
				let Some(result_ref) = event.payload_str("resultRef") else {
					return Err(SagaError::replay_mismatch(
						&self.saga_id,
						format!("StepSucceeded for step {index} has no resultRef"),
					));
				};
				step.status = StepStatus::Succeeded;
				step.attempt = attempt.unwrap_or(step.attempt + 1);
				step.result_ref = Some(ResultRef::from(result_ref));
				step.last_error = None;
			},
			EventType::StepFailed => {
				step.status = StepStatus::Failed;
				step.attempt = attempt.unwrap_or(step.attempt + 1);
				step.last_error = error;
				self.failed_step = Some(index);
			},
			EventType::CompensationStarted => step.status = StepStatus::Compensating,
			EventType::CompensationRetrying => {},
			EventType::CompensationSucceeded => step.status = StepStatus::Compensated,
			EventType::CompensationFailed => {
				step.status = StepStatus::Failed;
				self.compensation_errors.push(CompensationFailure {
					step_index: index,
					resource_ref: step.resource_ref.clone(),
					result_ref: step.result_ref.clone(),
					error: error.unwrap_or_default(),
				});
			},
			other => {
				return Err(SagaError::replay_mismatch(
					&self.saga_id,
					format!("{other} is not a step event"),
				));
			},
		}
		Ok(())
	}

	/// Forward execution stopped (failure or cancellation) but the saga has
	/// not yet moved on to compensation or a terminal state.
	pub fn is_halted(&self) -> bool {
		self.state == SagaState::Running && (self.failed_step.is_some() || self.cancelled)
	}

	/// Copy the recorded state onto a freshly built definition of the same
	/// saga.
	///
	/// A step that started but has no recorded outcome is reset to
	/// `NotStarted` so it is attempted again.
	pub(crate) fn restore(&self, saga: &mut Saga) -> Result<(), SagaError> {
		if saga.steps.len() != self.steps.len() {
			return Err(SagaError::replay_mismatch(
				&saga.id,
				format!(
					"history has {} steps, definition has {}",
					self.steps.len(),
					saga.steps.len()
				),
			));
		}
		if let Some((recorded, step)) = self
			.steps
			.iter()
			.zip(&saga.steps)
			.find(|(recorded, step)| recorded.resource_ref != step.resource_ref)
		{
			return Err(SagaError::replay_mismatch(
				&saga.id,
				format!(
					"step {} is '{}' in history but '{}' in definition",
					step.index, recorded.resource_ref, step.resource_ref
				),
			));
		}

		for (recorded, step) in self.steps.iter().zip(saga.steps.iter_mut()) {
			step.status = match recorded.status {
				StepStatus::Running => StepStatus::NotStarted,
				status => status,
			};
			step.attempt = recorded.attempt;
			step.result_ref = recorded.result_ref.clone();
			step.last_error = recorded.last_error.clone();
		}
		saga.state = self.state;
		saga.cursor = self.cursor;
		saga.failed_step = self.failed_step;
		saga.cancelled = self.cancelled;
		saga.compensation_errors = self.compensation_errors.clone();
		Ok(())
	}
}

fn check_saga_id(saga_id: &SagaId, event: &Event) -> Result<(), SagaError> {
	if &event.saga_id != saga_id {
		return Err(SagaError::replay_mismatch(
			saga_id,
			format!("event belongs to saga {}", event.saga_id),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;

	fn id() -> SagaId {
		SagaId::from("deploy-1")
	}

	fn started() -> Event {
		Event::saga(
			id(),
			EventType::SagaStarted,
			json!({"name": "web", "steps": ["create-db", "create-servers", "configure-lb"]}),
		)
	}

	fn step(index: usize, event_type: EventType, payload: Value) -> Event {
		Event::step(id(), index, event_type, payload)
	}

	#[test]
	fn test_empty_history() {
		assert_eq!(SagaSnapshot::replay(&id(), &[]).unwrap(), None);
	}

	#[test]
	fn test_replay_forward_progress() {
		let events = vec![
			started(),
			step(0, EventType::StepStarted, Value::Null),
			step(0, EventType::StepSucceeded, json!({"resultRef": "db-1", "attempt": 1})),
			step(1, EventType::StepStarted, Value::Null),
			step(1, EventType::StepRetrying, json!({"error": "network error: reset", "attempt": 1})),
		];
		let snapshot = SagaSnapshot::replay(&id(), &events).unwrap().unwrap();

		assert_eq!(snapshot.name, "web");
		assert_eq!(snapshot.state, SagaState::Running);
		assert_eq!(snapshot.cursor, 1);
		assert_eq!(snapshot.steps[0].status, StepStatus::Succeeded);
		assert_eq!(snapshot.steps[0].result_ref, Some(ResultRef::from("db-1")));
		assert_eq!(snapshot.steps[1].status, StepStatus::Running);
		assert_eq!(snapshot.steps[1].attempt, 1);
		assert_eq!(snapshot.steps[2].status, StepStatus::NotStarted);
		assert!(!snapshot.is_halted());
	}

	#[test]
	fn test_replay_compensation() {
		let events = vec![
			started(),
			step(0, EventType::StepStarted, Value::Null),
			step(0, EventType::StepSucceeded, json!({"resultRef": "db-1"})),
			step(1, EventType::StepStarted, Value::Null),
			step(1, EventType::StepFailed, json!({"error": "quota exceeded: cpu", "attempt": 3})),
			Event::saga(id(), EventType::CompensationStarted, Value::Null),
			step(1, EventType::CompensationStarted, Value::Null),
			step(1, EventType::CompensationSucceeded, Value::Null),
			step(0, EventType::CompensationStarted, Value::Null),
			step(0, EventType::CompensationRetrying, json!({"error": "network error", "attempt": 1})),
			step(0, EventType::CompensationFailed, json!({"error": "network error", "attempt": 2})),
			Event::saga(id(), EventType::SagaFailed, Value::Null),
		];
		let snapshot = SagaSnapshot::replay(&id(), &events).unwrap().unwrap();

		assert_eq!(snapshot.state, SagaState::Failed);
		assert_eq!(snapshot.failed_step, Some(1));
		assert_eq!(snapshot.steps[1].attempt, 3);
		assert_eq!(snapshot.steps[1].status, StepStatus::Compensated);
		assert_eq!(snapshot.compensation_errors.len(), 1);
		assert_eq!(snapshot.compensation_errors[0].resource_ref, "create-db");
		assert_eq!(
			snapshot.compensation_errors[0].result_ref,
			Some(ResultRef::from("db-1"))
		);
	}

	#[test]
	fn test_halted_before_compensation() {
		let events = vec![
			started(),
			step(0, EventType::StepStarted, Value::Null),
			step(0, EventType::StepSucceeded, json!({"resultRef": "db-1"})),
			Event::saga(id(), EventType::SagaCancelled, json!({"atStep": 1})),
		];
		let snapshot = SagaSnapshot::replay(&id(), &events).unwrap().unwrap();
		assert!(snapshot.cancelled);
		assert!(snapshot.is_halted());
	}

	#[test]
	fn test_rejects_malformed_history() {
		let no_start = vec![step(0, EventType::StepStarted, Value::Null)];
		assert_matches!(
			SagaSnapshot::replay(&id(), &no_start),
			Err(SagaError::ReplayMismatch { .. })
		);

		let unknown_step = vec![started(), step(7, EventType::StepStarted, Value::Null)];
		assert_matches!(
			SagaSnapshot::replay(&id(), &unknown_step),
			Err(SagaError::ReplayMismatch { .. })
		);

		let after_terminal = vec![
			started(),
			Event::saga(id(), EventType::SagaCompleted, Value::Null),
			step(0, EventType::StepStarted, Value::Null),
		];
		assert_matches!(
			SagaSnapshot::replay(&id(), &after_terminal),
			Err(SagaError::ReplayMismatch { .. })
		);

		let foreign = vec![Event::saga(
			SagaId::from("other"),
			EventType::SagaStarted,
			json!({"name": "x", "steps": []}),
		)];
		assert_matches!(
			SagaSnapshot::replay(&id(), &foreign),
			Err(SagaError::ReplayMismatch { .. })
		);
	}
}
