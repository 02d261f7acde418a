//! Executor-level error taxonomy.
//!
//! Step failures are not errors at this level: a failed forward action or
//! compensation ends up in the [`SagaOutcome`](crate::SagaOutcome). What is
//! left here are usage errors and event log failures, which abort a run.

use thiserror::Error;

use crate::event_log::{AppendError, ReadError};
use crate::saga::{SagaId, SagaState};

/// Errors that stop the executor from driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
	#[error("cannot {operation} saga {saga_id} in state {state}")]
	InvalidState {
		saga_id: SagaId,
		state: SagaState,
		operation: &'static str,
	},

	#[error("step '{resource_ref}' has no compensation action")]
	MissingCompensation { resource_ref: String },

	#[error("step '{resource_ref}' has no forward action")]
	MissingAction { resource_ref: String },

	#[error("duplicate step for resource '{resource_ref}'")]
	DuplicateStep { resource_ref: String },

	#[error("event log append failed: {0}")]
	Append(#[from] AppendError),

	#[error("event log read failed: {0}")]
	Read(#[from] ReadError),

	#[error("event history of saga {saga_id} does not match its definition: {message}")]
	ReplayMismatch { saga_id: SagaId, message: String },
}

impl SagaError {
	pub(crate) fn invalid_state(saga_id: &SagaId, state: SagaState, operation: &'static str) -> Self {
		Self::InvalidState {
			saga_id: saga_id.clone(),
			state,
			operation,
		}
	}

	pub(crate) fn replay_mismatch(saga_id: &SagaId, message: impl Into<String>) -> Self {
		Self::ReplayMismatch {
			saga_id: saga_id.clone(),
			message: message.into(),
		}
	}

	/// True for errors raised while building a saga, before anything ran.
	pub fn is_definition_error(&self) -> bool {
		matches!(
			self,
			Self::MissingCompensation { .. } | Self::MissingAction { .. } | Self::DuplicateStep { .. }
		)
	}
}
