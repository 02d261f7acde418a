//! Saga and step state machines.
//!
//! ```text
//! PENDING --start--> RUNNING
//! RUNNING --all steps succeed--> COMPLETED
//! RUNNING --step fails, nothing succeeded--> FAILED
//! RUNNING --step fails or cancelled--> COMPENSATING
//! COMPENSATING --all compensations succeed--> COMPENSATED
//! COMPENSATING --a compensation fails--> FAILED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a saga as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
	Pending,
	Running,
	Compensating,
	Completed,
	Failed,
	Compensated,
}

impl SagaState {
	/// Terminal states are entered exactly once and never left.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Compensated)
	}

	pub fn can_transition_to(self, next: SagaState) -> bool {
		use SagaState::*;
		matches!(
			(self, next),
			(Pending, Running)
				| (Running, Completed)
				| (Running, Failed)
				| (Running, Compensating)
				| (Compensating, Compensated)
				| (Compensating, Failed)
		)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::Running => "RUNNING",
			Self::Compensating => "COMPENSATING",
			Self::Completed => "COMPLETED",
			Self::Failed => "FAILED",
			Self::Compensated => "COMPENSATED",
		}
	}
}

impl fmt::Display for SagaState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Lifecycle of a single step.
///
/// A step that failed its forward action may still be compensated, since the
/// provider call can have left a partially created resource behind. Driver
/// steps locate such a resource with `ResourceDriver::find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
	NotStarted,
	Running,
	Succeeded,
	Failed,
	Compensating,
	Compensated,
}

impl StepStatus {
	pub fn can_transition_to(self, next: StepStatus) -> bool {
		use StepStatus::*;
		matches!(
			(self, next),
			(NotStarted, Running)
				| (Running, Succeeded)
				| (Running, Failed)
				| (Succeeded, Compensating)
				| (Failed, Compensating)
				| (Compensating, Compensated)
				| (Compensating, Failed)
		)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::NotStarted => "NOT_STARTED",
			Self::Running => "RUNNING",
			Self::Succeeded => "SUCCEEDED",
			Self::Failed => "FAILED",
			Self::Compensating => "COMPENSATING",
			Self::Compensated => "COMPENSATED",
		}
	}
}

impl fmt::Display for StepStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
