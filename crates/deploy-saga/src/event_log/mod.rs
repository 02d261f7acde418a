//! Append-only record of saga state transitions.
//!
//! The ordered event stream of a saga is enough to rebuild its state after a
//! crash (see [`SagaSnapshot`](crate::saga::SagaSnapshot)). Implementations
//! only have to guarantee ordering per saga id; ordering across sagas is
//! irrelevant.

mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use file::FileEventLog;
pub use memory::InMemoryEventLog;

use crate::saga::SagaId;

/// Error returned when an event could not be durably recorded.
///
/// The executor treats this as fatal for the current run.
#[derive(Debug, Error)]
pub enum AppendError {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("event log unavailable: {0}")]
	Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("corrupt event at line {line}: {source}")]
	Serialization {
		line: usize,
		#[source]
		source: serde_json::Error,
	},
	#[error("event log unavailable: {0}")]
	Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
	SagaStarted,
	StepStarted,
	StepRetrying,
	StepSucceeded,
	StepFailed,
	SagaCancelled,
	/// Saga-level when `step_index` is `None`, otherwise for a single step.
	CompensationStarted,
	CompensationRetrying,
	CompensationSucceeded,
	CompensationFailed,
	SagaCompleted,
	SagaCompensated,
	SagaFailed,
}

impl EventType {
	/// Events that close a saga's history.
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			Self::SagaCompleted | Self::SagaCompensated | Self::SagaFailed
		)
	}
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// One immutable entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub saga_id: SagaId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub step_index: Option<usize>,
	pub event_type: EventType,
	pub timestamp: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub payload: Value,
}

impl Event {
	pub fn new(
		saga_id: SagaId,
		step_index: Option<usize>,
		event_type: EventType,
		payload: Value,
	) -> Self {
		Self {
			saga_id,
			step_index,
			event_type,
			timestamp: Utc::now(),
			payload,
		}
	}

	/// A saga-level event.
	pub fn saga(saga_id: SagaId, event_type: EventType, payload: Value) -> Self {
		Self::new(saga_id, None, event_type, payload)
	}

	/// An event about a single step.
	pub fn step(saga_id: SagaId, step_index: usize, event_type: EventType, payload: Value) -> Self {
		Self::new(saga_id, Some(step_index), event_type, payload)
	}

	pub(crate) fn payload_str(&self, key: &str) -> Option<&str> {
		self.payload.get(key).and_then(Value::as_str)
	}

	pub(crate) fn payload_u32(&self, key: &str) -> Option<u32> {
		self
			.payload
			.get(key)
			.and_then(Value::as_u64)
			.and_then(|v| u32::try_from(v).ok())
	}
}

/// Durable, append-only event storage.
///
/// `append` must be safe for concurrent callers appending for different
/// sagas.
#[async_trait]
pub trait EventLog: Send + Sync {
	/// Durably record an event. Returns only once the event is persisted.
	async fn append(&self, event: Event) -> Result<(), AppendError>;

	/// Every event of a saga in append order. Empty for an unknown saga.
	async fn read_all(&self, saga_id: &SagaId) -> Result<Vec<Event>, ReadError>;
}
