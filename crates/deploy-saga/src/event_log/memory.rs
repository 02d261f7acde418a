//! In-memory event log for tests and single-process use.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{AppendError, Event, EventLog, ReadError};
use crate::saga::SagaId;

/// Event log kept in process memory.
///
/// Nothing survives a restart, so this is only suitable for tests and for
/// callers that do not need crash recovery.
#[derive(Default)]
pub struct InMemoryEventLog {
	events: RwLock<HashMap<SagaId, Vec<Event>>>,
	/// Remaining appends before injected failures start. `None` disables
	/// injection.
	append_budget: Mutex<Option<usize>>,
}

impl InMemoryEventLog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Let the next `n` appends succeed, then fail every following append
	/// with [`AppendError::Unavailable`].
	pub fn fail_appends_after(&self, n: usize) {
		*self.append_budget.lock() = Some(n);
	}

	/// Stop injecting append failures.
	pub fn clear_failures(&self) {
		*self.append_budget.lock() = None;
	}

	/// Snapshot of the events recorded for a saga.
	pub fn events(&self, saga_id: &SagaId) -> Vec<Event> {
		self.events.read().get(saga_id).cloned().unwrap_or_default()
	}

	pub fn saga_ids(&self) -> Vec<SagaId> {
		let mut ids: Vec<_> = self.events.read().keys().cloned().collect();
		ids.sort();
		ids
	}

	/// Total number of events across all sagas.
	pub fn len(&self) -> usize {
		self.events.read().values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl EventLog for InMemoryEventLog {
	async fn append(&self, event: Event) -> Result<(), AppendError> {
		{
			let mut budget = self.append_budget.lock();
			match budget.as_mut() {
				Some(0) => {
					return Err(AppendError::Unavailable(
						"append rejected by failure injection".to_string(),
					));
				},
				Some(n) => *n -= 1,
				None => {},
			}
		}
		self
			.events
			.write()
			.entry(event.saga_id.clone())
			.or_default()
			.push(event);
		Ok(())
	}

	async fn read_all(&self, saga_id: &SagaId) -> Result<Vec<Event>, ReadError> {
		Ok(self.events(saga_id))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use assert_matches::assert_matches;
	use serde_json::Value;

	use super::*;
	use crate::event_log::EventType;

	fn event(saga: &str, step: usize) -> Event {
		Event::step(SagaId::from(saga), step, EventType::StepStarted, Value::Null)
	}

	#[tokio::test]
	async fn test_append_and_read_in_order() {
		let log = InMemoryEventLog::new();
		let id = SagaId::from("a");
		for i in 0..3 {
			log.append(event("a", i)).await.unwrap();
		}
		log.append(event("b", 0)).await.unwrap();

		let events = log.read_all(&id).await.unwrap();
		let steps: Vec<_> = events.iter().map(|e| e.step_index).collect();
		assert_eq!(steps, vec![Some(0), Some(1), Some(2)]);
		assert_eq!(log.len(), 4);
		assert_eq!(log.saga_ids(), vec![SagaId::from("a"), SagaId::from("b")]);
	}

	#[tokio::test]
	async fn test_unknown_saga_is_empty() {
		let log = InMemoryEventLog::new();
		assert!(log.read_all(&SagaId::from("nope")).await.unwrap().is_empty());
		assert!(log.is_empty());
	}

	#[tokio::test]
	async fn test_failure_injection() {
		let log = InMemoryEventLog::new();
		log.fail_appends_after(2);
		log.append(event("a", 0)).await.unwrap();
		log.append(event("a", 1)).await.unwrap();
		assert_matches!(
			log.append(event("a", 2)).await,
			Err(AppendError::Unavailable(_))
		);
		assert_eq!(log.events(&SagaId::from("a")).len(), 2);

		log.clear_failures();
		log.append(event("a", 2)).await.unwrap();
		assert_eq!(log.events(&SagaId::from("a")).len(), 3);
	}

	#[tokio::test]
	async fn test_concurrent_appends_keep_per_saga_order() {
		let log = Arc::new(InMemoryEventLog::new());
		let mut handles = Vec::new();
		for saga in 0..8 {
			let log = log.clone();
			handles.push(tokio::spawn(async move {
				let name = format!("saga-{saga}");
				for step in 0..50 {
					log.append(event(&name, step)).await.unwrap();
				}
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		for saga in 0..8 {
			let events = log.events(&SagaId::from(format!("saga-{saga}")));
			let steps: Vec<_> = events.iter().filter_map(|e| e.step_index).collect();
			assert_eq!(steps, (0..50).collect::<Vec<_>>());
		}
	}
}
