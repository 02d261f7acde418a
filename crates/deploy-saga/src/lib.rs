//! Saga-based deployment orchestration.
//!
//! A deployment is a [`Saga`]: an ordered list of steps, each one pairing a
//! forward action (create a resource through a [`ResourceDriver`]) with a
//! compensation (destroy it again). The [`SagaExecutor`] runs the steps in
//! order, records every transition in an append-only [`EventLog`], and on
//! failure unwinds the completed steps in strict reverse order.
//!
//! The event stream is the source of truth for crash recovery: after a
//! restart, [`SagaExecutor::resume`] replays it onto the saga definition and
//! continues from the last durable point.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use deploy_saga::{
//! 	Blueprint, DeploymentPlanner, DriverRegistry, ExecutorConfig, InMemoryEventLog, SagaExecutor,
//! };
//!
//! # async fn deploy(registry: DriverRegistry, yaml: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let blueprint = Blueprint::from_yaml_str(yaml)?;
//! let mut saga = DeploymentPlanner::new(registry).plan(&blueprint)?;
//!
//! let executor = SagaExecutor::new(Arc::new(InMemoryEventLog::new()), ExecutorConfig::default());
//! let outcome = executor.run(&mut saga).await?;
//! println!("{:?}", outcome.final_state);
//! # Ok(())
//! # }
//! ```

pub mod blueprint;
pub mod config;
pub mod driver;
pub mod error;
pub mod event_log;
pub mod retry;
pub mod saga;
pub mod telemetry;

pub use blueprint::{Blueprint, BlueprintError, DeploymentPlanner, ResourceDefinition};
pub use config::{ConfigError, ExecutorConfig};
pub use driver::{DriverError, DriverRegistry, ProviderType, ResourceDriver, ResourceSpec};
pub use error::SagaError;
pub use event_log::{AppendError, Event, EventLog, EventType, FileEventLog, InMemoryEventLog, ReadError};
pub use retry::RetryPolicy;
pub use saga::{
	CompensationFailure, ResultRef, Saga, SagaBuilder, SagaExecutor, SagaId, SagaOutcome, SagaState,
	Step, StepContext, StepStatus,
};

/// Serde helpers for human readable durations such as `"500ms"` or `"5m"`.
pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&durationfmt::to_string(*duration))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		parse(&s).map_err(serde::de::Error::custom)
	}

	pub(crate) fn parse(s: &str) -> Result<Duration, String> {
		let nanos = go_parse_duration::parse_duration(s.trim())
			.map_err(|e| format!("invalid duration '{s}': {e:?}"))?;
		if nanos < 0 {
			return Err(format!("invalid duration '{s}': must not be negative"));
		}
		Ok(Duration::from_nanos(nanos as u64))
	}
}

/// Like [`serde_dur`], for optional durations.
pub mod serde_dur_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match duration {
			Some(d) => serializer.serialize_str(&durationfmt::to_string(*d)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s: Option<String> = Option::deserialize(deserializer)?;
		match s {
			Some(s) => super::serde_dur::parse(&s)
				.map(Some)
				.map_err(serde::de::Error::custom),
			None => Ok(None),
		}
	}
}
