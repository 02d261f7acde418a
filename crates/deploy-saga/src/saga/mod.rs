//! Saga pattern for multi-resource deployments.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensation. The executor runs the steps in order; when one fails (or
//! the saga is cancelled) after others succeeded, their compensations run in
//! strict reverse order so that no resource is torn down while something
//! built on top of it still exists.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use deploy_saga::saga::{compensation_fn, forward_fn, SagaBuilder, SagaExecutor};
//! use deploy_saga::{ExecutorConfig, InMemoryEventLog, ResultRef};
//!
//! # async fn example() -> Result<(), deploy_saga::SagaError> {
//! let mut saga = SagaBuilder::new("web-stack")
//! 	.action(
//! 		"create-db",
//! 		forward_fn(|_ctx| async { Ok(ResultRef::from("db-1")) }),
//! 		compensation_fn(|_ctx| async { Ok(()) }),
//! 	)
//! 	.build()?;
//!
//! let executor = SagaExecutor::new(Arc::new(InMemoryEventLog::new()), ExecutorConfig::default());
//! let outcome = executor.run(&mut saga).await?;
//! assert!(outcome.is_completed());
//! # Ok(())
//! # }
//! ```

mod builder;
mod executor;
mod replay;
mod state;
mod step;
mod types;

pub use builder::{SagaBuilder, StepDefinition};
pub use executor::SagaExecutor;
pub use replay::{SagaSnapshot, StepSnapshot};
pub use state::{SagaState, StepStatus};
pub use step::{
	CompensationAction, ResultRef, Step, StepAction, StepContext, compensation_fn, forward_fn,
};
pub use types::{CompensationFailure, Saga, SagaId, SagaOutcome};
