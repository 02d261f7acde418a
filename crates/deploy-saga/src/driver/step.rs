//! Binding of one resource to a driver-backed saga step.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DriverError, ResourceDriver, ResourceSpec};
use crate::saga::{CompensationAction, ResultRef, StepAction, StepContext};

/// A saga step backed by a resource driver: `create` forward, `destroy` back.
pub struct DriverStep {
	driver: Arc<dyn ResourceDriver>,
	spec: ResourceSpec,
}

impl DriverStep {
	pub fn new(driver: Arc<dyn ResourceDriver>, spec: ResourceSpec) -> Self {
		Self { driver, spec }
	}

	pub fn spec(&self) -> &ResourceSpec {
		&self.spec
	}

	/// The spec with the result refs of its dependencies filled in from the
	/// steps that ran before this one.
	fn resolve(&self, ctx: &StepContext) -> Result<ResourceSpec, DriverError> {
		let mut spec = self.spec.clone();
		for dependency in &self.spec.depends_on {
			let Some(result_ref) = ctx.prior_results.get(dependency) else {
				return Err(DriverError::InvalidSpec(format!(
					"'{}' depends on '{dependency}', which has not been created",
					self.spec.name
				)));
			};
			spec
				.dependency_refs
				.insert(dependency.clone(), result_ref.clone());
		}
		Ok(spec)
	}
}

impl fmt::Debug for DriverStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DriverStep")
			.field("provider", &self.driver.provider())
			.field("spec", &self.spec)
			.finish()
	}
}

#[async_trait]
impl StepAction for DriverStep {
	async fn execute(&self, ctx: &StepContext) -> Result<ResultRef, DriverError> {
		let spec = self.resolve(ctx)?;
		debug!(
			resource = %spec.name,
			provider = %spec.provider,
			correlation_id = ctx.correlation_id.as_deref(),
			attempt = ctx.attempt,
			"creating resource"
		);
		self.driver.create(&spec).await
	}
}

#[async_trait]
impl CompensationAction for DriverStep {
	async fn compensate(&self, ctx: &StepContext) -> Result<(), DriverError> {
		let result_ref = match &ctx.result_ref {
			Some(result_ref) => result_ref.clone(),
			// The create may have gone through even though its result was lost.
			None => match self.driver.find(&self.spec).await? {
				Some(found) => {
					warn!(resource = %self.spec.name, %found, "destroying resource left by a failed create");
					found
				},
				None => return Ok(()),
			},
		};
		debug!(resource = %self.spec.name, %result_ref, "destroying resource");
		match self.driver.destroy(&result_ref).await {
			Err(DriverError::NotFound(_)) => Ok(()),
			other => other,
		}
	}
}
