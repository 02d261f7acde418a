//! Turns a blueprint into an executable saga.

use std::sync::Arc;

use tracing::debug;

use super::{Blueprint, BlueprintError, deployment_order};
use crate::driver::{DriverRegistry, DriverStep};
use crate::saga::{Saga, SagaBuilder, SagaId, StepDefinition};

/// Turns a blueprint into a saga: one driver-backed step per resource, in
/// dependency order.
#[derive(Debug, Clone)]
pub struct DeploymentPlanner {
	registry: DriverRegistry,
}

impl DeploymentPlanner {
	pub fn new(registry: DriverRegistry) -> Self {
		Self { registry }
	}

	pub fn registry(&self) -> &DriverRegistry {
		&self.registry
	}

	pub fn plan(&self, blueprint: &Blueprint) -> Result<Saga, BlueprintError> {
		self.plan_with(blueprint, SagaBuilder::new(blueprint.name.clone()))
	}

	/// Plan a saga with a known id, e.g. to rebuild it for
	/// [`SagaExecutor::resume`](crate::SagaExecutor::resume).
	pub fn plan_with_id(
		&self,
		blueprint: &Blueprint,
		id: impl Into<SagaId>,
	) -> Result<Saga, BlueprintError> {
		self.plan_with(blueprint, SagaBuilder::new(blueprint.name.clone()).with_id(id))
	}

	fn plan_with(&self, blueprint: &Blueprint, mut builder: SagaBuilder) -> Result<Saga, BlueprintError> {
		for resource in deployment_order(blueprint)? {
			let Some(driver) = self.registry.get(&resource.provider) else {
				return Err(BlueprintError::UnknownProvider {
					resource: resource.name.clone(),
					provider: resource.provider.clone(),
				});
			};
			let supported = driver.supported_types();
			if !supported.is_empty() && !supported.contains(&resource.resource_type) {
				return Err(BlueprintError::UnsupportedType {
					resource: resource.name.clone(),
					provider: resource.provider.clone(),
					resource_type: resource.resource_type.clone(),
				});
			}

			let mut step = StepDefinition::new(resource.name.clone())
				.reversible(Arc::new(DriverStep::new(driver, resource.to_spec())));
			if let Some(retry) = &resource.retry {
				step = step.with_retry(retry.clone());
			}
			if let Some(timeout) = resource.timeout {
				step = step.with_timeout(timeout);
			}
			builder.add_step(step);
		}

		let saga = builder.build()?;
		debug!(
			saga_id = %saga.id(),
			blueprint = %blueprint.name,
			steps = saga.len(),
			"planned deployment"
		);
		Ok(saga)
	}
}
