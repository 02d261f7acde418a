//! Dependency ordering of blueprint resources.

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};

use super::{Blueprint, BlueprintError, ResourceDefinition};

/// Order resources so that every resource comes after its dependencies.
///
/// Kahn's algorithm; among resources that are ready at the same time the one
/// declared first wins, so independent resources keep blueprint order.
pub fn deployment_order(blueprint: &Blueprint) -> Result<Vec<&ResourceDefinition>, BlueprintError> {
	let resources = &blueprint.resources;

	let mut positions: IndexMap<&str, usize> = IndexMap::with_capacity(resources.len());
	for (i, resource) in resources.iter().enumerate() {
		if positions.insert(resource.name.as_str(), i).is_some() {
			return Err(BlueprintError::DuplicateResource(resource.name.clone()));
		}
	}

	// deps[i]: positions resource i depends on, without repeats
	let mut deps: Vec<IndexSet<usize>> = Vec::with_capacity(resources.len());
	for resource in resources {
		let mut set = IndexSet::new();
		for dependency in &resource.dependencies {
			let Some(&pos) = positions.get(dependency.as_str()) else {
				return Err(BlueprintError::MissingDependency {
					resource: resource.name.clone(),
					dependency: dependency.clone(),
				});
			};
			set.insert(pos);
		}
		deps.push(set);
	}

	let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
	let mut pending: Vec<usize> = deps.iter().map(IndexSet::len).collect();
	for (i, set) in deps.iter().enumerate() {
		for &dep in set {
			dependents[dep].push(i);
		}
	}

	let mut ready: BTreeSet<usize> = (0..resources.len()).filter(|&i| pending[i] == 0).collect();
	let mut order = Vec::with_capacity(resources.len());
	while let Some(next) = ready.pop_first() {
		order.push(next);
		for &dependent in &dependents[next] {
			pending[dependent] -= 1;
			if pending[dependent] == 0 {
				ready.insert(dependent);
			}
		}
	}

	if order.len() < resources.len() {
		return Err(BlueprintError::DependencyCycle(find_cycle(resources, &deps, &pending)));
	}
	Ok(order.into_iter().map(|i| &resources[i]).collect())
}

/// Walk dependency edges among unresolved resources until one repeats.
///
/// Every unresolved resource has at least one unresolved dependency, so the
/// walk always closes a loop.
fn find_cycle(
	resources: &[ResourceDefinition],
	deps: &[IndexSet<usize>],
	pending: &[usize],
) -> Vec<String> {
	let Some(start) = (0..resources.len()).find(|&i| pending[i] > 0) else {
		return Vec::new();
	};
	let mut path: IndexSet<usize> = IndexSet::new();
	let mut current = start;
	while path.insert(current) {
		match deps[current].iter().find(|&&d| pending[d] > 0) {
			Some(&next) => current = next,
			None => break,
		}
	}
	let from = path.get_index_of(&current).unwrap_or(0);
	path
		.iter()
		.skip(from)
		.chain(std::iter::once(&current))
		.map(|&i| resources[i].name.clone())
		.collect()
}
