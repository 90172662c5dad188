//! Dependency order of a batch of entity types.
//!
//! An entity type depends on its parent and on every entity type its
//! attributes reference. Only dependencies inside the batch constrain the
//! order; references to entity types outside it are assumed to be satisfied.

use ahash::AHashMap;
use metarepo_model::EntityType;
use std::collections::BTreeSet;

use crate::error::{MetadataError, MetadataResult};

/// Returns the input indices in dependency order.
///
/// Kahn's algorithm with the ready set ordered by input index, so the result
/// is deterministic and keeps the input order wherever dependencies allow.
fn order(entity_types: &[EntityType]) -> MetadataResult<Vec<usize>> {
    let mut index: AHashMap<&str, usize> = AHashMap::with_capacity(entity_types.len());
    for (i, entity_type) in entity_types.iter().enumerate() {
        if index.insert(entity_type.name.as_str(), i).is_some() {
            return Err(MetadataError::DuplicateDeclaration(entity_type.name.clone()));
        }
    }

    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); entity_types.len()];
    let mut in_degree = vec![0usize; entity_types.len()];
    for (i, entity_type) in entity_types.iter().enumerate() {
        let deps: BTreeSet<usize> = entity_type
            .dependencies()
            .filter_map(|name| index.get(name).copied())
            .collect();
        in_degree[i] = deps.len();
        for dep in deps {
            dependents[dep].insert(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..entity_types.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(entity_types.len());
    while let Some(next) = ready.pop_first() {
        sorted.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if sorted.len() < entity_types.len() {
        return Err(MetadataError::DependencyCycle(cycle_members(
            entity_types,
            &dependents,
            &in_degree,
        )));
    }
    Ok(sorted)
}

/// Names of the unsorted entity types that lie on a cycle. Entity types that
/// merely depend on a cycle are pruned: they have no unsorted dependents left
/// once everything downstream of them is removed.
fn cycle_members(
    entity_types: &[EntityType],
    dependents: &[BTreeSet<usize>],
    in_degree: &[usize],
) -> Vec<String> {
    let mut remaining: BTreeSet<usize> = (0..entity_types.len())
        .filter(|&i| in_degree[i] > 0)
        .collect();
    loop {
        let tails: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| !dependents[i].iter().any(|d| remaining.contains(d)))
            .collect();
        if tails.is_empty() {
            break;
        }
        for tail in tails {
            remaining.remove(&tail);
        }
    }
    remaining
        .into_iter()
        .map(|i| entity_types[i].name.clone())
        .collect()
}

/// Orders entity types so that every parent and referenced entity type in the
/// batch comes before the entity types that depend on it.
pub fn resolve(entity_types: Vec<EntityType>) -> MetadataResult<Vec<EntityType>> {
    let sorted = order(&entity_types)?;
    let mut slots: Vec<Option<EntityType>> = entity_types.into_iter().map(Some).collect();
    Ok(sorted
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

/// Resolved order as names, without taking ownership.
pub fn resolve_names(entity_types: &[EntityType]) -> MetadataResult<Vec<String>> {
    Ok(order(entity_types)?
        .into_iter()
        .map(|i| entity_types[i].name.clone())
        .collect())
}
