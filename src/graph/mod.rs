//! Attack dependency-graph validation.
//!
//! Dependencies are validated for dangling references and cycles before a
//! campaign can start. They are deliberately advisory beyond that: neither
//! generation nor dispatch waits on a dependency to finish.

use crate::database::models::Attack;
use crate::{HiveError, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// A node in the dependency graph: one attack and the attacks it waits on.
#[derive(Debug, Clone)]
pub struct AttackNode {
    pub id: String,
    pub dependencies: Vec<String>,
}

impl From<&Attack> for AttackNode {
    fn from(attack: &Attack) -> Self {
        Self {
            id: attack.id.clone(),
            dependencies: attack.dependencies.0.clone(),
        }
    }
}

/// Validate a campaign's attack dependencies via Kahn's topological sort.
///
/// Fails fast on a dependency id that names no attack in the set; otherwise
/// drains zero-in-degree nodes and reports the residue (the cycle
/// participants) if any node never reaches in-degree zero.
pub fn validate_dependencies(nodes: &[AttackNode]) -> Result<()> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    for node in nodes {
        for dep in &node.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(HiveError::Validation(format!(
                    "attack {} depends on non-existent attack {}",
                    node.id, dep
                )));
            }
        }
    }

    // Edges point dependency -> dependent.
    let mut in_degree: HashMap<&str, usize> =
        nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in nodes {
        for dep in &node.dependencies {
            *in_degree.get_mut(node.id.as_str()).unwrap() += 1;
            adjacency
                .entry(dep.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut processed = 0usize;
    while let Some(id) = queue.pop_front() {
        processed += 1;
        if let Some(dependents) = adjacency.get(id) {
            for dependent in dependents {
                let deg = in_degree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if processed != nodes.len() {
        let mut remaining: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| *id)
            .collect();
        remaining.sort_unstable();

        return Err(HiveError::Validation(format!(
            "circular dependency detected among attacks: {}",
            remaining.join(", ")
        )));
    }

    Ok(())
}
