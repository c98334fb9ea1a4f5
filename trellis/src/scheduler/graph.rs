//! Dependency graph over a workflow's resources.
//!
//! Resources live in an arena addressed by `actionId`; edges are index pairs
//! from `metadata.requires`. A Kahn-style topological sort with source-position
//! tie-breaks keeps execution deterministic; a cycle reports one
//! representative path.

use std::collections::{BTreeSet, HashMap};

use crate::config::Resource;
use crate::error::{Error, ErrorCode};

/// Immutable view of the resolved DAG.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Arena index by action id.
    index: HashMap<String, usize>,
    /// `dependents[i]` lists the indices that require resource `i`.
    dependents: Vec<Vec<usize>>,
    /// `requires[i]` lists the indices resource `i` requires.
    requires: Vec<Vec<usize>>,
    /// Topological order (indices into the resource slice), position-stable.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Resolves edges and sorts. Unknown `requires` ids and cycles are load
    /// errors (`InvalidResource`, `DependencyCycle`).
    pub fn build(resources: &[Resource]) -> Result<Self, Error> {
        let mut index = HashMap::new();
        for (i, r) in resources.iter().enumerate() {
            index.insert(r.action_id().to_string(), i);
        }

        let mut requires: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
        for (i, r) in resources.iter().enumerate() {
            for dep in &r.metadata.requires {
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(Error::new(
                        ErrorCode::InvalidResource,
                        format!("'{}' requires unknown resource '{}'", r.action_id(), dep),
                    ));
                };
                requires[i].push(d);
                dependents[d].push(i);
            }
        }

        // Kahn's algorithm; the ready set is ordered by source position so
        // ties break deterministically.
        let mut in_degree: Vec<usize> = requires.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(resources.len());
        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(next);
            for &dep in &dependents[next] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }

        if order.len() != resources.len() {
            let cycle = representative_cycle(resources, &requires, &in_degree);
            return Err(Error::new(
                ErrorCode::DependencyCycle,
                format!("dependency cycle: {}", cycle),
            ));
        }

        Ok(Self {
            index,
            dependents,
            requires,
            order,
        })
    }

    /// Arena index of an action id.
    pub fn index_of(&self, action_id: &str) -> Option<usize> {
        self.index.get(action_id).copied()
    }

    /// Topological order over all resources.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// The indices resource `i` requires.
    pub fn requires_of(&self, i: usize) -> &[usize] {
        &self.requires[i]
    }

    /// The transitive dependency closure of `target` (inclusive), in
    /// topological order.
    pub fn closure_of(&self, target: usize) -> Vec<usize> {
        let mut wanted = vec![false; self.dependents.len()];
        let mut stack = vec![target];
        while let Some(i) = stack.pop() {
            if wanted[i] {
                continue;
            }
            wanted[i] = true;
            stack.extend(self.requires[i].iter().copied());
        }
        self.order.iter().copied().filter(|i| wanted[*i]).collect()
    }
}

/// Walks the unresolved remainder to print one cycle, e.g. `a -> b -> a`.
fn representative_cycle(
    resources: &[Resource],
    requires: &[Vec<usize>],
    in_degree: &[usize],
) -> String {
    let Some(start) = in_degree.iter().position(|d| *d > 0) else {
        return "<unknown>".to_string();
    };
    let mut path = vec![start];
    let mut seen = HashMap::new();
    seen.insert(start, 0usize);
    let mut current = start;
    loop {
        // Any still-blocked dependency continues the walk; one must exist.
        let Some(&next) = requires[current]
            .iter()
            .find(|d| in_degree[**d] > 0)
        else {
            return "<unknown>".to_string();
        };
        if let Some(&at) = seen.get(&next) {
            let names: Vec<&str> = path[at..]
                .iter()
                .chain(std::iter::once(&next))
                .map(|i| resources[*i].action_id())
                .collect();
            return names.join(" -> ");
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, requires: &[&str]) -> Resource {
        serde_yaml::from_str(&format!(
            "metadata:\n  actionId: {}\n  requires: [{}]\nrun: {{}}",
            id,
            requires.join(", ")
        ))
        .unwrap()
    }

    /// **Scenario**: topological order respects edges and breaks ties by
    /// source position.
    #[test]
    fn topo_order_with_position_ties() {
        let rs = vec![
            resource("c", &["a"]),
            resource("a", &[]),
            resource("b", &["a"]),
            resource("d", &["b", "c"]),
        ];
        let g = DependencyGraph::build(&rs).unwrap();
        let ids: Vec<&str> = g.order().iter().map(|i| rs[*i].action_id()).collect();
        // `a` first; then `c` before `b` (source position), then `d`.
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
    }

    /// **Scenario**: a cycle is rejected with one representative path named.
    #[test]
    fn cycle_reported() {
        let rs = vec![
            resource("a", &["c"]),
            resource("b", &["a"]),
            resource("c", &["b"]),
        ];
        let err = DependencyGraph::build(&rs).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyCycle);
        let msg = err.message().to_string();
        assert!(msg.contains("->"), "expected a cycle path, got {}", msg);
    }

    #[test]
    fn closure_is_ancestors_only() {
        let rs = vec![
            resource("a", &[]),
            resource("b", &["a"]),
            resource("unrelated", &[]),
            resource("c", &["b"]),
        ];
        let g = DependencyGraph::build(&rs).unwrap();
        let target = g.index_of("c").unwrap();
        let ids: Vec<&str> = g
            .closure_of(target)
            .iter()
            .map(|i| rs[*i].action_id())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_dependency_rejected() {
        let rs = vec![resource("a", &["ghost"])];
        let err = DependencyGraph::build(&rs).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidResource);
    }
}
