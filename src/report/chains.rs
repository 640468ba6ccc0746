//! "Something old" chains: why a stale transitive dependency is in the graph.

use std::collections::{BTreeSet, HashMap};

use super::Report;
use crate::model::DependencyNode;

/// Upper bound on distinct paths reported for one package.
pub const MAX_CHAINS_PER_PACKAGE: usize = 3;

/// Parent-to-child paths (`a@1 > b@2 > old@0.1`) ending at every transitive
/// entry that is ancient or deprecated. Paths start at the topmost node that
/// is itself part of the graph; source labels and the project root are left out.
pub fn something_old_chains(report: &Report) -> Vec<String> {
    let index: HashMap<&str, &DependencyNode> = report
        .entries
        .iter()
        .map(|e| (e.node.key.as_str(), &e.node))
        .collect();

    let mut chains = BTreeSet::new();
    for entry in &report.entries {
        let signals = &entry.signals;
        if !entry.node.is_transitive() || !(signals.ancient || signals.deprecated) {
            continue;
        }
        let mut walk = Walk::default();
        let mut path = vec![entry.node.key.as_str()];
        walk.up(&index, &mut path);
        chains.extend(walk.found);
    }
    chains.into_iter().collect()
}

/// Upper bound on nodes visited while searching paths for one package.
const MAX_WALK_STEPS: usize = 10_000;

#[derive(Default)]
struct Walk {
    found: Vec<String>,
    steps: usize,
}

impl Walk {
    fn done(&self) -> bool {
        self.found.len() >= MAX_CHAINS_PER_PACKAGE || self.steps >= MAX_WALK_STEPS
    }

    /// Depth-first towards the roots; `path` holds the nodes of the current
    /// branch only, so a node shared by two branches is visited from each.
    fn up<'a>(&mut self, index: &HashMap<&'a str, &'a DependencyNode>, path: &mut Vec<&'a str>) {
        self.steps += 1;
        let Some(current) = path.last().and_then(|key| index.get(key)) else {
            return;
        };
        let parents: Vec<&'a str> = current
            .parents
            .iter()
            .filter_map(|p| index.get_key_value(p.as_str()).map(|(key, _)| *key))
            .collect();

        if parents.is_empty() {
            if path.len() > 1 {
                self.found.push(path.iter().rev().copied().collect::<Vec<_>>().join(" > "));
            }
            return;
        }
        for parent in parents {
            if self.done() {
                return;
            }
            // cycle guard
            if path.contains(&parent) {
                continue;
            }
            path.push(parent);
            self.up(index, path);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ecosystem, RiskSignals};
    use crate::report::{ReportEntry, Summary};

    fn entry(name: &str, depth: u32, parents: &[&str], ancient: bool) -> ReportEntry {
        let mut node = DependencyNode::new(name, "1.0.0", Ecosystem::Npm, depth);
        for p in parents {
            node.add_parent(*p);
        }
        ReportEntry {
            node,
            metadata: Default::default(),
            signals: RiskSignals {
                ancient,
                ..Default::default()
            },
        }
    }

    fn report(entries: Vec<ReportEntry>) -> Report {
        Report {
            ecosystem: Some(Ecosystem::Npm),
            summary: Summary::default(),
            entries,
            audit: None,
        }
    }

    #[test]
    fn test_chains_through_multiple_parents() {
        let r = report(vec![
            entry("express", 1, &["app@1.0.0"], false),
            entry("koa", 1, &["app@1.0.0"], false),
            entry("body-parser", 2, &["express@1.0.0"], false),
            entry("qs", 3, &["body-parser@1.0.0", "koa@1.0.0"], true),
        ]);
        assert_eq!(
            something_old_chains(&r),
            vec![
                "express@1.0.0 > body-parser@1.0.0 > qs@1.0.0".to_string(),
                "koa@1.0.0 > qs@1.0.0".to_string(),
            ]
        );
    }

    #[test]
    fn test_cycles_and_direct_entries() {
        let r = report(vec![
            entry("old-direct", 1, &["app@1.0.0"], true),
            entry("a", 2, &["b@1.0.0", "old-direct@1.0.0"], true),
            entry("b", 2, &["a@1.0.0"], false),
        ]);
        // a <-> b cycle terminates; direct entries produce no chain of their own.
        assert_eq!(something_old_chains(&r), vec!["old-direct@1.0.0 > a@1.0.0".to_string()]);
    }

    #[test]
    fn test_stops_at_chain_cap() {
        let mut entries: Vec<ReportEntry> = (0..6)
            .map(|i| entry(&format!("root{}", i), 1, &["app@1.0.0"], false))
            .collect();
        let parents: Vec<String> = (0..6).map(|i| format!("root{}@1.0.0", i)).collect();
        let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
        entries.push(entry("old", 2, &parents, true));
        let chains = something_old_chains(&report(entries));
        assert_eq!(chains.len(), MAX_CHAINS_PER_PACKAGE);
        assert_eq!(chains[0], "root0@1.0.0 > old@1.0.0");
    }

    #[test]
    fn test_dense_cyclic_graph_terminates() {
        // Ten fully connected layers of four whose top layer points back at
        // the stale package: every path ends in the cycle guard.
        const LAYERS: usize = 10;
        const WIDTH: usize = 4;
        let key = |layer: usize, i: usize| format!("n{}x{}@1.0.0", layer, i);
        let mut entries = Vec::new();
        for layer in 0..LAYERS {
            let parents: Vec<String> = if layer + 1 == LAYERS {
                vec!["old@1.0.0".to_string()]
            } else {
                (0..WIDTH).map(|i| key(layer + 1, i)).collect()
            };
            let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
            for i in 0..WIDTH {
                entries.push(entry(&format!("n{}x{}", layer, i), 2, &parents, false));
            }
        }
        let bottom: Vec<String> = (0..WIDTH).map(|i| key(0, i)).collect();
        let bottom: Vec<&str> = bottom.iter().map(String::as_str).collect();
        entries.push(entry("old", 3, &bottom, true));

        assert!(something_old_chains(&report(entries)).is_empty());
    }
}
