//! Dependency graph queries: cycle detection and bounded transitive
//! closure.
//!
//! Works over id pairs loaded from the `dependency_graph` table; file-level
//! and symbol-level edges share the same machinery. Cycles are expected in
//! real module graphs and must never cause non-termination.

use std::collections::{HashMap, HashSet, VecDeque};

/// Upper bound on traversal depth regardless of what the caller asks for.
pub const MAX_TRAVERSAL_DEPTH: u32 = 20;

/// A node reached by a transitive query, annotated with the depth at which
/// the search first discovered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalHit {
    pub node: String,
    /// In `[1, depth]`
    pub depth: u32,
}

/// Visit state for the cycle DFS.
#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Adjacency view over a set of directed edges.
#[derive(Debug, Default)]
pub struct DependencyGraphView {
    forward: HashMap<String, Vec<String>>,
    reverse: HashMap<String, Vec<String>>,
    nodes: Vec<String>,
}

impl DependencyGraphView {
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut forward: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();

        for (from, to) in edges {
            let from = from.into();
            let to = to.into();
            if seen.insert(from.clone()) {
                nodes.push(from.clone());
            }
            if seen.insert(to.clone()) {
                nodes.push(to.clone());
            }
            forward.entry(from.clone()).or_default().push(to.clone());
            reverse.entry(to).or_default().push(from);
        }

        // Deterministic traversal order regardless of input order
        nodes.sort();
        for targets in forward.values_mut() {
            targets.sort();
        }
        for sources in reverse.values_mut() {
            sources.sort();
        }

        Self {
            forward,
            reverse,
            nodes,
        }
    }

    /// Find all cycles reachable in the graph. Each returned chain is an
    /// ordered node sequence where the last node links back to the first.
    /// Self-loops produce single-element chains.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut colors: HashMap<&str, Color> =
            self.nodes.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut cycles = Vec::new();
        let mut path: Vec<&str> = Vec::new();

        for node in &self.nodes {
            if colors[node.as_str()] == Color::White {
                self.dfs(node, &mut colors, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        colors.insert(node, Color::Gray);
        path.push(node);

        if let Some(targets) = self.forward.get(node) {
            for target in targets {
                match colors.get(target.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        // Back edge: the chain from the target's position in
                        // the current path closes a cycle
                        if let Some(start) = path.iter().position(|n| *n == target.as_str()) {
                            cycles.push(path[start..].iter().map(|n| n.to_string()).collect());
                        }
                    }
                    Color::White => self.dfs(target, colors, path, cycles),
                    Color::Black => {}
                }
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
    }

    /// Nodes reachable from `source` following edge direction, within
    /// `depth` hops. The source itself is not part of the result.
    pub fn dependencies(&self, source: &str, depth: u32) -> Vec<TraversalHit> {
        bounded_bfs(&self.forward, source, depth)
    }

    /// Nodes from which `target` is reachable, within `depth` hops.
    pub fn dependents(&self, target: &str, depth: u32) -> Vec<TraversalHit> {
        bounded_bfs(&self.reverse, target, depth)
    }
}

/// BFS with a visited set and per-node discovery depth. Cycles terminate
/// because a node is never enqueued twice.
fn bounded_bfs(
    adjacency: &HashMap<String, Vec<String>>,
    start: &str,
    depth: u32,
) -> Vec<TraversalHit> {
    let max_depth = depth.min(MAX_TRAVERSAL_DEPTH);
    let mut hits = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(start);

    let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
    queue.push_back((start, 0));

    while let Some((node, node_depth)) = queue.pop_front() {
        if node_depth >= max_depth {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            for neighbor in next {
                if visited.insert(neighbor) {
                    hits.push(TraversalHit {
                        node: neighbor.clone(),
                        depth: node_depth + 1,
                    });
                    queue.push_back((neighbor, node_depth + 1));
                }
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> DependencyGraphView {
        DependencyGraphView::from_edges(edges.iter().copied())
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(g.find_cycles().is_empty());
    }

    #[test]
    fn simple_cycle_is_found_as_an_ordered_chain() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
        // The chain closes back on its head
        let chain = &cycles[0];
        let head = &chain[0];
        let tail = chain.last().unwrap();
        assert!(g.forward[tail].contains(head));
    }

    #[test]
    fn self_loop_is_a_single_element_cycle() {
        let g = graph(&[("a", "a"), ("a", "b")]);
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a"]);
    }

    #[test]
    fn multiple_cycles_are_all_reported() {
        let g = graph(&[("a", "b"), ("b", "a"), ("c", "d"), ("d", "c")]);
        assert_eq!(g.find_cycles().len(), 2);
    }

    #[test]
    fn chain_dependents_carry_their_depths() {
        // f4 -> f3 -> f2 -> f1
        let g = graph(&[("f4", "f3"), ("f3", "f2"), ("f2", "f1")]);
        let mut hits = g.dependents("f1", 3);
        hits.sort_by(|a, b| a.depth.cmp(&b.depth));

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0], TraversalHit { node: "f2".to_string(), depth: 1 });
        assert_eq!(hits[1], TraversalHit { node: "f3".to_string(), depth: 2 });
        assert_eq!(hits[2], TraversalHit { node: "f4".to_string(), depth: 3 });
    }

    #[test]
    fn depth_bound_truncates_the_search() {
        let g = graph(&[("f4", "f3"), ("f3", "f2"), ("f2", "f1")]);
        let hits = g.dependents("f1", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, "f2");
    }

    #[test]
    fn dependencies_follow_edge_direction() {
        let g = graph(&[("main", "lib"), ("lib", "util")]);
        let mut hits = g.dependencies("main", 5);
        hits.sort_by(|a, b| a.depth.cmp(&b.depth));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node, "lib");
        assert_eq!(hits[1].node, "util");
    }

    #[test]
    fn cyclic_graph_traversal_terminates_without_duplicates() {
        // Cycle on top of a chain: f1 -> f3 while f4 -> f3 -> f2 -> f1
        let g = graph(&[("f4", "f3"), ("f3", "f2"), ("f2", "f1"), ("f1", "f3")]);
        let hits = g.dependents("f1", 5);
        assert!(!hits.is_empty());

        let mut nodes: Vec<&str> = hits.iter().map(|h| h.node.as_str()).collect();
        nodes.sort();
        nodes.dedup();
        assert_eq!(nodes.len(), hits.len(), "no node appears twice");
        for hit in &hits {
            assert!(hit.depth >= 1 && hit.depth <= 5);
        }
    }

    #[test]
    fn requested_depth_is_clamped_to_the_ceiling() {
        let edges: Vec<(String, String)> = (0..100)
            .map(|i| (format!("n{}", i + 1), format!("n{i}")))
            .collect();
        let g = DependencyGraphView::from_edges(edges);
        let hits = g.dependents("n0", u32::MAX);
        assert_eq!(hits.len(), MAX_TRAVERSAL_DEPTH as usize);
    }

    #[test]
    fn unknown_node_returns_empty() {
        let g = graph(&[("a", "b")]);
        assert!(g.dependents("zzz", 5).is_empty());
        assert!(g.dependencies("zzz", 5).is_empty());
    }
}
