//! Generic cycle-safe directed graph, used wherever the engine needs to
//! validate that inserting an edge does not close a cycle in an otherwise
//! acyclic relation (`§4.2`, `§9` design notes). Role-grant graphs and
//! similar catalog relations are out of scope; this module only provides
//! the general mechanism they would sit on top of.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

struct Edge<N> {
    from: N,
    to: N,
    invalid: bool,
}

/// A directed graph over node identities `N`, with lazy edge removal: a
/// removed edge is flagged `invalid` rather than spliced out, so a
/// speculative insert-then-check-then-remove sequence never invalidates
/// adjacency indices held elsewhere.
pub struct DirectedGraph<N> {
    edges: Vec<Edge<N>>,
    adjacency: HashMap<N, Vec<usize>>,
}

impl<N: Eq + Hash + Clone> DirectedGraph<N> {
    pub fn new() -> Self {
        Self {
            edges: Vec::new(),
            adjacency: HashMap::new(),
        }
    }

    /// Inserts `from -> to` only if doing so keeps the graph acyclic.
    /// Returns `false` (no-op) if the edge would close a cycle.
    pub fn try_insert_edge(&mut self, from: N, to: N) -> bool {
        let idx = self.edges.len();
        self.edges.push(Edge { from: from.clone(), to: to.clone(), invalid: false });
        self.adjacency.entry(from).or_default().push(idx);

        if self.has_cycle() {
            self.edges[idx].invalid = true;
            false
        } else {
            true
        }
    }

    pub fn remove_edge(&mut self, from: &N, to: &N) {
        for edge in self.edges.iter_mut() {
            if !edge.invalid && &edge.from == from && &edge.to == to {
                edge.invalid = true;
            }
        }
    }

    /// Three-color (white/grey/black) DFS over all non-invalidated edges.
    pub fn has_cycle(&self) -> bool {
        let mut color: HashMap<&N, Color> = HashMap::new();
        for node in self.adjacency.keys() {
            color.entry(node).or_insert(Color::White);
        }
        let nodes: Vec<&N> = color.keys().cloned().collect();
        for node in nodes {
            if color.get(node).copied().unwrap_or(Color::White) == Color::White
                && self.visit(node, &mut color)
            {
                return true;
            }
        }
        false
    }

    fn visit<'a>(&'a self, node: &'a N, color: &mut HashMap<&'a N, Color>) -> bool {
        color.insert(node, Color::Grey);
        if let Some(out_edges) = self.adjacency.get(node) {
            for &idx in out_edges {
                let edge = &self.edges[idx];
                if edge.invalid {
                    continue;
                }
                match color.get(&edge.to).copied().unwrap_or(Color::White) {
                    Color::Grey => return true,
                    Color::White => {
                        if self.visit(&edge.to, color) {
                            return true;
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        color.insert(node, Color::Black);
        false
    }
}

impl<N: Eq + Hash + Clone> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}
