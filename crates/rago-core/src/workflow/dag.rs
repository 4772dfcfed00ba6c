//! Generic directed-acyclic-graph primitives backing the Workflow Engine:
//! nodes keyed by id, edges fail on unknown endpoints, cycle detection via
//! DFS with a recursion stack, and level-plan computation over HashMap
//! adjacency lists (Kahn's-algorithm-equivalent layering).

use std::collections::{HashMap, HashSet};

use crate::error::{RagoError, Result};

/// A directed acyclic graph of string-keyed nodes carrying an arbitrary
/// payload, with forward and reverse adjacency tracked explicitly.
#[derive(Debug, Clone)]
pub struct Dag<T> {
    nodes: HashMap<String, T>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl<T> Dag<T> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Adds a node, replacing any existing payload under the same id
    /// (idempotent: re-adding the same id is not an error).
    pub fn add_node(&mut self, id: impl Into<String>, payload: T) {
        let id = id.into();
        if !self.nodes.contains_key(&id) {
            self.order.push(id.clone());
            self.children.entry(id.clone()).or_default();
            self.parents.entry(id.clone()).or_default();
        }
        self.nodes.insert(id, payload);
    }

    /// Adds a directed edge `from -> to`. Fails with `InvalidWorkflow` if
    /// either endpoint is absent.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.nodes.contains_key(from) {
            return Err(RagoError::InvalidWorkflow(format!("unknown node '{from}'")));
        }
        if !self.nodes.contains_key(to) {
            return Err(RagoError::InvalidWorkflow(format!("unknown node '{to}'")));
        }
        self.children.get_mut(from).unwrap().push(to.to_string());
        self.parents.get_mut(to).unwrap().push(from.to_string());
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Detects a cycle via depth-first search with an explicit recursion
    /// stack; equivalent to "topological sort fails" but cheaper to answer
    /// as a plain boolean.
    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }
        let mut marks: HashMap<String, Mark> = self
            .order
            .iter()
            .map(|id| (id.clone(), Mark::Unvisited))
            .collect();

        fn dfs(
            id: &str,
            children: &HashMap<String, Vec<String>>,
            marks: &mut HashMap<String, Mark>,
        ) -> bool {
            match marks.get(id).copied() {
                Some(Mark::InStack) => return true,
                Some(Mark::Done) => return false,
                _ => {}
            }
            marks.insert(id.to_string(), Mark::InStack);
            if let Some(kids) = children.get(id) {
                for child in kids.clone() {
                    if dfs(&child, children, marks) {
                        return true;
                    }
                }
            }
            marks.insert(id.to_string(), Mark::Done);
            false
        }

        for id in self.order.clone() {
            if matches!(marks.get(id.as_str()), Some(Mark::Unvisited) | None) {
                if dfs(&id, &self.children, &mut marks) {
                    return true;
                }
            }
        }
        false
    }

    /// Topologically sorts node ids via Kahn's algorithm. Doubles as cycle
    /// detection: a result shorter than the node count means a cycle exists.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.parents(id).len()))
            .collect();
        let mut queue: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.parents(id).is_empty())
            .cloned()
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        let mut cursor = 0;
        while cursor < queue.len() {
            let id = queue[cursor].clone();
            cursor += 1;
            sorted.push(id.clone());
            for child in self.children(&id) {
                let degree = in_degree.get_mut(child.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push(child.clone());
                }
            }
        }

        if sorted.len() != self.order.len() {
            return Err(RagoError::InvalidWorkflow(
                "cycle detected in workflow graph".to_string(),
            ));
        }
        Ok(sorted)
    }

    /// Partitions nodes into levels such that every edge runs from an
    /// earlier level to a later one; each level's nodes may run in
    /// parallel. A node's level equals the longest path from any root.
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>> {
        // Validates acyclicity first so a malformed graph never loops here.
        self.topological_sort()?;

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut remaining: HashSet<String> = self.order.iter().cloned().collect();

        while !remaining.is_empty() {
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|id| self.parents(id).iter().all(|p| completed.contains(p)))
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }
            ready.sort();
            for id in &ready {
                remaining.remove(id);
                completed.insert(id.clone());
            }
            levels.push(ready);
        }
        Ok(levels)
    }
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_dag() -> Dag<()> {
        let mut dag = Dag::new();
        for id in ["a", "b", "c", "d"] {
            dag.add_node(id, ());
        }
        dag.add_edge("a", "b").unwrap();
        dag.add_edge("a", "c").unwrap();
        dag.add_edge("b", "d").unwrap();
        dag.add_edge("c", "d").unwrap();
        dag
    }

    #[test]
    fn adding_duplicate_node_is_idempotent() {
        let mut dag = Dag::new();
        dag.add_node("a", 1);
        dag.add_node("a", 2);
        assert_eq!(dag.len(), 1);
        assert_eq!(*dag.node("a").unwrap(), 2);
    }

    #[test]
    fn edge_to_unknown_node_fails() {
        let mut dag = Dag::new();
        dag.add_node("a", ());
        let err = dag.add_edge("a", "missing").unwrap_err();
        assert!(matches!(err, RagoError::InvalidWorkflow(_)));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let dag = linear_dag();
        let order = dag.topological_sort().unwrap();
        let pos = |s: &str| order.iter().position(|x| x == s).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn execution_levels_group_parallel_steps() {
        let dag = linear_dag();
        let levels = dag.execution_levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a".to_string()]);
        let mut middle = levels[1].clone();
        middle.sort();
        assert_eq!(middle, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(levels[2], vec!["d".to_string()]);
    }

    #[test]
    fn cycle_is_detected() {
        let mut dag = Dag::new();
        dag.add_node("a", ());
        dag.add_node("b", ());
        dag.add_edge("a", "b").unwrap();
        dag.add_edge("b", "a").unwrap();
        assert!(dag.has_cycle());
        assert!(dag.topological_sort().is_err());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut dag = Dag::new();
        dag.add_node("a", ());
        dag.add_edge("a", "a").unwrap();
        assert!(dag.has_cycle());
    }
}
