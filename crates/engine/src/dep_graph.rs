//! Dependency graph for formula cells.
//!
//! Tracks precedents (cells a formula reads) and dependents (cells that read
//! a given cell) so that a write can recompute exactly the cells it affects.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! "What must be recomputed if X changes?" is then a walk along outgoing edges.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;

/// Evaluation order produced by [`DepGraph::recalc_order`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecalcOrder {
    pub order: Vec<(CellId, usize)>,
    /// Cells on a cycle (and anything downstream of one). Empty while the
    /// graph is acyclic.
    pub stuck: Vec<CellId>,
}

/// Persistent dependency graph for formula cells.
///
/// - `preds[B]` = cells that B depends on (precedents)
/// - `succs[A]` = cells that depend on A (dependents)
///
/// # Invariants
///
/// 1. If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. Empty sets are removed, not stored.
/// 3. `replace_edges` is the only mutator that touches both maps.
/// 4. The graph is acyclic. Callers check `would_create_cycle` before
///    `replace_edges`.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    preds: FxHashMap<CellId, FxHashSet<CellId>>,
    succs: FxHashMap<CellId, FxHashSet<CellId>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells this formula cell reads.
    pub fn precedents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.preds
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Cells whose formulas read this cell.
    pub fn dependents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.succs
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn is_formula_cell(&self, cell: CellId) -> bool {
        self.preds.contains_key(&cell)
    }

    pub fn formula_cell_count(&self) -> usize {
        self.preds.len()
    }

    pub fn referenced_cell_count(&self) -> usize {
        self.succs.len()
    }

    /// Replace all edges for a formula cell atomically.
    ///
    /// Pass an empty set to clear all edges for this cell.
    pub fn replace_edges(&mut self, formula_cell: CellId, new_preds: FxHashSet<CellId>) {
        if let Some(old_preds) = self.preds.remove(&formula_cell) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(&formula_cell);
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        if new_preds.is_empty() {
            return;
        }

        for pred in &new_preds {
            self.succs.entry(*pred).or_default().insert(formula_cell);
        }
        self.preds.insert(formula_cell, new_preds);
    }

    pub fn clear_cell(&mut self, cell: CellId) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Check if giving `cell` the precedents `new_preds` would close a loop.
    ///
    /// Returns the precedent through which the loop closes. A loop exists when
    /// `cell` already reaches one of `new_preds` by following dependent edges
    /// (or `cell` lists itself).
    pub fn would_create_cycle(&self, cell: CellId, new_preds: &FxHashSet<CellId>) -> Option<CellId> {
        if new_preds.contains(&cell) {
            return Some(cell);
        }

        let mut visited = FxHashSet::default();
        let mut stack = vec![cell];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for dep in self.dependents(current) {
                if new_preds.contains(&dep) {
                    return Some(dep);
                }
                stack.push(dep);
            }
        }

        None
    }

    /// `roots` and their transitive dependents in evaluation order, each with
    /// its depth: 0 for a root, otherwise one more than its deepest
    /// precedent within the set.
    ///
    /// Kahn's algorithm restricted to the affected subgraph. Ties are broken
    /// by (sheet, row, col) so the order is deterministic. Cells caught in a
    /// cycle cannot be ordered and are returned in `stuck`.
    pub fn recalc_order(&self, roots: &[CellId]) -> RecalcOrder {
        let mut affected: FxHashSet<CellId> = roots.iter().copied().collect();
        let mut stack: Vec<CellId> = roots.to_vec();
        while let Some(current) = stack.pop() {
            for dep in self.dependents(current) {
                if affected.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        // In-degree counts only edges that come from inside the affected set
        let mut in_degree: FxHashMap<CellId, usize> = affected
            .iter()
            .map(|&cell| {
                let count = self.precedents(cell).filter(|p| affected.contains(p)).count();
                (cell, count)
            })
            .collect();

        let mut depth: FxHashMap<CellId, usize> = FxHashMap::default();
        // Min-heap on (sheet, row, col)
        let mut ready: BinaryHeap<Reverse<CellId>> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| Reverse(cell))
            .collect();

        let mut order = Vec::with_capacity(affected.len());
        while let Some(Reverse(cell)) = ready.pop() {
            let d = self
                .precedents(cell)
                .filter_map(|p| depth.get(&p))
                .max()
                .map_or(0, |d| d + 1);
            depth.insert(cell, d);
            order.push((cell, d));

            for dep in self.dependents(cell) {
                if let Some(deg) = in_degree.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push(Reverse(dep));
                    }
                }
            }
        }

        let mut stuck: Vec<CellId> = affected.into_iter().filter(|c| !depth.contains_key(c)).collect();
        stuck.sort_by_key(CellId::sort_key);

        RecalcOrder { order, stuck }
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (formula_cell, preds) in &self.preds {
            assert!(!preds.is_empty(), "empty preds set stored for {:?}", formula_cell);
            for pred in preds {
                assert!(
                    self.succs.get(pred).is_some_and(|s| s.contains(formula_cell)),
                    "missing succ edge: {:?} should have {:?} in dependents",
                    pred,
                    formula_cell
                );
            }
        }
        for (cell, dependents) in &self.succs {
            assert!(!dependents.is_empty(), "empty succs set stored for {:?}", cell);
            for dep in dependents {
                assert!(
                    self.preds.get(dep).is_some_and(|s| s.contains(cell)),
                    "missing pred edge: {:?} should have {:?} in precedents",
                    dep,
                    cell
                );
            }
        }
    }
}
