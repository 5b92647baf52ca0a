//! Best-first beam search over the committed graph.

use crate::store::GraphView;
use anndists::prelude::Distance;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Candidate for search/frontier queues, ordered by (distance, id).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub(crate) dist: f32,
    pub(crate) id: u32,
}
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Outcome of one beam search.
#[derive(Clone, Debug, Default)]
pub struct BeamResult {
    /// The best `beam_width` points found, ascending by (distance, id).
    pub frontier: Vec<(u32, f32)>,
    /// Every expanded point, in expansion order, with its distance to the query.
    pub visited: Vec<(u32, f32)>,
    /// Number of distance evaluations performed.
    pub dist_cmps: usize,
}

/// Greedy beam search from `start` toward `query`, read-only on `view`.
///
/// Keeps a working set of at most `beam_width` points and stops once the best
/// unexpanded candidate cannot improve the worst member of a full working set.
pub fn beam_search<D: Distance<f32> + Copy>(
    query: &[f32],
    view: GraphView<'_>,
    start: u32,
    beam_width: usize,
    dist: D,
) -> BeamResult {
    let mut seen = HashSet::new();
    let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new(); // min-heap
    let mut w: BinaryHeap<Candidate> = BinaryHeap::new(); // max-heap, working set
    let mut visited = Vec::new();

    let start = Candidate {
        dist: dist.eval(query, view.point(start)),
        id: start,
    };
    let mut dist_cmps = 1;
    frontier.push(Reverse(start));
    w.push(start);
    seen.insert(start.id);

    while let Some(Reverse(current)) = frontier.pop() {
        if w.len() >= beam_width {
            if let Some(worst) = w.peek() {
                if current.dist >= worst.dist {
                    break;
                }
            }
        }
        visited.push((current.id, current.dist));

        for &nb in view.neighbors(current.id) {
            if !seen.insert(nb) {
                continue;
            }
            let cand = Candidate {
                dist: dist.eval(query, view.point(nb)),
                id: nb,
            };
            dist_cmps += 1;

            if w.len() < beam_width {
                w.push(cand);
                frontier.push(Reverse(cand));
            } else if w.peek().map_or(false, |worst| cand < *worst) {
                w.pop();
                w.push(cand);
                frontier.push(Reverse(cand));
            }
        }
    }

    BeamResult {
        frontier: w
            .into_sorted_vec()
            .into_iter()
            .map(|c| (c.id, c.dist))
            .collect(),
        visited,
        dist_cmps,
    }
}
