//! # Occlusion pruning
//!
//! [`robust_prune`] is the α-pruning rule from DiskANN/Vamana shared by both
//! builders: walk candidates from nearest to farthest, keep the nearest
//! remaining one `p*`, and drop every remaining `p'` with
//! `α · d(p*, p') <= d(p, p')` since `p*` already reaches it.
//!
//! [`single_pass_prune`] is the one-scan variant used by the descent builder's
//! final pass: no working-set removal, just an accept/reject test per candidate
//! against the neighbors accepted so far.

use crate::by_dist_then_id;
use crate::store::GraphView;
use anndists::prelude::Distance;

/// Prunes `candidates` plus `anchor`'s committed neighbors down to at most
/// `max_degree` ids, nearest first.
///
/// `anchor` itself is ignored if offered. Ordering is by (distance, id), so
/// equidistant candidates resolve to the lower id and the output is
/// deterministic for a given input.
pub fn robust_prune<D, I>(
    anchor: u32,
    candidates: I,
    view: GraphView<'_>,
    max_degree: usize,
    alpha: f32,
    dist: D,
) -> Vec<u32>
where
    D: Distance<f32> + Copy,
    I: IntoIterator<Item = u32>,
{
    let p = view.point(anchor);

    let mut ids: Vec<u32> = candidates
        .into_iter()
        .chain(view.neighbors(anchor).iter().copied())
        .filter(|&id| id != anchor)
        .collect();
    ids.sort_unstable();
    ids.dedup();

    // farthest first, so the nearest remaining candidate is always at the back
    let mut pool: Vec<(u32, f32)> = ids
        .into_iter()
        .map(|id| (id, dist.eval(p, view.point(id))))
        .collect();
    pool.sort_by(|a, b| by_dist_then_id(b, a));

    let mut pruned = Vec::with_capacity(max_degree.min(pool.len()));
    while pruned.len() < max_degree {
        let Some((star, _)) = pool.pop() else {
            break;
        };
        pruned.push(star);

        let star_vec = view.point(star);
        pool.retain(|&(id, d_anchor)| alpha * dist.eval(star_vec, view.point(id)) > d_anchor);
    }

    pruned
}

/// Single greedy scan over `sorted` (ascending by distance to `anchor`).
///
/// A candidate `c` at distance `d(p, c)` is accepted iff, for every already
/// accepted `a`, `d(p, c) <= α · d(c, a)`. The first candidate is always
/// accepted; the scan stops at `max_degree` accepted ids.
pub fn single_pass_prune<D: Distance<f32> + Copy>(
    anchor: u32,
    sorted: &[(u32, f32)],
    view: GraphView<'_>,
    max_degree: usize,
    alpha: f32,
    dist: D,
) -> Vec<u32> {
    let mut accepted: Vec<u32> = Vec::with_capacity(max_degree.min(sorted.len()));
    for &(cand, d_anchor) in sorted {
        if accepted.len() == max_degree {
            break;
        }
        if cand == anchor || accepted.contains(&cand) {
            continue;
        }
        let c = view.point(cand);
        if accepted
            .iter()
            .all(|&a| d_anchor <= alpha * dist.eval(c, view.point(a)))
        {
            accepted.push(cand);
        }
    }
    accepted
}
