//! Approximate medoid: the point closest to the coordinate-wise centroid.
//!
//! Both reductions are pure recursive functions over id ranges. The two halves
//! of a range are forked with `rayon::join` only above [`PAR_THRESHOLD`]
//! points; smaller ranges run as a plain sequential loop.

use crate::store::GraphView;
use anndists::prelude::Distance;
use std::ops::Range;

/// Ranges at or below this size are reduced sequentially.
pub const PAR_THRESHOLD: usize = 1000;

/// Mean of all points in `view`.
pub fn centroid(view: GraphView<'_>) -> Vec<f32> {
    let n = view.len();
    let mut sum = coordinate_sum(view, 0..n);
    if n > 0 {
        for v in &mut sum {
            *v /= n as f32;
        }
    }
    sum
}

/// Id of the point nearest to the centroid under `dist`; ties go to the lower id.
pub fn find_medoid<D: Distance<f32> + Copy + Sync>(view: GraphView<'_>, dist: D) -> u32 {
    let c = centroid(view);
    nearest_to(view, &c, 0..view.len(), dist).0
}

fn coordinate_sum(view: GraphView<'_>, range: Range<usize>) -> Vec<f32> {
    if range.len() <= PAR_THRESHOLD {
        let mut sum = vec![0.0f32; view.dim()];
        for id in range {
            for (s, &x) in sum.iter_mut().zip(view.point(id as u32)) {
                *s += x;
            }
        }
        return sum;
    }

    let mid = range.start + range.len() / 2;
    let (mut left, right) = rayon::join(
        || coordinate_sum(view, range.start..mid),
        || coordinate_sum(view, mid..range.end),
    );
    for (l, r) in left.iter_mut().zip(&right) {
        *l += r;
    }
    left
}

fn nearest_to<D: Distance<f32> + Copy + Sync>(
    view: GraphView<'_>,
    target: &[f32],
    range: Range<usize>,
    dist: D,
) -> (u32, f32) {
    if range.len() <= PAR_THRESHOLD {
        return range
            .map(|id| (id as u32, dist.eval(target, view.point(id as u32))))
            .fold((u32::MAX, f32::INFINITY), closer);
    }

    let mid = range.start + range.len() / 2;
    let (left, right) = rayon::join(
        || nearest_to(view, target, range.start..mid, dist),
        || nearest_to(view, target, mid..range.end, dist),
    );
    closer(left, right)
}

#[inline]
fn closer(a: (u32, f32), b: (u32, f32)) -> (u32, f32) {
    if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) {
        b
    } else {
        a
    }
}
