//! # Point Store
//!
//! Index-addressed arena holding every point of the index:
//!
//! ```text
//! coords     [ p0 (dim f32) | p1 (dim f32) | ... ]      read-only after load
//! neighbors  [ Vec<u32>, Vec<u32>, ... ]                committed out-neighbors
//! staged     [ Option<Vec<u32>>, ... ]                  per-round write buffer
//! ```
//!
//! Neighbor lists only ever hold integer ids. Builders never write `neighbors`
//! directly during a round: staging closures receive a [`GraphView`] over the
//! committed lists and return the new list for their *own* slot, and
//! [`PointStore::commit`] publishes every staged slot at the round barrier.
//! Readers inside a round therefore always see the graph as of round start.

use crate::ProxGraphError;
use rayon::prelude::*;
use std::collections::HashSet;
use std::ops::Range;

/// Points with fixed coordinates plus committed and staged neighbor lists.
#[derive(Clone, Debug)]
pub struct PointStore {
    dim: usize,
    coords: Vec<f32>,
    neighbors: Vec<Vec<u32>>,
    staged: Vec<Option<Vec<u32>>>,
}

/// Read-only handle over coordinates and committed neighbor lists.
#[derive(Clone, Copy, Debug)]
pub struct GraphView<'a> {
    dim: usize,
    coords: &'a [f32],
    neighbors: &'a [Vec<u32>],
}

impl PointStore {
    /// Copies `vectors` into a flat arena. Ids are positions in `vectors`.
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self, ProxGraphError> {
        if vectors.is_empty() {
            return Err(ProxGraphError::EmptyInput);
        }
        if vectors.len() > u32::MAX as usize {
            return Err(ProxGraphError::Config(format!(
                "{} points exceed the u32 id space",
                vectors.len()
            )));
        }

        let dim = vectors[0].len();
        if dim == 0 {
            return Err(ProxGraphError::Config(
                "points must have at least one coordinate".to_string(),
            ));
        }

        let mut coords = Vec::with_capacity(vectors.len() * dim);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(ProxGraphError::Dimension {
                    index: i,
                    found: v.len(),
                    expected: dim,
                });
            }
            coords.extend_from_slice(v);
        }

        let n = vectors.len();
        Ok(Self {
            dim,
            coords,
            neighbors: vec![Vec::new(); n],
            staged: vec![None; n],
        })
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// All point ids in stable order.
    pub fn ids(&self) -> Range<u32> {
        0..self.len() as u32
    }

    /// Coordinates of point `id`.
    pub fn point(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.coords[start..start + self.dim]
    }

    /// Committed out-neighbors of `id`.
    pub fn neighbors(&self, id: u32) -> &[u32] {
        &self.neighbors[id as usize]
    }

    /// Replaces the committed out-neighbors of `id` outside of any round.
    pub fn set_neighbors(&mut self, id: u32, list: Vec<u32>) {
        self.neighbors[id as usize] = list;
    }

    /// Staged (not yet committed) list of `id`, if any.
    pub fn staged(&self, id: u32) -> Option<&[u32]> {
        self.staged[id as usize].as_deref()
    }

    /// Stages a list for `id`; it becomes visible at the next [`commit`](Self::commit).
    pub fn set_staged(&mut self, id: u32, list: Vec<u32>) {
        self.staged[id as usize] = Some(list);
    }

    pub fn view(&self) -> GraphView<'_> {
        GraphView {
            dim: self.dim,
            coords: &self.coords,
            neighbors: &self.neighbors,
        }
    }

    /// Empties every committed and staged list.
    pub fn clear_neighbors(&mut self) {
        self.neighbors.par_iter_mut().for_each(Vec::clear);
        self.staged.par_iter_mut().for_each(|slot| *slot = None);
    }

    /// Stages `f(id, view)` for every id in `range`, in parallel.
    ///
    /// Each task owns exactly its own staged slot; `view` only exposes the
    /// committed lists, so tasks cannot observe each other's output.
    pub fn stage_range<F>(&mut self, range: Range<usize>, f: F)
    where
        F: Fn(u32, GraphView<'_>) -> Vec<u32> + Sync,
    {
        let view = GraphView {
            dim: self.dim,
            coords: &self.coords,
            neighbors: &self.neighbors,
        };
        let start = range.start;
        self.staged[range]
            .par_iter_mut()
            .enumerate()
            .for_each(|(offset, slot)| {
                *slot = Some(f((start + offset) as u32, view));
            });
    }

    /// Like [`stage_range`](Self::stage_range) over all points, but `f` may
    /// decline to stage a point by returning `None`.
    pub fn stage_where<F>(&mut self, f: F)
    where
        F: Fn(u32, GraphView<'_>) -> Option<Vec<u32>> + Sync,
    {
        let view = GraphView {
            dim: self.dim,
            coords: &self.coords,
            neighbors: &self.neighbors,
        };
        self.staged
            .par_iter_mut()
            .enumerate()
            .for_each(|(id, slot)| {
                if let Some(list) = f(id as u32, view) {
                    *slot = Some(list);
                }
            });
    }

    /// Stages one precomputed list per point.
    pub fn stage_lists(&mut self, lists: Vec<Vec<u32>>) {
        assert_eq!(
            lists.len(),
            self.len(),
            "staged {} lists for {} points",
            lists.len(),
            self.len()
        );
        self.staged
            .par_iter_mut()
            .zip(lists.into_par_iter())
            .for_each(|(slot, list)| *slot = Some(list));
    }

    /// Round barrier: publishes every staged slot into the committed lists.
    /// Returns the number of lists replaced.
    pub fn commit(&mut self) -> usize {
        self.neighbors
            .par_iter_mut()
            .zip(self.staged.par_iter_mut())
            .map(|(committed, slot)| match slot.take() {
                Some(list) => {
                    *committed = list;
                    1
                }
                None => 0,
            })
            .sum()
    }
}

impl<'a> GraphView<'a> {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn point(&self, id: u32) -> &'a [f32] {
        let start = id as usize * self.dim;
        &self.coords[start..start + self.dim]
    }

    pub fn neighbors(&self, id: u32) -> &'a [u32] {
        &self.neighbors[id as usize]
    }

    /// Average and maximum out-degree.
    pub fn degree_summary(&self) -> (f64, usize) {
        if self.neighbors.is_empty() {
            return (0.0, 0);
        }
        let (total, max) = self
            .neighbors
            .par_iter()
            .map(|l| (l.len(), l.len()))
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1.max(b.1)));
        (total as f64 / self.neighbors.len() as f64, max)
    }

    /// Checks degree bound, self-loops, duplicates and id range on every list.
    pub fn check_invariants(&self, max_degree: usize) -> Result<(), ProxGraphError> {
        let n = self.neighbors.len();
        let violation = self
            .neighbors
            .par_iter()
            .enumerate()
            .find_map_first(|(id, list)| {
                if list.len() > max_degree {
                    return Some(format!(
                        "point {} has {} neighbors, bound is {}",
                        id,
                        list.len(),
                        max_degree
                    ));
                }
                let mut seen = HashSet::with_capacity(list.len());
                for &nb in list {
                    if nb as usize == id {
                        return Some(format!("point {} lists itself", id));
                    }
                    if nb as usize >= n {
                        return Some(format!("point {} lists unknown id {}", id, nb));
                    }
                    if !seen.insert(nb) {
                        return Some(format!("point {} lists {} twice", id, nb));
                    }
                }
                None
            });

        match violation {
            Some(msg) => Err(ProxGraphError::Invariant(msg)),
            None => Ok(()),
        }
    }
}
