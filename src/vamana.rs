//! # Greedy-insertion (Vamana) builder
//!
//! Simulates incremental insertion in geometrically growing batches:
//!
//! ```text
//! batch 0: [0, 1)   batch 1: [1, 3)   batch 2: [3, 7)   ...   last: [2^r - 1, n)
//! ```
//!
//! Every point of a batch searches the committed graph from the medoid and
//! α-prunes the visited set into its staged list (never straight into the
//! committed one, so the other searches of the batch see a stable graph).
//! After the batch barrier the staged lists are committed, every new edge
//! `i -> j` is proposed back as `j -> i`, proposals are grouped by target,
//! and each target either appends them (if it stays within `max_degree`) or
//! re-prunes with `round2_alpha`.

use crate::beam::beam_search;
use crate::group::group_by_target;
use crate::medoid::find_medoid;
use crate::prune::robust_prune;
use crate::stats::BuildStats;
use crate::store::PointStore;
use crate::{point_rng, BuildOutput, ProxGraphError};
use anndists::prelude::Distance;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, info};

/// Defaults for Vamana builds
pub const VAMANA_DEFAULT_MAX_DEGREE: usize = 32;
pub const VAMANA_DEFAULT_BEAM_WIDTH: usize = 64;
pub const VAMANA_DEFAULT_ALPHA: f32 = 1.0;
pub const VAMANA_DEFAULT_ROUND2_ALPHA: f32 = 1.2;

/// Knobs for the greedy-insertion builder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VamanaParams {
    /// Maximum out-degree of every point.
    pub max_degree: usize,
    /// Beam width used by the construction searches.
    pub beam_width: usize,
    /// Pruning factor of the per-point pass (1.0 = plain nearest neighbors).
    pub alpha: f32,
    /// Pruning factor used when reverse edges overflow a list.
    pub round2_alpha: f32,
    /// Seed every point with `max_degree` random neighbors before the first batch.
    /// Disable when the graph should start empty.
    pub random_init: bool,
    pub seed: u64,
}

impl Default for VamanaParams {
    fn default() -> Self {
        Self {
            max_degree: VAMANA_DEFAULT_MAX_DEGREE,
            beam_width: VAMANA_DEFAULT_BEAM_WIDTH,
            alpha: VAMANA_DEFAULT_ALPHA,
            round2_alpha: VAMANA_DEFAULT_ROUND2_ALPHA,
            random_init: true,
            seed: 0x5eed,
        }
    }
}

impl VamanaParams {
    pub fn validate(&self) -> Result<(), ProxGraphError> {
        if self.max_degree == 0 {
            return Err(ProxGraphError::Config("max_degree must be > 0".to_string()));
        }
        if self.beam_width == 0 {
            return Err(ProxGraphError::Config("beam_width must be > 0".to_string()));
        }
        if !(self.alpha >= 1.0) {
            return Err(ProxGraphError::Config(format!(
                "alpha must be >= 1, got {}",
                self.alpha
            )));
        }
        if !(self.round2_alpha >= 1.0) {
            return Err(ProxGraphError::Config(format!(
                "round2_alpha must be >= 1, got {}",
                self.round2_alpha
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "R={}, L={}, alpha={}, round2_alpha={}",
            self.max_degree, self.beam_width, self.alpha, self.round2_alpha
        )
    }
}

/// Batch bounds `[2^inc - 1, min(2^(inc+1) - 1, n))`, tiling `[0, n)`.
pub fn insertion_batches(n: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut inc = 0u32;
    loop {
        let floor = (1usize << inc) - 1;
        if floor >= n {
            break;
        }
        let ceiling = ((1usize << (inc + 1)) - 1).min(n);
        batches.push(floor..ceiling);
        inc += 1;
    }
    batches
}

/// Builds a Vamana graph over a [`PointStore`].
pub struct VamanaBuilder<D> {
    params: VamanaParams,
    dist: D,
}

impl<D> VamanaBuilder<D>
where
    D: Distance<f32> + Send + Sync + Copy,
{
    pub fn new(params: VamanaParams, dist: D) -> Result<Self, ProxGraphError> {
        params.validate()?;
        Ok(Self { params, dist })
    }

    pub fn params(&self) -> &VamanaParams {
        &self.params
    }

    /// Runs the whole build. Any previous neighbor lists in `store` are discarded.
    pub fn build(&self, store: &mut PointStore) -> Result<BuildOutput, ProxGraphError> {
        if store.is_empty() {
            return Err(ProxGraphError::EmptyInput);
        }
        let started = Instant::now();
        let n = store.len();
        let p = &self.params;
        info!(
            points = n,
            max_degree = p.max_degree,
            beam_width = p.beam_width,
            alpha = p.alpha,
            round2_alpha = p.round2_alpha,
            "vamana build started"
        );

        store.clear_neighbors();
        if p.random_init {
            self.random_init(store);
        }
        let medoid = find_medoid(store.view(), self.dist);
        debug!(medoid, "medoid selected");

        let batches = insertion_batches(n);
        for (round, batch) in batches.iter().enumerate() {
            let reverse_edges = self.insert_batch(store, medoid, batch.clone());
            debug!(
                round,
                floor = batch.start,
                ceiling = batch.end,
                reverse_edges,
                "vamana batch committed"
            );
        }

        let stats = BuildStats::summarize(
            "Vamana",
            p.describe(),
            store.view(),
            batches.len(),
            true,
            Vec::new(),
            started.elapsed(),
        );
        info!(
            rounds = stats.rounds,
            avg_degree = stats.avg_degree,
            elapsed_ms = stats.build_time.as_millis() as u64,
            "vamana build finished"
        );
        Ok(BuildOutput { medoid, stats })
    }

    /// Gives every point `min(max_degree, n - 1)` distinct random non-self neighbors.
    fn random_init(&self, store: &mut PointStore) {
        let n = store.len();
        let degree = self.params.max_degree.min(n - 1);
        let seed = self.params.seed;
        store.stage_range(0..n, |id, _| {
            let mut rng = point_rng(seed, id as u64);
            let mut picked: Vec<u32> = rand::seq::index::sample(&mut rng, n, (degree + 1).min(n))
                .into_iter()
                .map(|j| j as u32)
                .filter(|&j| j != id)
                .collect();
            picked.truncate(degree);
            picked.sort_unstable();
            picked
        });
        store.commit();
    }

    /// Inserts one batch and symmetrizes its new edges. Returns the number of
    /// reverse-edge proposals.
    fn insert_batch(&self, store: &mut PointStore, medoid: u32, batch: Range<usize>) -> usize {
        let VamanaParams {
            max_degree,
            beam_width,
            alpha,
            ..
        } = self.params;
        let dist = self.dist;

        // search + prune against the graph as of batch start
        store.stage_range(batch.clone(), |id, view| {
            let found = beam_search(view.point(id), view, medoid, beam_width, dist);
            robust_prune(
                id,
                found.visited.iter().map(|&(v, _)| v),
                view,
                max_degree,
                alpha,
                dist,
            )
        });
        store.commit();

        self.add_reverse_edges(store, batch)
    }

    /// Proposes every committed edge `i -> j` of `batch` back as `j -> i`.
    /// A target that would overflow `max_degree` re-prunes the offered
    /// sources with `round2_alpha`. Returns the number of proposals.
    fn add_reverse_edges(&self, store: &mut PointStore, batch: Range<usize>) -> usize {
        let VamanaParams {
            max_degree,
            round2_alpha,
            ..
        } = self.params;
        let dist = self.dist;

        // proposals (target, source), grouped over the whole batch
        let view = store.view();
        let proposals: Vec<(u32, u32)> = batch
            .into_par_iter()
            .flat_map_iter(|i| {
                let src = i as u32;
                view.neighbors(src).iter().map(move |&nb| (nb, src))
            })
            .collect();
        let incoming = group_by_target(store.len(), proposals);

        store.stage_where(|id, view| {
            let offered = incoming.get(id);
            if offered.is_empty() {
                return None;
            }
            let current = view.neighbors(id);
            let mut fresh: Vec<u32> = offered
                .iter()
                .copied()
                .filter(|&src| src != id && !current.contains(&src))
                .collect();
            fresh.sort_unstable();
            fresh.dedup();
            if fresh.is_empty() {
                return None;
            }

            if current.len() + fresh.len() <= max_degree {
                let mut list = current.to_vec();
                list.extend(fresh);
                Some(list)
            } else {
                Some(robust_prune(id, fresh, view, max_degree, round2_alpha, dist))
            }
        });
        store.commit();

        incoming.total()
    }
}
