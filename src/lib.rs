//! # ProxGraph (generic over `anndists::Distance<f32>`)
//!
//! An in-memory proximity-graph library for approximate nearest-neighbor search that:
//! - Builds a degree-bounded graph with either of two parallel builders:
//!   - **Vamana** (greedy insertion in doubling batches + α-pruning)
//!   - **NN-Descent** (clustering-seeded local joins + one final pruning pass)
//! - Answers batch k-NN queries with a best-first beam search from the medoid
//! - Is **generic over any `Distance<f32>`** from `anndists`, with built-in
//!   squared-L2 and maximum-inner-product metrics
//!
//! ## Example
//! ```no_run
//! use proxgraph_rs::{ProxGraph, SquaredL2, VamanaParams, DescentParams};
//!
//! let vectors: Vec<Vec<f32>> = (0..1000).map(|i| vec![i as f32; 16]).collect();
//!
//! // Vamana with default params
//! let graph = ProxGraph::build_vamana_default(&vectors, SquaredL2).unwrap();
//! let nearest = graph.search(&vectors[7], 10, 64).unwrap();
//!
//! // NN-Descent with a smaller working list
//! let graph2 = ProxGraph::build_descent(
//!     &vectors,
//!     SquaredL2,
//!     DescentParams { k: 20, max_degree: 24, ..Default::default() },
//! ).unwrap();
//! println!("{}", graph2.stats());
//!
//! // Query with points already in the graph (never returns the point itself)
//! let answers = graph2.search_points(&[0, 1, 2], 10, 64).unwrap();
//! ```
//!
//! ## Construction rounds
//! Both builders mutate neighbor lists only through the [`PointStore`] staging
//! buffer: every task of a round writes its own point's staged slot while
//! reading the committed lists, and [`PointStore::commit`] publishes all slots
//! at the round barrier.

pub mod beam;
pub mod cluster;
pub mod descent;
pub mod group;
pub mod medoid;
pub mod metric;
pub mod prune;
pub mod query;
pub mod stats;
pub mod store;
pub mod vamana;

pub use beam::{beam_search, BeamResult};
pub use cluster::{ClusterTreeSeeder, SeedGenerator};
pub use descent::{bounded_union, DescentBuilder, DescentParams};
pub use medoid::{centroid, find_medoid};
pub use metric::{Metric, Mips, SquaredL2};
pub use prune::{robust_prune, single_pass_prune};
pub use query::{QueryOutput, QueryParams};
pub use stats::{BuildStats, QueryStats};
pub use store::{GraphView, PointStore};
pub use vamana::{VamanaBuilder, VamanaParams};

use anndists::prelude::Distance;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use thiserror::Error;

/// Custom error type for ProxGraph operations
#[derive(Debug, Error)]
pub enum ProxGraphError {
    /// Invalid parameter or parameter relationship
    #[error("Configuration error: {0}")]
    Config(String),

    /// A point or query whose length differs from the store dimension
    #[error("Vector {index} has dimension {found} but expected {expected}")]
    Dimension {
        index: usize,
        found: usize,
        expected: usize,
    },

    #[error("No points provided")]
    EmptyInput,

    /// A built graph breaking the degree bound, or listing itself, a duplicate or an unknown id
    #[error("Graph invariant violated: {0}")]
    Invariant(String),
}

/// What a builder hands back besides the neighbor lists it committed.
#[derive(Clone, Debug)]
pub struct BuildOutput {
    pub medoid: u32,
    pub stats: BuildStats,
}

/// Ascending by distance, then by id.
#[inline]
pub(crate) fn by_dist_then_id(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Independent, reproducible generator per (seed, salt) pair.
pub(crate) fn point_rng(seed: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// A built graph together with its points, metric and entry point.
pub struct ProxGraph<D>
where
    D: Distance<f32> + Send + Sync + Copy + 'static,
{
    store: PointStore,
    dist: D,
    medoid: u32,
    max_degree: usize,
    stats: BuildStats,
}

// constructors

impl<D> ProxGraph<D>
where
    D: Distance<f32> + Send + Sync + Copy + 'static,
{
    /// Vamana with default params: (R=32, L=64, alpha=1.0, round2_alpha=1.2).
    pub fn build_vamana_default(vectors: &[Vec<f32>], dist: D) -> Result<Self, ProxGraphError> {
        Self::build_vamana(vectors, dist, VamanaParams::default())
    }

    pub fn build_vamana(
        vectors: &[Vec<f32>],
        dist: D,
        params: VamanaParams,
    ) -> Result<Self, ProxGraphError> {
        let builder = VamanaBuilder::new(params, dist)?;
        let mut store = PointStore::from_vectors(vectors)?;
        let out = builder.build(&mut store)?;
        Ok(Self::assemble(store, dist, out, params.max_degree))
    }

    /// NN-Descent seeded by the cluster trees the params describe.
    pub fn build_descent(
        vectors: &[Vec<f32>],
        dist: D,
        params: DescentParams,
    ) -> Result<Self, ProxGraphError> {
        Self::build_descent_with_seeder(vectors, dist, params, &params.seeder())
    }

    pub fn build_descent_with_seeder<S: SeedGenerator>(
        vectors: &[Vec<f32>],
        dist: D,
        params: DescentParams,
        seeder: &S,
    ) -> Result<Self, ProxGraphError> {
        let builder = DescentBuilder::new(params, dist)?;
        let mut store = PointStore::from_vectors(vectors)?;
        let out = builder.build_with_seeder(&mut store, seeder)?;
        Ok(Self::assemble(store, dist, out, params.max_degree))
    }

    fn assemble(store: PointStore, dist: D, out: BuildOutput, max_degree: usize) -> Self {
        Self {
            store,
            dist,
            medoid: out.medoid,
            max_degree,
            stats: out.stats,
        }
    }
}

impl<D> ProxGraph<D>
where
    D: Distance<f32> + Send + Sync + Copy + 'static,
{
    /// The `k` nearest ids found for one external query.
    pub fn search(&self, query: &[f32], k: usize, beam_width: usize) -> Result<Vec<u32>, ProxGraphError> {
        let params = QueryParams {
            k,
            beam_width,
            report_stats: false,
        };
        params.validate()?;
        if query.len() != self.dim() {
            return Err(ProxGraphError::Dimension {
                index: 0,
                found: query.len(),
                expected: self.dim(),
            });
        }
        let found = beam_search(query, self.store.view(), self.medoid, beam_width, self.dist);
        Ok(found.frontier.into_iter().take(k).map(|(id, _)| id).collect())
    }

    /// Answers a batch of external queries in parallel.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        params: &QueryParams,
    ) -> Result<QueryOutput, ProxGraphError> {
        query::search_batch(self.store.view(), self.medoid, queries, params, self.dist)
    }

    /// `k` neighbors for each of `ids`, never including the id itself.
    pub fn search_points(
        &self,
        ids: &[u32],
        k: usize,
        beam_width: usize,
    ) -> Result<Vec<Vec<u32>>, ProxGraphError> {
        let params = QueryParams {
            k,
            beam_width,
            report_stats: false,
        };
        query::search_points(self.store.view(), self.medoid, ids, &params, self.dist)
            .map(|out| out.neighbors)
    }

    /// Committed out-neighbors of `id`.
    pub fn neighbors(&self, id: u32) -> &[u32] {
        self.store.neighbors(id)
    }

    pub fn medoid(&self) -> u32 {
        self.medoid
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    /// Degree bound, self-loop, duplicate and id-range check on every list.
    pub fn check_invariants(&self) -> Result<(), ProxGraphError> {
        self.store.view().check_invariants(self.max_degree)
    }
}
