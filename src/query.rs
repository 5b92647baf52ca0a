//! Batch k-NN queries over a finished graph.

use crate::beam::beam_search;
use crate::stats::QueryStats;
use crate::store::GraphView;
use crate::ProxGraphError;
use anndists::prelude::Distance;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const QUERY_DEFAULT_K: usize = 10;
pub const QUERY_DEFAULT_BEAM_WIDTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub k: usize,
    /// Beam width `L`; must exceed `k`.
    pub beam_width: usize,
    /// Collect distance-comparison and visited-count percentiles.
    pub report_stats: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            k: QUERY_DEFAULT_K,
            beam_width: QUERY_DEFAULT_BEAM_WIDTH,
            report_stats: false,
        }
    }
}

impl QueryParams {
    pub fn validate(&self) -> Result<(), ProxGraphError> {
        if self.k == 0 {
            return Err(ProxGraphError::Config("k must be > 0".to_string()));
        }
        if self.beam_width <= self.k {
            return Err(ProxGraphError::Config(format!(
                "beam search parameter L = {} same size or smaller than k = {}",
                self.beam_width, self.k
            )));
        }
        Ok(())
    }
}

/// Answers of one batch, in query order.
#[derive(Clone, Debug, Default)]
pub struct QueryOutput {
    pub neighbors: Vec<Vec<u32>>,
    /// Present only when `report_stats` was set.
    pub stats: Option<QueryStats>,
}

/// Queries with external vectors. Fails before answering anything if the
/// params are invalid or any query has the wrong dimension.
pub fn search_batch<D: Distance<f32> + Copy + Sync>(
    view: GraphView<'_>,
    medoid: u32,
    queries: &[Vec<f32>],
    params: &QueryParams,
    dist: D,
) -> Result<QueryOutput, ProxGraphError> {
    params.validate()?;
    if let Some((index, q)) = queries
        .iter()
        .enumerate()
        .find(|(_, q)| q.len() != view.dim())
    {
        return Err(ProxGraphError::Dimension {
            index,
            found: q.len(),
            expected: view.dim(),
        });
    }

    let results: Vec<(Vec<u32>, usize, usize)> = queries
        .par_iter()
        .map(|q| answer(view, medoid, q, None, params, dist))
        .collect();
    Ok(collect(results, params))
}

/// Queries with points already in the graph; each answer excludes the
/// queried point itself.
pub fn search_points<D: Distance<f32> + Copy + Sync>(
    view: GraphView<'_>,
    medoid: u32,
    ids: &[u32],
    params: &QueryParams,
    dist: D,
) -> Result<QueryOutput, ProxGraphError> {
    params.validate()?;
    if let Some(&bad) = ids.iter().find(|&&id| id as usize >= view.len()) {
        return Err(ProxGraphError::Config(format!(
            "query id {} out of range for {} points",
            bad,
            view.len()
        )));
    }

    let results: Vec<(Vec<u32>, usize, usize)> = ids
        .par_iter()
        .map(|&id| answer(view, medoid, view.point(id), Some(id), params, dist))
        .collect();
    Ok(collect(results, params))
}

/// One query: (answer ids, distance comparisons, expanded points).
fn answer<D: Distance<f32> + Copy>(
    view: GraphView<'_>,
    medoid: u32,
    query: &[f32],
    self_id: Option<u32>,
    params: &QueryParams,
    dist: D,
) -> (Vec<u32>, usize, usize) {
    let found = beam_search(query, view, medoid, params.beam_width, dist);
    let ids: Vec<u32> = found
        .frontier
        .iter()
        .map(|&(id, _)| id)
        .filter(|&id| Some(id) != self_id)
        .take(params.k)
        .collect();
    (ids, found.dist_cmps, found.visited.len())
}

fn collect(results: Vec<(Vec<u32>, usize, usize)>, params: &QueryParams) -> QueryOutput {
    let mut neighbors = Vec::with_capacity(results.len());
    let mut cmps = Vec::with_capacity(results.len());
    let mut visited = Vec::with_capacity(results.len());
    for (ids, c, v) in results {
        neighbors.push(ids);
        cmps.push(c);
        visited.push(v);
    }

    let stats = params.report_stats.then(|| QueryStats::from_counts(&cmps, &visited));
    if let Some(s) = &stats {
        debug!(
            queries = s.num_queries,
            avg_cmps = s.avg_cmps,
            tail_cmps = s.tail_cmps,
            "query batch finished"
        );
    }
    QueryOutput { neighbors, stats }
}
