//! Build and query statistics.

use crate::store::GraphView;
use serde::Serialize;
use std::time::Duration;

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildStats {
    /// Builder that produced the graph ("Vamana" or "NN-Descent").
    pub name: String,
    /// Human readable parameter summary.
    pub params: String,
    pub num_points: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    /// Insertion batches (Vamana) or descent rounds (NN-Descent) executed.
    pub rounds: usize,
    /// `false` only when descent hit its round cap before the change fraction
    /// dropped below `delta`. Always `true` for Vamana.
    pub converged: bool,
    /// Points whose list changed in each descent round.
    pub changes_per_round: Vec<usize>,
    pub build_time: Duration,
}

impl BuildStats {
    pub(crate) fn summarize(
        name: &str,
        params: String,
        view: GraphView<'_>,
        rounds: usize,
        converged: bool,
        changes_per_round: Vec<usize>,
        build_time: Duration,
    ) -> Self {
        let (avg_degree, max_degree) = view.degree_summary();
        Self {
            name: name.to_string(),
            params,
            num_points: view.len(),
            avg_degree,
            max_degree,
            rounds,
            converged,
            changes_per_round,
            build_time,
        }
    }
}

impl std::fmt::Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} graph built with {} points and parameters {}",
            self.name, self.num_points, self.params
        )?;
        writeln!(
            f,
            "Graph has average degree {:.2} and maximum degree {}",
            self.avg_degree, self.max_degree
        )?;
        writeln!(
            f,
            "Rounds: {}{}",
            self.rounds,
            if self.converged { "" } else { " (round cap reached)" }
        )?;
        write!(f, "Graph built in {:.3} seconds", self.build_time.as_secs_f64())
    }
}

/// Search cost over a query batch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueryStats {
    pub num_queries: usize,
    pub avg_cmps: usize,
    pub tail_cmps: usize,
    pub avg_visited: usize,
    pub tail_visited: usize,
}

impl QueryStats {
    /// Averages and 99th percentiles of per-query distance comparisons and
    /// expanded-point counts. Both slices hold one entry per query.
    pub fn from_counts(cmps: &[usize], visited: &[usize]) -> Self {
        assert_eq!(
            cmps.len(),
            visited.len(),
            "query stats: {} comparison counts for {} visited counts",
            cmps.len(),
            visited.len()
        );
        let (avg_cmps, tail_cmps) = mean_and_tail(cmps);
        let (avg_visited, tail_visited) = mean_and_tail(visited);
        Self {
            num_queries: cmps.len(),
            avg_cmps,
            tail_cmps,
            avg_visited,
            tail_visited,
        }
    }
}

fn mean_and_tail(counts: &[usize]) -> (usize, usize) {
    if counts.is_empty() {
        return (0, 0);
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let mean = sorted.iter().sum::<usize>() / sorted.len();
    let idx = ((0.99 * (sorted.len() - 1) as f64).round() as usize).min(sorted.len() - 1);
    (mean, sorted[idx])
}

impl std::fmt::Display for QueryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Over {} queries", self.num_queries)?;
        writeln!(
            f,
            "Average dist cmps: {}, 99th percentile dist cmps: {}",
            self.avg_cmps, self.tail_cmps
        )?;
        write!(
            f,
            "Average num visited: {}, 99th percentile num visited: {}",
            self.avg_visited, self.tail_visited
        )
    }
}
