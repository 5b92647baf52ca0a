//! # Descent (NN-Descent) builder
//!
//! Refines clustering-seeded k-NN lists by local joins ("a neighbor of a
//! neighbor is probably a neighbor") until few lists still change, then
//! symmetrizes the result and prunes it once into a navigable, degree-bounded
//! graph:
//!
//! ```text
//! seed lists ──► [ reverse graph ─► local join (chunked) ─► bounded merge ]* ──► undirect + prune ──► commit
//!                 └──────────────── until changed < delta · n or round cap ──┘
//! ```
//!
//! The working k-NN lists live in the builder, keyed by point id, and carry
//! distances. Within a chunk every proposal is computed against the lists as
//! of chunk start; the merge then writes each list from exactly one task.

use crate::cluster::{ClusterTreeSeeder, SeedGenerator};
use crate::group::group_by_target;
use crate::medoid::find_medoid;
use crate::prune::single_pass_prune;
use crate::stats::BuildStats;
use crate::store::{GraphView, PointStore};
use crate::{by_dist_then_id, point_rng, BuildOutput, ProxGraphError};
use anndists::prelude::Distance;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Hard cap on descent rounds.
pub const DESCENT_MAX_ROUNDS: usize = 10;

pub const DESCENT_DEFAULT_K: usize = 32;
pub const DESCENT_DEFAULT_DELTA: f32 = 0.05;
pub const DESCENT_DEFAULT_ROUND2_ALPHA: f32 = 1.2;
pub const DESCENT_DEFAULT_CLUSTER_SIZE: usize = 100;
pub const DESCENT_DEFAULT_NUM_CLUSTERS: usize = 4;
pub const DESCENT_DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Knobs for the descent builder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescentParams {
    /// Working list size `K` during descent.
    pub k: usize,
    /// Degree bound of the final graph.
    pub max_degree: usize,
    /// Stop once fewer than `delta * n` lists changed in a round.
    pub delta: f32,
    /// α of the final single-pass prune.
    pub round2_alpha: f32,
    pub cluster_size: usize,
    /// Number of independent cluster trees seeding the lists.
    pub num_clusters: usize,
    pub max_rounds: usize,
    /// Points per local-join chunk; bounds peak proposal memory.
    pub chunk_size: usize,
    pub seed: u64,
}

impl Default for DescentParams {
    fn default() -> Self {
        Self {
            k: DESCENT_DEFAULT_K,
            max_degree: DESCENT_DEFAULT_K,
            delta: DESCENT_DEFAULT_DELTA,
            round2_alpha: DESCENT_DEFAULT_ROUND2_ALPHA,
            cluster_size: DESCENT_DEFAULT_CLUSTER_SIZE,
            num_clusters: DESCENT_DEFAULT_NUM_CLUSTERS,
            max_rounds: DESCENT_MAX_ROUNDS,
            chunk_size: DESCENT_DEFAULT_CHUNK_SIZE,
            seed: 0xdec0de,
        }
    }
}

impl DescentParams {
    pub fn validate(&self) -> Result<(), ProxGraphError> {
        let fail = |msg: String| Err(ProxGraphError::Config(msg));
        if self.k == 0 {
            return fail("k must be > 0".to_string());
        }
        if self.max_degree == 0 {
            return fail("max_degree must be > 0".to_string());
        }
        if !(self.delta > 0.0 && self.delta <= 1.0) {
            return fail(format!("delta must be in (0, 1], got {}", self.delta));
        }
        if !(self.round2_alpha >= 1.0) {
            return fail(format!("round2_alpha must be >= 1, got {}", self.round2_alpha));
        }
        if self.cluster_size < 2 {
            return fail(format!("cluster_size must be >= 2, got {}", self.cluster_size));
        }
        if self.num_clusters == 0 {
            return fail("num_clusters must be > 0".to_string());
        }
        if self.max_rounds == 0 || self.max_rounds > DESCENT_MAX_ROUNDS {
            return fail(format!(
                "max_rounds must be in 1..={}, got {}",
                DESCENT_MAX_ROUNDS, self.max_rounds
            ));
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be > 0".to_string());
        }
        Ok(())
    }

    pub fn seeder(&self) -> ClusterTreeSeeder {
        ClusterTreeSeeder::new(self.cluster_size, self.num_clusters, self.seed)
    }

    fn describe(&self) -> String {
        format!(
            "K={}, R={}, delta={}, alpha={}, cluster_size={}, num_clusters={}",
            self.k, self.max_degree, self.delta, self.round2_alpha, self.cluster_size, self.num_clusters
        )
    }
}

/// Merges two lists sorted ascending by (distance, id), skipping ids already
/// taken, and keeps the first `bound` entries. The flag reports whether the
/// result differs from `current`.
pub fn bounded_union(
    current: &[(u32, f32)],
    incoming: &[(u32, f32)],
    bound: usize,
) -> (Vec<(u32, f32)>, bool) {
    let mut out = Vec::with_capacity(bound.min(current.len() + incoming.len()));
    let mut taken = HashSet::with_capacity(out.capacity());
    let (mut a, mut b) = (current.iter().peekable(), incoming.iter().peekable());

    while out.len() < bound {
        let next = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if by_dist_then_id(x, y).is_le() {
                    a.next()
                } else {
                    b.next()
                }
            }
            (Some(_), None) => a.next(),
            (None, Some(_)) => b.next(),
            (None, None) => break,
        };
        if let Some(&(id, d)) = next {
            if taken.insert(id) {
                out.push((id, d));
            }
        }
    }

    let changed = out.len() != current.len()
        || out.iter().zip(current).any(|(x, y)| x.0 != y.0);
    (out, changed)
}

/// Distance to the worst kept neighbor; lists short of `k` accept anything.
#[inline]
fn worst(list: &[(u32, f32)], k: usize) -> f32 {
    if list.len() < k {
        f32::INFINITY
    } else {
        list.last().map_or(f32::INFINITY, |&(_, d)| d)
    }
}

/// Builds a descent graph over a [`PointStore`].
pub struct DescentBuilder<D> {
    params: DescentParams,
    dist: D,
}

impl<D> DescentBuilder<D>
where
    D: Distance<f32> + Send + Sync + Copy,
{
    pub fn new(params: DescentParams, dist: D) -> Result<Self, ProxGraphError> {
        params.validate()?;
        Ok(Self { params, dist })
    }

    pub fn params(&self) -> &DescentParams {
        &self.params
    }

    /// Builds with the cluster-tree seeder configured by the params.
    pub fn build(&self, store: &mut PointStore) -> Result<BuildOutput, ProxGraphError> {
        self.build_with_seeder(store, &self.params.seeder())
    }

    pub fn build_with_seeder<S: SeedGenerator>(
        &self,
        store: &mut PointStore,
        seeder: &S,
    ) -> Result<BuildOutput, ProxGraphError> {
        if store.is_empty() {
            return Err(ProxGraphError::EmptyInput);
        }
        let started = Instant::now();
        let n = store.len();
        let p = &self.params;
        info!(
            points = n,
            k = p.k,
            max_degree = p.max_degree,
            delta = p.delta,
            "descent build started"
        );

        store.clear_neighbors();
        let mut knn = self.seed_lists(store.view(), seeder);

        let mut rounds = 0;
        let mut changed = n;
        let mut changes_per_round = Vec::new();
        while changed as f64 >= p.delta as f64 * n as f64 && rounds < p.max_rounds {
            changed = self.descent_round(store.view(), &mut knn, rounds);
            debug!(round = rounds, changed, "descent round finished");
            changes_per_round.push(changed);
            rounds += 1;
        }
        let converged = (changed as f64) < p.delta as f64 * n as f64;
        if converged {
            info!(rounds, "descent converged");
        } else {
            info!(rounds, changed, "descent stopped at round cap before converging");
        }

        let lists = self.undirect_and_prune(store.view(), &knn);
        store.stage_lists(lists);
        store.commit();

        let medoid = find_medoid(store.view(), self.dist);
        let stats = BuildStats::summarize(
            "NN-Descent",
            p.describe(),
            store.view(),
            rounds,
            converged,
            changes_per_round,
            started.elapsed(),
        );
        info!(
            rounds,
            avg_degree = stats.avg_degree,
            elapsed_ms = stats.build_time.as_millis() as u64,
            "descent build finished"
        );
        Ok(BuildOutput { medoid, stats })
    }

    /// Runs the seeder and normalizes its lists: no self, no duplicates,
    /// sorted, at most `k`.
    fn seed_lists<S: SeedGenerator>(
        &self,
        view: GraphView<'_>,
        seeder: &S,
    ) -> Vec<Vec<(u32, f32)>> {
        let n = view.len();
        let k = self.params.k;
        let mut lists = seeder.seed(view, self.dist, k);
        assert_eq!(
            lists.len(),
            n,
            "seed generator returned {} lists for {} points",
            lists.len(),
            n
        );

        lists.par_iter_mut().enumerate().for_each(|(i, list)| {
            assert!(
                list.iter().all(|&(id, _)| (id as usize) < n),
                "seed list of point {} holds an unknown id",
                i
            );
            list.retain(|&(id, _)| id as usize != i);
            list.sort_by(by_dist_then_id);
            let mut seen = HashSet::with_capacity(list.len());
            list.retain(|&(id, _)| seen.insert(id));
            list.truncate(k);
        });
        lists
    }

    /// For each point, up to `k` distinct points currently listing it,
    /// chosen uniformly at random.
    fn reverse_graph(&self, knn: &[Vec<(u32, f32)>], round: usize) -> Vec<Vec<u32>> {
        let n = knn.len();
        let pairs: Vec<(u32, u32)> = knn
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, list)| list.iter().map(move |&(nb, _)| (nb, i as u32)))
            .collect();
        let grouped = group_by_target(n, pairs);

        let round_seed = self.params.seed.wrapping_add(round as u64 + 1);
        (0..n as u32)
            .into_par_iter()
            .map(|t| {
                let mut sources = grouped.get(t).to_vec();
                sources.sort_unstable();
                sources.dedup();
                sources.shuffle(&mut point_rng(round_seed, t as u64));
                sources.truncate(self.params.k);
                sources
            })
            .collect()
    }

    /// One local-join round. Returns the number of lists that changed.
    fn descent_round(
        &self,
        view: GraphView<'_>,
        knn: &mut [Vec<(u32, f32)>],
        round: usize,
    ) -> usize {
        let n = knn.len();
        let k = self.params.k;
        let rev = self.reverse_graph(knn, round);
        let mut changed = vec![false; n];

        for start in (0..n).step_by(self.params.chunk_size) {
            let end = (start + self.params.chunk_size).min(n);
            let current: &[Vec<(u32, f32)>] = knn;
            let proposals: Vec<(u32, (u32, f32))> = (start..end)
                .into_par_iter()
                .flat_map_iter(|i| local_join(i as u32, current, &rev[i], view, self.dist, k))
                .collect();
            let grouped = group_by_target(n, proposals);
            debug!(start, end, proposals = grouped.total(), "local join chunk");

            knn.par_iter_mut()
                .zip(changed.par_iter_mut())
                .enumerate()
                .for_each(|(t, (list, flag))| {
                    let offered = grouped.get(t as u32);
                    if offered.is_empty() {
                        return;
                    }
                    let mut sorted = offered.to_vec();
                    sorted.sort_by(by_dist_then_id);
                    let mut seen = HashSet::with_capacity(sorted.len());
                    sorted.retain(|&(id, _)| seen.insert(id));

                    let (merged, differs) = bounded_union(list, &sorted, k);
                    if differs {
                        *list = merged;
                        *flag = true;
                    }
                });
        }

        changed.into_iter().filter(|&c| c).count()
    }

    /// Symmetrizes the k-NN lists and prunes every point once.
    fn undirect_and_prune(&self, view: GraphView<'_>, knn: &[Vec<(u32, f32)>]) -> Vec<Vec<u32>> {
        let n = knn.len();
        let DescentParams {
            max_degree,
            round2_alpha,
            ..
        } = self.params;

        let pairs: Vec<(u32, (u32, f32))> = knn
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, list)| list.iter().map(move |&(nb, d)| (nb, (i as u32, d))))
            .collect();
        let incoming = group_by_target(n, pairs);

        (0..n as u32)
            .into_par_iter()
            .map(|p| {
                let mut reverse = incoming.get(p).to_vec();
                reverse.sort_by(by_dist_then_id);
                let (merged, _) = bounded_union(&knn[p as usize], &reverse, usize::MAX);
                single_pass_prune(p, &merged, view, max_degree, round2_alpha, self.dist)
            })
            .collect()
    }
}

/// Proposals `(target, (candidate, distance))` generated around point `i`:
/// pairs among its filtered reverse neighbors, and between its own
/// neighbors and those reverse neighbors.
fn local_join<D: Distance<f32> + Copy>(
    i: u32,
    knn: &[Vec<(u32, f32)>],
    reverse: &[u32],
    view: GraphView<'_>,
    dist: D,
    k: usize,
) -> Vec<(u32, (u32, f32))> {
    let own = &knn[i as usize];
    let filtered: Vec<u32> = reverse
        .iter()
        .copied()
        .filter(|&r| r != i && !own.iter().any(|&(id, _)| id == r))
        .collect();

    let mut out = Vec::new();
    let mut propose = |j: u32, m: u32| {
        if j == m {
            return;
        }
        let d = dist.eval(view.point(j), view.point(m));
        if d < worst(&knn[j as usize], k) {
            out.push((j, (m, d)));
        }
        if d < worst(&knn[m as usize], k) {
            out.push((m, (j, d)));
        }
    };

    for (l, &j) in filtered.iter().enumerate() {
        for &m in &filtered[l + 1..] {
            propose(j, m);
        }
    }
    for &(j, _) in own {
        for &m in &filtered {
            propose(j, m);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::SquaredL2;
    use rand::prelude::*;

    /// Seeds every point with its exact k nearest neighbors.
    struct ExactSeeder;

    impl SeedGenerator for ExactSeeder {
        fn seed<D>(&self, view: GraphView<'_>, dist: D, k: usize) -> Vec<Vec<(u32, f32)>>
        where
            D: Distance<f32> + Copy + Send + Sync,
        {
            (0..view.len() as u32)
                .into_par_iter()
                .map(|i| {
                    let mut row: Vec<(u32, f32)> = (0..view.len() as u32)
                        .filter(|&j| j != i)
                        .map(|j| (j, dist.eval(view.point(i), view.point(j))))
                        .collect();
                    row.sort_by(by_dist_then_id);
                    row.truncate(k);
                    row
                })
                .collect()
        }
    }

    /// Seeds every point with `k` random neighbors.
    struct RandomSeeder(u64);

    impl SeedGenerator for RandomSeeder {
        fn seed<D>(&self, view: GraphView<'_>, dist: D, k: usize) -> Vec<Vec<(u32, f32)>>
        where
            D: Distance<f32> + Copy + Send + Sync,
        {
            let n = view.len();
            (0..n as u32)
                .map(|i| {
                    let mut rng = point_rng(self.0, i as u64);
                    let mut row: Vec<(u32, f32)> =
                        rand::seq::index::sample(&mut rng, n, (k + 1).min(n))
                            .into_iter()
                            .map(|j| j as u32)
                            .filter(|&j| j != i)
                            .take(k)
                            .map(|j| (j, dist.eval(view.point(i), view.point(j))))
                            .collect();
                    row.sort_by(by_dist_then_id);
                    row
                })
                .collect()
        }
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.r#gen::<f32>()).collect())
            .collect()
    }

    fn params(k: usize) -> DescentParams {
        DescentParams {
            k,
            max_degree: k,
            cluster_size: 40,
            num_clusters: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_bounded_union() {
        let cur = vec![(1, 0.5), (4, 1.0), (2, 3.0)];
        let inc = vec![(7, 0.7), (4, 1.0), (9, 5.0)];

        let (out, changed) = bounded_union(&cur, &inc, 3);
        assert_eq!(out, vec![(1, 0.5), (7, 0.7), (4, 1.0)]);
        assert!(changed);

        let (out, changed) = bounded_union(&cur, &[(4, 1.0), (2, 3.0)], 3);
        assert_eq!(out, cur);
        assert!(!changed);

        // worse candidates do not enter a full list
        let (_, changed) = bounded_union(&cur, &[(8, 9.0)], 3);
        assert!(!changed);

        // but do enter a short one
        let (out, changed) = bounded_union(&cur, &[(8, 9.0)], 5);
        assert_eq!(out.len(), 4);
        assert!(changed);
    }

    #[test]
    fn test_reverse_graph_is_bounded_and_reproducible() {
        let n = 60usize;
        let k = 4;
        // three successors on a ring plus a hub at 0; lists near the end of
        // the ring name 0 twice
        let knn: Vec<Vec<(u32, f32)>> = (0..n)
            .map(|i| {
                [(i + 1) % n, (i + 2) % n, (i + 3) % n, 0]
                    .into_iter()
                    .filter(|&j| j != i)
                    .map(|j| (j as u32, 0.0))
                    .collect()
            })
            .collect();
        let builder = DescentBuilder::new(params(k), SquaredL2).unwrap();

        let rev = builder.reverse_graph(&knn, 0);
        assert_eq!(rev.len(), n);
        for (t, sources) in rev.iter().enumerate() {
            let listers: HashSet<u32> = (0..n as u32)
                .filter(|&s| knn[s as usize].iter().any(|&(nb, _)| nb as usize == t))
                .collect();
            let unique: HashSet<u32> = sources.iter().copied().collect();
            assert_eq!(unique.len(), sources.len(), "duplicates in {t}: {sources:?}");
            assert_eq!(sources.len(), k.min(listers.len()), "target {t}");
            assert!(unique.is_subset(&listers), "target {t} got {sources:?}");
        }
        assert_eq!(builder.reverse_graph(&knn, 0), rev);

        // the hub keeps a random k-subset, which varies across rounds
        let seen: HashSet<u32> = (0..10)
            .flat_map(|round| builder.reverse_graph(&knn, round)[0].clone())
            .collect();
        assert!(seen.len() > k, "hub sample never changed: {seen:?}");
    }

    #[test]
    fn test_params_validation() {
        assert!(DescentParams::default().validate().is_ok());
        let bad = [
            DescentParams { k: 0, ..Default::default() },
            DescentParams { delta: 0.0, ..Default::default() },
            DescentParams { delta: 1.5, ..Default::default() },
            DescentParams { round2_alpha: 0.5, ..Default::default() },
            DescentParams { cluster_size: 1, ..Default::default() },
            DescentParams { max_rounds: 11, ..Default::default() },
            DescentParams { chunk_size: 0, ..Default::default() },
        ];
        for p in bad {
            assert!(
                matches!(DescentBuilder::new(p, SquaredL2), Err(ProxGraphError::Config(_))),
                "accepted {:?}",
                p
            );
        }
    }

    #[test]
    fn test_exact_seed_converges_immediately() {
        let vectors = random_vectors(200, 6, 3);
        let mut store = PointStore::from_vectors(&vectors).unwrap();
        let builder = DescentBuilder::new(params(8), SquaredL2).unwrap();
        let out = builder.build_with_seeder(&mut store, &ExactSeeder).unwrap();

        assert_eq!(out.stats.rounds, 1);
        assert_eq!(out.stats.changes_per_round, vec![0]);
        assert!(out.stats.converged);
        store.view().check_invariants(8).unwrap();
    }

    #[test]
    fn test_descent_improves_random_seed() {
        let vectors = random_vectors(300, 4, 5);
        let store = PointStore::from_vectors(&vectors).unwrap();
        let view = store.view();
        let k = 10;
        let builder = DescentBuilder::new(params(k), SquaredL2).unwrap();

        let truth = ExactSeeder.seed(view, SquaredL2, k);
        let overlap = |lists: &[Vec<(u32, f32)>]| -> f64 {
            let hits: usize = lists
                .iter()
                .zip(&truth)
                .map(|(l, t)| l.iter().filter(|(id, _)| t.iter().any(|(tid, _)| tid == id)).count())
                .sum();
            hits as f64 / (lists.len() * k) as f64
        };

        let mut knn = builder.seed_lists(view, &RandomSeeder(1));
        let before = overlap(&knn);
        let mut counts = Vec::new();
        for round in 0..6 {
            counts.push(builder.descent_round(view, &mut knn, round));
        }
        let after = overlap(&knn);
        assert!(after > 0.85, "k-NN overlap after descent {after:.3} (before {before:.3})");
        assert!(
            counts.last() < counts.first(),
            "changed counts did not fall: {counts:?}"
        );
    }

    #[test]
    fn test_round_cap_is_not_an_error() {
        let vectors = random_vectors(300, 8, 6);
        let mut store = PointStore::from_vectors(&vectors).unwrap();
        let p = DescentParams {
            max_rounds: 1,
            delta: 1e-6,
            ..params(10)
        };
        let out = DescentBuilder::new(p, SquaredL2)
            .unwrap()
            .build_with_seeder(&mut store, &RandomSeeder(2))
            .unwrap();
        assert_eq!(out.stats.rounds, 1);
        assert!(!out.stats.converged);
        store.view().check_invariants(10).unwrap();
    }

    #[test]
    fn test_small_chunks_match_invariants() {
        let vectors = random_vectors(250, 5, 7);
        let mut store = PointStore::from_vectors(&vectors).unwrap();
        let p = DescentParams {
            chunk_size: 17,
            max_degree: 6,
            ..params(12)
        };
        let out = DescentBuilder::new(p, SquaredL2)
            .unwrap()
            .build(&mut store)
            .unwrap();
        store.view().check_invariants(6).unwrap();
        assert!(out.stats.rounds >= 1 && out.stats.rounds <= DESCENT_MAX_ROUNDS);
        for id in store.ids() {
            assert!(!store.neighbors(id).is_empty(), "point {id} has no neighbors");
        }
    }

    #[test]
    fn test_seed_normalization() {
        struct Messy;
        impl SeedGenerator for Messy {
            fn seed<D>(&self, view: GraphView<'_>, _dist: D, _k: usize) -> Vec<Vec<(u32, f32)>>
            where
                D: Distance<f32> + Copy + Send + Sync,
            {
                (0..view.len() as u32)
                    .map(|i| vec![(i, 0.0), (3, 2.0), (1, 1.0), (3, 2.0), (2, 0.5)])
                    .collect()
            }
        }
        let vectors = random_vectors(5, 2, 1);
        let store = PointStore::from_vectors(&vectors).unwrap();
        let builder = DescentBuilder::new(params(2), SquaredL2).unwrap();
        let lists = builder.seed_lists(store.view(), &Messy);
        assert_eq!(lists[0], vec![(2, 0.5), (1, 1.0)]);
        assert_eq!(lists[2], vec![(1, 1.0), (3, 2.0)]);
    }

    #[test]
    #[should_panic(expected = "seed generator returned")]
    fn test_wrong_seed_count_panics() {
        struct Short;
        impl SeedGenerator for Short {
            fn seed<D>(&self, _view: GraphView<'_>, _dist: D, _k: usize) -> Vec<Vec<(u32, f32)>>
            where
                D: Distance<f32> + Copy + Send + Sync,
            {
                vec![Vec::new()]
            }
        }
        let vectors = random_vectors(4, 2, 1);
        let mut store = PointStore::from_vectors(&vectors).unwrap();
        let _ = DescentBuilder::new(params(2), SquaredL2)
            .unwrap()
            .build_with_seeder(&mut store, &Short);
    }
}
