//! # Clustering seed generator
//!
//! Bootstraps the descent builder with approximate k-NN lists. Each of
//! `num_clusters` independent trees recursively splits the point set around
//! two random pivots (every point goes to its closer pivot) until a cell holds
//! at most `cluster_size` points; every cell then runs a brute-force k-NN
//! among its members. Lists from all trees are folded together with
//! [`bounded_union`], so a point's seed list keeps the best `k` candidates it
//! met in any tree.

use crate::descent::bounded_union;
use crate::medoid::PAR_THRESHOLD;
use crate::store::GraphView;
use crate::{by_dist_then_id, point_rng};
use anndists::prelude::Distance;
use rayon::prelude::*;
use tracing::debug;

/// Produces initial `(neighbor, distance)` lists for every point.
///
/// Implementations must return exactly one list per point of `view`, each
/// sorted ascending by distance and holding at most `k` entries.
pub trait SeedGenerator: Sync {
    fn seed<D>(&self, view: GraphView<'_>, dist: D, k: usize) -> Vec<Vec<(u32, f32)>>
    where
        D: Distance<f32> + Copy + Send + Sync;
}

/// Random-pivot partition trees with brute-force leaves.
#[derive(Clone, Copy, Debug)]
pub struct ClusterTreeSeeder {
    pub cluster_size: usize,
    pub num_clusters: usize,
    pub seed: u64,
}

impl ClusterTreeSeeder {
    pub fn new(cluster_size: usize, num_clusters: usize, seed: u64) -> Self {
        Self {
            cluster_size,
            num_clusters,
            seed,
        }
    }

    /// Leaf cells of one tree. Every id of `ids` lands in exactly one cell.
    fn partition<D>(
        &self,
        view: GraphView<'_>,
        dist: D,
        ids: Vec<u32>,
        tree_seed: u64,
        node: u64,
    ) -> Vec<Vec<u32>>
    where
        D: Distance<f32> + Copy + Send + Sync,
    {
        // cells below 4 points cannot be split into two cells of at least 2
        if ids.len() <= self.cluster_size.max(3) {
            return vec![ids];
        }

        let mut rng = point_rng(tree_seed, node);
        let pivots = rand::seq::index::sample(&mut rng, ids.len(), 2);
        let (a, b) = (ids[pivots.index(0)], ids[pivots.index(1)]);
        let (pa, pb) = (view.point(a), view.point(b));

        let (mut left, mut right): (Vec<u32>, Vec<u32>) = ids
            .iter()
            .partition(|&&id| {
                let p = view.point(id);
                dist.eval(p, pa) <= dist.eval(p, pb)
            });

        // degenerate split (duplicates, one far outlier): fall back to halving
        if left.len() < 2 || right.len() < 2 {
            let mut all = ids;
            right = all.split_off(all.len() / 2);
            left = all;
        }

        let (l, r) = (node.wrapping_mul(2).wrapping_add(1), node.wrapping_mul(2).wrapping_add(2));
        if left.len() + right.len() > PAR_THRESHOLD {
            let (mut lc, rc) = rayon::join(
                || self.partition(view, dist, left, tree_seed, l),
                || self.partition(view, dist, right, tree_seed, r),
            );
            lc.extend(rc);
            lc
        } else {
            let mut lc = self.partition(view, dist, left, tree_seed, l);
            lc.extend(self.partition(view, dist, right, tree_seed, r));
            lc
        }
    }
}

/// Exact k-NN among the members of one cell.
fn leaf_knn<D>(view: GraphView<'_>, dist: D, cell: &[u32], k: usize) -> Vec<(u32, Vec<(u32, f32)>)>
where
    D: Distance<f32> + Copy,
{
    cell.iter()
        .map(|&i| {
            let p = view.point(i);
            let mut row: Vec<(u32, f32)> = cell
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| (j, dist.eval(p, view.point(j))))
                .collect();
            row.sort_by(by_dist_then_id);
            row.truncate(k);
            (i, row)
        })
        .collect()
}

impl SeedGenerator for ClusterTreeSeeder {
    fn seed<D>(&self, view: GraphView<'_>, dist: D, k: usize) -> Vec<Vec<(u32, f32)>>
    where
        D: Distance<f32> + Copy + Send + Sync,
    {
        let n = view.len();
        let mut lists: Vec<Vec<(u32, f32)>> = vec![Vec::new(); n];

        for tree in 0..self.num_clusters {
            let tree_seed = self.seed ^ (tree as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
            let cells = self.partition(view, dist, (0..n as u32).collect(), tree_seed, 0);
            debug!(tree, cells = cells.len(), "cluster tree partitioned");

            let mut from_tree: Vec<Vec<(u32, f32)>> = vec![Vec::new(); n];
            let rows: Vec<(u32, Vec<(u32, f32)>)> = cells
                .par_iter()
                .flat_map_iter(|cell| leaf_knn(view, dist, cell, k))
                .collect();
            for (i, row) in rows {
                from_tree[i as usize] = row;
            }

            lists
                .par_iter_mut()
                .zip(from_tree.par_iter())
                .for_each(|(list, row)| {
                    let (merged, changed) = bounded_union(list, row, k);
                    if changed {
                        *list = merged;
                    }
                });
        }

        lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::SquaredL2;
    use crate::store::PointStore;
    use rand::prelude::*;
    use std::collections::HashSet;

    fn random_store(n: usize, dim: usize, seed: u64) -> PointStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let vectors: Vec<Vec<f32>> = (0..n)
            .map(|_| (0..dim).map(|_| rng.r#gen::<f32>()).collect())
            .collect();
        PointStore::from_vectors(&vectors).unwrap()
    }

    #[test]
    fn test_partition_covers_every_point_once() {
        let store = random_store(500, 4, 1);
        let seeder = ClusterTreeSeeder::new(20, 1, 9);
        let cells = seeder.partition(store.view(), SquaredL2, store.ids().collect(), 9, 0);

        let mut seen = HashSet::new();
        for cell in &cells {
            assert!(cell.len() >= 2 && cell.len() <= 20, "cell of size {}", cell.len());
            for &id in cell {
                assert!(seen.insert(id), "point {id} in two cells");
            }
        }
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn test_duplicates_fall_back_to_halving() {
        let vectors = vec![vec![1.0, 1.0]; 50];
        let store = PointStore::from_vectors(&vectors).unwrap();
        let seeder = ClusterTreeSeeder::new(8, 1, 3);
        let cells = seeder.partition(store.view(), SquaredL2, store.ids().collect(), 3, 0);
        assert!(cells.iter().all(|c| c.len() >= 2 && c.len() <= 8));
        assert_eq!(cells.iter().map(Vec::len).sum::<usize>(), 50);
    }

    #[test]
    fn test_seed_lists_are_sorted_bounded_and_clean() {
        let store = random_store(300, 6, 2);
        let seeder = ClusterTreeSeeder::new(32, 3, 17);
        let lists = seeder.seed(store.view(), SquaredL2, 10);

        assert_eq!(lists.len(), 300);
        for (i, list) in lists.iter().enumerate() {
            assert!(!list.is_empty() && list.len() <= 10, "point {i}: {} entries", list.len());
            let ids: HashSet<u32> = list.iter().map(|&(id, _)| id).collect();
            assert_eq!(ids.len(), list.len(), "point {i} has duplicate seeds");
            assert!(!ids.contains(&(i as u32)));
            for pair in list.windows(2) {
                assert!(pair[0].1 <= pair[1].1);
            }
        }
    }

    #[test]
    fn test_single_cell_is_exact() {
        let store = random_store(40, 3, 4);
        let view = store.view();
        // one cell holds everything: lists equal brute force
        let lists = ClusterTreeSeeder::new(64, 1, 0).seed(view, SquaredL2, 5);
        for id in store.ids() {
            let mut truth: Vec<(u32, f32)> = store
                .ids()
                .filter(|&j| j != id)
                .map(|j| (j, SquaredL2.eval(view.point(id), view.point(j))))
                .collect();
            truth.sort_by(by_dist_then_id);
            truth.truncate(5);
            assert_eq!(lists[id as usize], truth);
        }
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let store = random_store(400, 5, 8);
        let seeder = ClusterTreeSeeder::new(25, 2, 77);
        let a = seeder.seed(store.view(), SquaredL2, 8);
        let b = seeder.seed(store.view(), SquaredL2, 8);
        assert_eq!(a, b);
    }
}
