//! Group-by-key over point ids (CSR layout).
//!
//! Builders emit edge proposals as flat `(target, payload)` pairs from many
//! parallel tasks, then group them here in one pass so that each target can be
//! updated by exactly one task afterwards.

use rayon::prelude::*;

/// Payloads grouped by target id: `values[offsets[t]..offsets[t + 1]]` belong to `t`.
#[derive(Clone, Debug)]
pub struct Grouped<T> {
    offsets: Vec<usize>,
    values: Vec<T>,
}

/// Groups `pairs` by target. Within one target, payloads keep their emission order.
pub fn group_by_target<T: Send>(n: usize, mut pairs: Vec<(u32, T)>) -> Grouped<T> {
    pairs.par_sort_by_key(|&(target, _)| target);

    // count per target, then prefix sums -> offsets
    let mut offsets = vec![0usize; n + 1];
    for &(target, _) in &pairs {
        assert!(
            (target as usize) < n,
            "edge target {} out of range for {} points",
            target,
            n
        );
        offsets[target as usize + 1] += 1;
    }
    for i in 0..n {
        offsets[i + 1] += offsets[i];
    }

    Grouped {
        offsets,
        values: pairs.into_iter().map(|(_, v)| v).collect(),
    }
}

impl<T> Grouped<T> {
    /// Payloads addressed to `target` (empty if none).
    pub fn get(&self, target: u32) -> &[T] {
        let t = target as usize;
        &self.values[self.offsets[t]..self.offsets[t + 1]]
    }

    /// Total number of grouped payloads.
    pub fn total(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_preserve_emission_order() {
        let pairs = vec![(2u32, 'a'), (0, 'b'), (2, 'c'), (3, 'd'), (0, 'e'), (2, 'f')];
        let g = group_by_target(5, pairs);
        assert_eq!(g.get(0), &['b', 'e']);
        assert!(g.get(1).is_empty());
        assert_eq!(g.get(2), &['a', 'c', 'f']);
        assert_eq!(g.get(3), &['d']);
        assert!(g.get(4).is_empty());
        assert_eq!(g.total(), 6);
    }

    #[test]
    fn test_empty_input() {
        let g: Grouped<u32> = group_by_target(3, Vec::new());
        assert_eq!(g.total(), 0);
        assert!(g.get(2).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_rejects_unknown_target() {
        group_by_target(2, vec![(5u32, 0u32)]);
    }
}
