//! # Distance Oracles
//!
//! Metrics used by the builders and the query engine. Every metric implements
//! [`anndists::prelude::Distance<f32>`], so any other `anndists` distance
//! (e.g. `DistL2`, `DistCosine`) can be plugged into the same generic code.
//!
//! - [`SquaredL2`]: squared Euclidean distance
//! - [`Mips`]: negated inner product, for maximum-inner-product search
//! - [`Metric`]: runtime-selectable wrapper over the two, for configuration files
//!
//! Kernels accumulate in [`LANES`] independent lanes so the loop vectorizes
//! (AVX/SSE on x86_64, NEON on aarch64) without explicit intrinsics. Operands
//! are combined element-wise in the same order regardless of argument order,
//! so `eval(a, b) == eval(b, a)` holds bit-for-bit.

use anndists::prelude::Distance;
use serde::{Deserialize, Serialize};

/// Accumulator width of the unrolled kernels.
pub const LANES: usize = 8;

/// Squared Euclidean distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SquaredL2;

/// Maximum inner product "distance": `-<a, b>`. Not non-negative; only the
/// ordering it induces matters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mips;

/// Metric chosen by configuration. One value is used for a whole build and its
/// queries, so metrics are never mixed within one graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Mips,
}

/// Sum of squared differences.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; LANES];
    let mut ca = a.chunks_exact(LANES);
    let mut cb = b.chunks_exact(LANES);
    for (xa, xb) in (&mut ca).zip(&mut cb) {
        for l in 0..LANES {
            let d = xa[l] - xb[l];
            acc[l] += d * d;
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

/// Inner product.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; LANES];
    let mut ca = a.chunks_exact(LANES);
    let mut cb = b.chunks_exact(LANES);
    for (xa, xb) in (&mut ca).zip(&mut cb) {
        for l in 0..LANES {
            acc[l] += xa[l] * xb[l];
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        sum += x * y;
    }
    sum
}

impl Distance<f32> for SquaredL2 {
    fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        l2_squared(a, b)
    }
}

impl Distance<f32> for Mips {
    fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        -dot(a, b)
    }
}

impl Distance<f32> for Metric {
    fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => l2_squared(a, b),
            Metric::Mips => -dot(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2_naive(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn test_l2_squared_basic() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        assert!((l2_squared(&a, &b) - 64.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_squared_with_remainder() {
        // 8-lane body plus a 5-element tail
        let dim = 133;
        let a: Vec<f32> = (0..dim).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..dim).map(|i| (i * 3) as f32 * 0.25).collect();
        let expected = l2_naive(&a, &b);
        assert!(expected > 0.0);
        let result = l2_squared(&a, &b);
        assert!(
            (result - expected).abs() / expected < 1e-5,
            "expected {expected}, got {result}"
        );
    }

    #[test]
    fn test_symmetry_is_exact() {
        let a: Vec<f32> = (0..37).map(|i| (i as f32).sin()).collect();
        let b: Vec<f32> = (0..37).map(|i| (i as f32).cos()).collect();
        assert_eq!(SquaredL2.eval(&a, &b), SquaredL2.eval(&b, &a));
        assert_eq!(Mips.eval(&a, &b), Mips.eval(&b, &a));
    }

    #[test]
    fn test_mips_prefers_larger_inner_product() {
        let q = vec![1.0, 0.0];
        let near = vec![3.0, 0.0];
        let far = vec![1.0, 1.0];
        assert!(Mips.eval(&q, &near) < Mips.eval(&q, &far));
        assert_eq!(Mips.eval(&q, &near), -3.0);
    }

    #[test]
    fn test_metric_dispatch() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, 0.5, 2.0];
        assert_eq!(Metric::Euclidean.eval(&a, &b), SquaredL2.eval(&a, &b));
        assert_eq!(Metric::Mips.eval(&a, &b), Mips.eval(&a, &b));
        assert_eq!(Metric::default(), Metric::Euclidean);
    }
}
