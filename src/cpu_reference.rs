//! The CPU reference GEMM used by the optional correctness test.
//!
//! Out of scope for the core per SPEC_FULL.md §1/§6: the search driver never
//! calls this, only a surrounding test harness would, to check a real device
//! kernel's numeric output against ground truth. Since this crate emits
//! kernel *source* rather than executing it, there is no device output to
//! compare here — this module exists so the trait boundary and a concrete
//! naive implementation are in place for a harness that does drive real
//! hardware, and so its own triple-loop arithmetic is exercised and trusted.

#![cfg(test)]

use crate::geometry::Geometry;
use crate::mat::Mat;

/// Ground truth for `C <- alpha*A*B + beta*C`, given the same geometry a
/// device kernel would be generated for. `a`/`b`/`c` are row-major-packed
/// `f64` buffers sized exactly `uncoal(M) * ld(M)` with no offsets, matching
/// the [`crate::search::Offsets::zero`] convention.
pub trait CpuReference {
    fn gemm(&self, geometry: &Geometry, alpha: f64, a: &[f64], b: &[f64], beta: f64, c: &mut [f64]);
}

/// A correctness oracle, not a performance one: three nested loops,
/// indexing through [`Geometry::coal_is_pll_k`] to resolve each matrix's
/// logical-to-physical address mapping for any layout/transpose combination.
pub struct NaiveCpuGemm;

impl NaiveCpuGemm {
    fn index(geometry: &Geometry, m: Mat, row: u32, col: u32) -> usize {
        // `row` indexes the non-K dimension (m for A, n for B, m for C);
        // `col` indexes the K dimension (k for A, k for B) or n for C.
        let pll_k = geometry.coal_is_pll_k(m);
        let ld = geometry.ld(m) as usize;
        if pll_k {
            row as usize * ld + col as usize
        } else {
            col as usize * ld + row as usize
        }
    }
}

impl CpuReference for NaiveCpuGemm {
    fn gemm(&self, geometry: &Geometry, alpha: f64, a: &[f64], b: &[f64], beta: f64, c: &mut [f64]) {
        let (m, n, k) = (geometry.m, geometry.n, geometry.k);
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f64;
                for p in 0..k {
                    let a_val = a[Self::index(geometry, Mat::A, i, p)];
                    let b_val = b[Self::index(geometry, Mat::B, p, j)];
                    acc += a_val * b_val;
                }
                let c_idx = Self::index(geometry, Mat::C, i, j);
                c[c_idx] = alpha * acc + beta * c[c_idx];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FloatType;

    #[test]
    fn naive_gemm_matches_hand_computed_2x2() {
        // row-major, no transpose: A is 2x2, B is 2x2, C is 2x2.
        let g = Geometry::simple(2, 2, 2, false, false, vec![], FloatType::F32).unwrap();
        let a = vec![1.0, 2.0, 3.0, 4.0]; // [[1,2],[3,4]]
        let b = vec![5.0, 6.0, 7.0, 8.0]; // [[5,6],[7,8]]
        let mut c = vec![0.0; 4];
        NaiveCpuGemm.gemm(&g, 1.0, &a, &b, 0.0, &mut c);
        // [[1*5+2*7, 1*6+2*8], [3*5+4*7, 3*6+4*8]] = [[19,22],[43,50]]
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn beta_scales_existing_c() {
        let g = Geometry::simple(1, 1, 1, false, false, vec![], FloatType::F32).unwrap();
        let a = vec![2.0];
        let b = vec![3.0];
        let mut c = vec![10.0];
        NaiveCpuGemm.gemm(&g, 2.0, &a, &b, 5.0, &mut c);
        // alpha*A*B + beta*C = 2*2*3 + 5*10 = 12 + 50 = 62
        assert_eq!(c, vec![62.0]);
    }
}
