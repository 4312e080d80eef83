//! The `GA=3` "super-column" workgroup grid.
//!
//! Named as its own seam (rather than inlined into [`crate::derived`])
//! because it is the one place a future skew-aware workgroup allocator would
//! plug in: today `grid[M]` for the ordinary tiling path is simply
//! `nwitems_h`/`nwitems_w` (see DESIGN.md for why this crate does not
//! resurrect a separate `SKW` hyperparameter), but `group_allocation == 3`
//! still needs an explicit 2D factorisation of the active-workgroup budget,
//! and that's what lives here.

/// Factors `total_threads` into `(rows, cols)` with `rows * cols ==
/// total_threads`, choosing the divisor pair whose `rows` is closest to
/// `skew_hint` (or to `sqrt(total_threads)` when `skew_hint == 0`).
/// `None` iff `total_threads == 0`.
pub fn get_grid(total_threads: u32, skew_hint: u32) -> Option<(u32, u32)> {
    if total_threads == 0 {
        return None;
    }
    let target = if skew_hint == 0 {
        (total_threads as f64).sqrt().round() as u32
    } else {
        skew_hint
    };

    let mut best: Option<(u32, u32)> = None;
    let mut best_dist = u32::MAX;
    let mut a = 1u32;
    while a.saturating_mul(a) <= total_threads {
        if total_threads % a == 0 {
            let b = total_threads / a;
            for &(rows, cols) in &[(a, b), (b, a)] {
                let dist = rows.abs_diff(target);
                if dist < best_dist {
                    best_dist = dist;
                    best = Some((rows, cols));
                }
            }
        }
        a += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_square_prefers_equal_factors() {
        assert_eq!(get_grid(64, 8), Some((8, 8)));
    }

    #[test]
    fn skew_hint_steers_the_factor_pair() {
        let (rows, cols) = get_grid(64, 16).unwrap();
        assert_eq!(rows * cols, 64);
        assert_eq!(rows, 16);
    }

    #[test]
    fn zero_threads_has_no_grid() {
        assert_eq!(get_grid(0, 4), None);
    }

    #[test]
    fn prime_total_falls_back_to_one_by_n() {
        let (rows, cols) = get_grid(7, 3).unwrap();
        assert_eq!(rows * cols, 7);
    }
}
