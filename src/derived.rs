//! `DerivedParams`: the full set of codegen-ready quantities computed from a
//! `(Geometry, HyperParams)` pair.
//!
//! Construction is two-phase (`build` runs both): Phase 1 computes grid and
//! tile-shape quantities and performs the "fragile" soft-rejection checks
//! that turn a speculative neighbor in the search graph into either a usable
//! point or a discarded one; Phase 2, which only runs if Phase 1 accepts,
//! fills in everything codegen needs. A rejected `DerivedParams` is still a
//! value (never an `Err`) — the caller reads `.verdict` and moves on, mirroring
//! the reference's "NotDeriveable" soft-failure model rather than a hard error.

use crate::geometry::Geometry;
use crate::hyperparams::HyperParams;
use crate::mat::Mat;
use crate::macgrid;

/// The outcome of attempting to derive a full `DerivedParams` from a
/// `(Geometry, HyperParams)` pair. `ok == false` always carries a
/// human-readable `reason`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Verdict {
    fn accept() -> Self {
        Verdict {
            ok: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Verdict {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// A record with one entry per `{A, B}`; the K-bearing roles that `grid`,
/// tile lengths, and workspace-copy quantities are defined for. Indexing
/// with `Mat::C` panics, matching [`Geometry::non_k_dim`]'s convention.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerAB<T>(pub [T; 2]);

impl<T: Copy> PerAB<T> {
    fn ab_index(m: Mat) -> usize {
        match m {
            Mat::A => 0,
            Mat::B => 1,
            Mat::C => panic!("PerAB is only defined for A and B"),
        }
    }

    pub fn get(&self, m: Mat) -> T {
        self.0[Self::ab_index(m)]
    }

    fn set(&mut self, m: Mat, v: T) {
        self.0[Self::ab_index(m)] = v;
    }

    fn from_fn(mut f: impl FnMut(Mat) -> T) -> Self {
        PerAB([f(Mat::A), f(Mat::B)])
    }
}

/// How a matrix reaches the kernel: directly strided from the user's buffer,
/// or through a workspace copy in one of two layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum WorkspaceMode {
    #[default]
    Unused,
    /// aka `cw1`: padded re-layout, coalesced dim widened to a bank-conflict-
    /// free stride.
    Copy,
    /// aka `cw2`: re-tiled into "normal form" along the coalesced dim.
    Nform,
}

/// `u16`/`u32`/`u64` tag for an address computation. Always resolves to
/// [`IntWidth::U64`] today; narrowing is implemented but unreachable pending
/// an explicit opt-in (see DESIGN.md) because promoting upward is always
/// correct and the reference does the same for safety.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum IntWidth {
    U16,
    U32,
    #[default]
    U64,
}

const ENABLE_INT_NARROWING: bool = false;

fn narrowest_for(n_elements: u64) -> IntWidth {
    if n_elements <= u16::MAX as u64 {
        IntWidth::U16
    } else if n_elements <= u32::MAX as u64 {
        IntWidth::U32
    } else {
        IntWidth::U64
    }
}

fn pick_int_width(n_elements: u64) -> IntWidth {
    if ENABLE_INT_NARROWING {
        narrowest_for(n_elements)
    } else {
        IntWidth::U64
    }
}

/// `tints[A|B|C|W]` and `tintk`: the integer widths used in each buffer's
/// address arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct IntWidths {
    pub a: IntWidth,
    pub b: IntWidth,
    pub c: IntWidth,
    pub w: IntWidth,
    pub k: IntWidth,
}

/// The full set of quantities codegen needs, plus the [`Verdict`] that says
/// whether they are trustworthy. Every field besides `geometry`, `hp`, and
/// `verdict` is meaningless (left at its default) when `verdict.ok` is false.
#[derive(Clone, Debug)]
pub struct DerivedParams {
    pub geometry: Geometry,
    pub hp: HyperParams,
    pub verdict: Verdict,

    pub grid: PerAB<u32>,
    pub macro_tile_length: PerAB<u32>,
    pub preshift_final_tile: PerAB<u32>,
    pub n_groups: PerAB<u32>,
    pub main_n_elements_to_load_per_workitem: PerAB<u32>,
    pub main_micro_tile_perp_unroll: PerAB<u32>,
    pub main_micro_tile_pll_unroll: PerAB<u32>,

    pub workspace_mode: PerAB<WorkspaceMode>,
    pub cw1_target_ldx: PerAB<u32>,
    pub cw_n_elements: PerAB<u64>,
    pub cw_global_offset: PerAB<u64>,
    pub cw2_n_macro_tiles_pll_unroll: PerAB<u32>,

    pub main_split_on_k: bool,
    pub main_does_beta_c_inc: bool,
    pub main_n_work_items_per_workgroup: u32,
    pub main_n_work_groups: u32,
    pub main_global_work_size: u32,
    pub main_use_edge_trick: PerAB<bool>,
    pub main_final_fractional_unroll: u32,
    pub int_widths: IntWidths,
    pub ga3_super_column_width: Option<u32>,
    pub ga3_last_super_column_width: Option<u32>,
}

impl DerivedParams {
    fn stub(geometry: &Geometry, hp: &HyperParams, reason: impl Into<String>) -> Self {
        DerivedParams {
            geometry: geometry.clone(),
            hp: *hp,
            verdict: Verdict::reject(reason),
            grid: PerAB::default(),
            macro_tile_length: PerAB::default(),
            preshift_final_tile: PerAB::default(),
            n_groups: PerAB::default(),
            main_n_elements_to_load_per_workitem: PerAB::default(),
            main_micro_tile_perp_unroll: PerAB::default(),
            main_micro_tile_pll_unroll: PerAB::default(),
            workspace_mode: PerAB::default(),
            cw1_target_ldx: PerAB::default(),
            cw_n_elements: PerAB::default(),
            cw_global_offset: PerAB::default(),
            cw2_n_macro_tiles_pll_unroll: PerAB::default(),
            main_split_on_k: false,
            main_does_beta_c_inc: true,
            main_n_work_items_per_workgroup: 0,
            main_n_work_groups: 0,
            main_global_work_size: 0,
            main_use_edge_trick: PerAB::default(),
            main_final_fractional_unroll: 0,
            int_widths: IntWidths::default(),
            ga3_super_column_width: None,
            ga3_last_super_column_width: None,
        }
    }

    /// Runs both construction phases, returning a value either way; check
    /// `.verdict.ok` before handing the result to codegen.
    pub fn build(geometry: &Geometry, hp: &HyperParams) -> Self {
        match Self::phase1(geometry, hp) {
            Err(reason) => Self::stub(geometry, hp, reason),
            Ok(mut params) => {
                params.phase2();
                params
            }
        }
    }

    fn phase1(geometry: &Geometry, hp: &HyperParams) -> Result<Self, String> {
        if hp.micro_tile_height == 0 || hp.micro_tile_width == 0 {
            return Err("micro tile dimension is zero".into());
        }
        if hp.macro_tile_height % hp.micro_tile_height != 0
            || hp.macro_tile_width % hp.micro_tile_width != 0
        {
            return Err("macro tile is not a whole multiple of the micro tile".into());
        }

        let grid = PerAB::from_fn(|m| match m {
            Mat::A => hp.nwitems_h(),
            Mat::B => hp.nwitems_w(),
            Mat::C => unreachable!(),
        });
        let macro_tile_length = PerAB::from_fn(|m| {
            grid.get(m)
                * if m == Mat::A {
                    hp.micro_tile_height
                } else {
                    hp.micro_tile_width
                }
        });

        for m in Mat::AB {
            let nk = geometry.non_k_dim(m);
            if nk < macro_tile_length.get(m) {
                return Err(format!(
                    "tile too large: macro_tile_length for {} ({}) exceeds the problem's non-K dimension ({})",
                    m.letter(),
                    macro_tile_length.get(m),
                    nk
                ));
            }
        }

        let preshift_final_tile = PerAB::from_fn(|m| {
            let nk = geometry.non_k_dim(m);
            let len = macro_tile_length.get(m);
            1 + (nk - 1) % len
        });
        let n_groups = PerAB::from_fn(|m| {
            let nk = geometry.non_k_dim(m);
            let len = macro_tile_length.get(m);
            (nk + len - 1) / len
        });

        let workgroup_size = hp.workgroup_size();
        let denom = (macro_tile_length.get(Mat::A) as u64 * macro_tile_length.get(Mat::B) as u64)
            / (workgroup_size as u64).max(1);
        if denom == 0 {
            return Err("workgroup does not cover the macro tile".into());
        }
        let main_n_elements_to_load_per_workitem = PerAB::from_fn(|m| {
            ((macro_tile_length.get(m) as u64 * hp.unroll as u64) / denom) as u32
        });
        for m in Mat::AB {
            if main_n_elements_to_load_per_workitem.get(m) == 0 {
                return Err(format!(
                    "zero elements to load per workitem for {}",
                    m.letter()
                ));
            }
        }

        // Divisibility: the workgroup must evenly cover each matrix's unroll
        // block, i.e. `macro_tile_length[M] * unroll` elements.
        let n_elements_in_unroll = PerAB::from_fn(|m| macro_tile_length.get(m) * hp.unroll);
        for m in Mat::AB {
            if n_elements_in_unroll.get(m) % workgroup_size != 0 {
                return Err(format!(
                    "workgroup size does not divide the unroll block for {}",
                    m.letter()
                ));
            }
        }

        if hp.unroll_for_offset == 1 && geometry.k <= hp.unroll {
            return Err("UNR must be greater than k when unroll_for_offset is set".into());
        }

        let mut tileability_ok = true;
        let mut tileability_reason = String::new();
        let mut perp_unroll = PerAB::default();
        let mut pll_unroll = PerAB::default();
        for m in Mat::AB {
            match get_tileability(
                macro_tile_length.get(m),
                hp.unroll,
                main_n_elements_to_load_per_workitem.get(m),
                geometry.coal_is_pll_k(m),
            ) {
                Some((perp, pll)) => {
                    perp_unroll.set(m, perp);
                    pll_unroll.set(m, pll);
                }
                None => {
                    tileability_ok = false;
                    tileability_reason = format!("no tileable (perp, pll) factorisation for {}", m.letter());
                }
            }
        }
        if !tileability_ok {
            return Err(tileability_reason);
        }

        Ok(DerivedParams {
            geometry: geometry.clone(),
            hp: *hp,
            verdict: Verdict::accept(),
            grid,
            macro_tile_length,
            preshift_final_tile,
            n_groups,
            main_n_elements_to_load_per_workitem,
            main_micro_tile_perp_unroll: perp_unroll,
            main_micro_tile_pll_unroll: pll_unroll,
            workspace_mode: PerAB::default(),
            cw1_target_ldx: PerAB::default(),
            cw_n_elements: PerAB::default(),
            cw_global_offset: PerAB::default(),
            cw2_n_macro_tiles_pll_unroll: PerAB::default(),
            main_split_on_k: false,
            main_does_beta_c_inc: true,
            main_n_work_items_per_workgroup: workgroup_size,
            main_n_work_groups: 0,
            main_global_work_size: 0,
            main_use_edge_trick: PerAB::default(),
            main_final_fractional_unroll: 0,
            int_widths: IntWidths::default(),
            ga3_super_column_width: None,
            ga3_last_super_column_width: None,
        })
    }

    fn phase2(&mut self) {
        let hp = self.hp;
        let g = self.geometry.clone();

        self.main_split_on_k = hp.n_work_items_per_c_elm != 1;
        self.main_does_beta_c_inc = !self.main_split_on_k;

        self.main_n_work_groups =
            hp.n_work_items_per_c_elm * self.n_groups.get(Mat::A) * self.n_groups.get(Mat::B);
        self.main_global_work_size = self.main_n_work_groups * self.main_n_work_items_per_workgroup;

        self.main_use_edge_trick = PerAB::from_fn(|m| {
            self.preshift_final_tile.get(m) != self.macro_tile_length.get(m)
        });

        self.main_final_fractional_unroll = g.k % hp.unroll;

        for m in Mat::AB {
            let needs_workspace = !g.workspace_sizes().is_empty()
                && ((m == Mat::A && hp.work_item_load_a_pll_to_unroll == 0)
                    || (m == Mat::B && hp.work_item_load_b_pll_to_unroll == 0));
            let mode = if !needs_workspace {
                WorkspaceMode::Unused
            } else if hp.load_to_lds_interwoven == 1 {
                WorkspaceMode::Nform
            } else {
                WorkspaceMode::Copy
            };
            self.workspace_mode.set(m, mode);

            match mode {
                WorkspaceMode::Copy => {
                    let pad = if m == Mat::A { 3 } else { 6 };
                    let smallest = if g.coal_is_pll_k(m) {
                        g.k
                    } else {
                        g.non_k_dim(m)
                    };
                    let grid_align = 16u32;
                    let target = grid_align * ((smallest.saturating_sub(pad) + grid_align - 1) / grid_align) + pad;
                    self.cw1_target_ldx.set(m, target);
                    self.cw_n_elements.set(m, target as u64 * g.uncoal(m) as u64);
                }
                WorkspaceMode::Nform => {
                    let perp_unroll_elems = self.n_groups.get(m) * self.macro_tile_length.get(m);
                    self.cw_n_elements.set(m, perp_unroll_elems as u64 * g.k as u64);
                    self.cw2_n_macro_tiles_pll_unroll
                        .set(m, (g.k + hp.unroll - 1) / hp.unroll);
                }
                WorkspaceMode::Unused => {}
            }
        }
        if self.workspace_mode.get(Mat::A) != WorkspaceMode::Unused {
            self.cw_global_offset
                .set(Mat::B, self.cw_n_elements.get(Mat::A));
        }

        self.int_widths = IntWidths {
            a: pick_int_width(g.padded_area(Mat::A)),
            b: pick_int_width(g.padded_area(Mat::B)),
            c: pick_int_width(g.padded_area(Mat::C)),
            w: pick_int_width(
                self.cw_n_elements.get(Mat::A) + self.cw_n_elements.get(Mat::B),
            ),
            k: pick_int_width(g.k as u64),
        };

        if hp.group_allocation == 3 {
            let budget = if hp.n_work_items_per_c_elm <= 1 {
                hp.n_target_active_workgroups
            } else {
                hp.n_target_active_workgroups / hp.n_work_items_per_c_elm
            };
            if let Some((width, _)) = macgrid::get_grid(budget, self.n_groups.get(Mat::B)) {
                let width = width.max(1);
                self.ga3_super_column_width = Some(width);
                self.ga3_last_super_column_width = Some(self.n_groups.get(Mat::B) % width);
            }
        }
    }

    /// Stride for addressing matrix `m` along a given axis; see
    /// SPEC_FULL.md §4.3 for the `wsmode` table.
    pub fn stride(&self, m: Mat, pll_k: bool, is_macro: bool, wsmode: u8) -> u32 {
        let coal_pll_k = self.geometry.coal_is_pll_k(m);
        match wsmode {
            0 => {
                if coal_pll_k == pll_k {
                    1
                } else {
                    self.geometry.ld(m)
                }
            }
            1 => {
                if coal_pll_k == pll_k {
                    1
                } else {
                    self.cw1_target_ldx.get(m)
                }
            }
            2 => {
                if is_macro {
                    if pll_k {
                        self.macro_tile_length.get(m)
                    } else {
                        self.geometry.k
                    }
                } else if pll_k {
                    self.macro_tile_length.get(m)
                } else {
                    1
                }
            }
            other => panic!("unknown workspace mode {other}"),
        }
    }
}

/// `(ok, reason)` per SPEC_FULL.md §4.3.1, collapsed to `Option<(perp, pll)>`:
/// `Some` is the winning factorisation, `None` is the rejection.
pub fn get_tileability(macro_len: u32, unroll: u32, n_load_per_wi: u32, pll_first: bool) -> Option<(u32, u32)> {
    if n_load_per_wi == 0 {
        return None;
    }
    let divisors_of = |n: u32| -> Vec<u32> {
        (1..=n).filter(|d| n % d == 0).collect()
    };
    let candidate_divisors = divisors_of(n_load_per_wi);

    if pll_first {
        for &pll in candidate_divisors.iter().rev() {
            if unroll % pll != 0 {
                continue;
            }
            let perp = n_load_per_wi / pll;
            if perp != 0 && macro_len % perp == 0 {
                return Some((perp, pll));
            }
        }
    } else {
        for &perp in candidate_divisors.iter().rev() {
            if macro_len % perp != 0 {
                continue;
            }
            let pll = n_load_per_wi / perp;
            if pll != 0 && unroll % pll == 0 {
                return Some((perp, pll));
            }
        }
    }
    None
}

/// Picks tile dimensions for the winning `(perp, pll)` factorisation,
/// preferring `pll_first` or `perp_first` per the boolean argument. Panics
/// only if called after [`get_tileability`] already returned `None` for the
/// same arguments — an internal-invariant violation, not a user error.
pub fn set_tile_dimensions(
    macro_len: u32,
    unroll: u32,
    n_load_per_wi: u32,
    pll_first: bool,
) -> (u32, u32) {
    get_tileability(macro_len, unroll, n_load_per_wi, pll_first)
        .expect("set_tile_dimensions called on an untileable point")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FloatType;

    fn scenario_1_geometry() -> Geometry {
        Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 128, 3072, vec![0], FloatType::F32,
        )
        .unwrap()
    }

    #[test]
    fn tileability_finds_a_factorisation_when_one_exists() {
        assert_eq!(get_tileability(64, 16, 4, true), Some((1, 4)));
        assert_eq!(get_tileability(64, 16, 16, false), Some((16, 1)));
    }

    #[test]
    fn tileability_fails_when_no_factor_pair_exists() {
        assert_eq!(get_tileability(7, 5, 3, true), None);
    }

    #[test]
    fn build_accepts_a_reasonable_tiny_point() {
        let g = scenario_1_geometry();
        let hp = HyperParams::tiny();
        let d = DerivedParams::build(&g, &hp);
        assert!(d.verdict.ok, "{:?}", d.verdict.reason);
        assert_eq!(d.grid.get(Mat::A), 1);
        assert_eq!(d.grid.get(Mat::B), 1);
    }

    #[test]
    fn build_rejects_tile_larger_than_problem() {
        let g = Geometry::simple(4, 4, 16, false, false, vec![], FloatType::F32).unwrap();
        let hp = HyperParams::small(false);
        let d = DerivedParams::build(&g, &hp);
        assert!(!d.verdict.ok);
    }

    #[test]
    fn split_on_k_tracks_ice() {
        let g = scenario_1_geometry();
        let mut hp = HyperParams::small(false);
        hp.n_work_items_per_c_elm = 1;
        let d = DerivedParams::build(&g, &hp);
        assert!(d.verdict.ok);
        assert!(!d.main_split_on_k);
        assert!(d.main_does_beta_c_inc);
    }

    #[test]
    fn ga3_super_column_only_set_for_ga3() {
        let g = scenario_1_geometry();
        let mut hp = HyperParams::small(false);
        hp.group_allocation = 1;
        let d = DerivedParams::build(&g, &hp);
        assert!(d.ga3_super_column_width.is_none());
    }

    #[test]
    fn scenario_3_macro_larger_than_problem_rejects_with_macro_tile_length_reason() {
        // m=1024 with a macro tile of 2048 in the M dimension cannot fit.
        let g = Geometry::simple(1024, 1024, 64, false, false, vec![], FloatType::F32).unwrap();
        let hp = HyperParams::parse(
            "Y2048_X8_y8_x8_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1_ICE1_NAW64_UFO0",
        )
        .unwrap();
        let d = DerivedParams::build(&g, &hp);
        assert!(!d.verdict.ok);
        assert!(d.verdict.reason.unwrap().contains("macro_tile_length"));
    }

    #[test]
    fn scenario_4_ufo_with_unroll_not_greater_than_k_rejects() {
        let g = Geometry::simple(64, 64, 16, false, false, vec![], FloatType::F32).unwrap();
        let mut hp = HyperParams::small(false);
        hp.unroll = 16;
        hp.unroll_for_offset = 1;
        let d = DerivedParams::build(&g, &hp);
        assert!(!d.verdict.ok);
        assert!(d
            .verdict
            .reason
            .unwrap()
            .contains("UNR must be greater than k"));
    }
}
