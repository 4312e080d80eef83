//! The discrete hyperparameter vector and its neighbor graph.
//!
//! A [`HyperParams`] is a fixed-shape record of 15 unsigned integers. Field
//! access by short key goes through a single schema table (§9 design note:
//! "replace reflection with an exhaustive (key, getter/setter) table"), and
//! [`HyperParams::one_aways`] enumerates the local-search neighbor graph used
//! by [`crate::search`].

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::geometry::Geometry;

/// Errors raised while parsing a [`HyperParams`] wire string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HpError {
    #[error("bad hyperparams string: {0}")]
    BadHpString(String),
}

/// The 15-field tuning vector. Field names match SPEC_FULL.md §3; the short
/// keys used on the wire are given in the `SCHEMA` table below.
#[derive(Copy, Clone, Debug)]
pub struct HyperParams {
    pub macro_tile_height: u32,
    pub macro_tile_width: u32,
    pub micro_tile_height: u32,
    pub micro_tile_width: u32,
    pub unroll: u32,
    pub pad: u32,
    pub group_allocation: u32,
    pub work_item_load_a_pll_to_unroll: u32,
    pub work_item_load_b_pll_to_unroll: u32,
    pub unroll_pragma: u32,
    pub load_to_lds_interwoven: u32,
    pub c_micro_tiles_interwoven: u32,
    pub n_work_items_per_c_elm: u32,
    pub n_target_active_workgroups: u32,
    pub unroll_for_offset: u32,
}

type Getter = fn(&HyperParams) -> u32;
type Setter = fn(&mut HyperParams, u32);

/// `(short_key, getter, setter)`, in canonical wire order. The single source
/// of truth for parsing, serialization, and by-name access.
const SCHEMA: [(&str, Getter, Setter); 15] = [
    ("Y", |h| h.macro_tile_height, |h, v| h.macro_tile_height = v),
    ("X", |h| h.macro_tile_width, |h, v| h.macro_tile_width = v),
    ("y", |h| h.micro_tile_height, |h, v| h.micro_tile_height = v),
    ("x", |h| h.micro_tile_width, |h, v| h.micro_tile_width = v),
    ("U", |h| h.unroll, |h, v| h.unroll = v),
    ("P", |h| h.pad, |h, v| h.pad = v),
    (
        "GA",
        |h| h.group_allocation,
        |h, v| h.group_allocation = v,
    ),
    (
        "APLU",
        |h| h.work_item_load_a_pll_to_unroll,
        |h, v| h.work_item_load_a_pll_to_unroll = v,
    ),
    (
        "BPLU",
        |h| h.work_item_load_b_pll_to_unroll,
        |h, v| h.work_item_load_b_pll_to_unroll = v,
    ),
    ("PU", |h| h.unroll_pragma, |h, v| h.unroll_pragma = v),
    (
        "LIW",
        |h| h.load_to_lds_interwoven,
        |h, v| h.load_to_lds_interwoven = v,
    ),
    (
        "MIW",
        |h| h.c_micro_tiles_interwoven,
        |h, v| h.c_micro_tiles_interwoven = v,
    ),
    (
        "ICE",
        |h| h.n_work_items_per_c_elm,
        |h, v| h.n_work_items_per_c_elm = v,
    ),
    (
        "NAW",
        |h| h.n_target_active_workgroups,
        |h, v| h.n_target_active_workgroups = v,
    ),
    (
        "UFO",
        |h| h.unroll_for_offset,
        |h, v| h.unroll_for_offset = v,
    ),
];

impl HyperParams {
    /// Reads a field by its short key (`"Y"`, `"ICE"`, ...).
    pub fn get(&self, short_key: &str) -> Option<u32> {
        SCHEMA
            .iter()
            .find(|(k, _, _)| *k == short_key)
            .map(|(_, get, _)| get(self))
    }

    fn set(&mut self, short_key: &str, value: u32) -> bool {
        if let Some((_, _, set)) = SCHEMA.iter().find(|(k, _, _)| *k == short_key) {
            set(self, value);
            true
        } else {
            false
        }
    }

    /// Builds a `HyperParams` from a `short_key -> value` map. All 15 keys
    /// must be present; unknown keys are rejected.
    pub fn from_map(map: &HashMap<&str, u32>) -> Result<Self, HpError> {
        let mut bad = Vec::new();
        for (key, _) in map {
            if !SCHEMA.iter().any(|(k, _, _)| k == key) {
                bad.push(format!("unknown key `{key}`"));
            }
        }
        for (key, _, _) in SCHEMA {
            if !map.contains_key(key) {
                bad.push(format!("missing required key `{key}`"));
            }
        }
        if !bad.is_empty() {
            return Err(HpError::BadHpString(bad.join("; ")));
        }

        let mut hp = HyperParams::zeroed();
        for (key, val) in map {
            hp.set(key, *val);
        }
        Ok(hp)
    }

    fn zeroed() -> Self {
        HyperParams {
            macro_tile_height: 0,
            macro_tile_width: 0,
            micro_tile_height: 0,
            micro_tile_width: 0,
            unroll: 0,
            pad: 0,
            group_allocation: 0,
            work_item_load_a_pll_to_unroll: 0,
            work_item_load_b_pll_to_unroll: 0,
            unroll_pragma: 0,
            load_to_lds_interwoven: 0,
            c_micro_tiles_interwoven: 0,
            n_work_items_per_c_elm: 0,
            n_target_active_workgroups: 0,
            unroll_for_offset: 0,
        }
    }

    /// Parses the `_`-joined wire form; any permutation of the 15 tokens is
    /// accepted.
    pub fn parse(s: &str) -> Result<Self, HpError> {
        let mut map: HashMap<&str, u32> = HashMap::new();
        for frag in s.split('_').filter(|f| !f.is_empty()) {
            let split_at = frag
                .find(|c: char| c.is_ascii_digit())
                .ok_or_else(|| HpError::BadHpString(format!("no value in `{frag}`")))?;
            let (key, val_str) = frag.split_at(split_at);
            let val: u32 = val_str
                .parse()
                .map_err(|_| HpError::BadHpString(format!("non-numeric value in `{frag}`")))?;
            if map.insert(key, val).is_some() {
                return Err(HpError::BadHpString(format!("key `{key}` repeated")));
            }
        }
        HyperParams::from_map(&map)
    }

    /// Emits the 15 tokens in fixed schema order, e.g.
    /// `Y8_X8_y1_x1_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1_ICE3_NAW64_UFO0`.
    pub fn serialize(&self) -> String {
        SCHEMA
            .iter()
            .map(|(key, get, _)| format!("{key}{}", get(self)))
            .collect::<Vec<_>>()
            .join("_")
    }

    #[inline]
    pub fn workgroup_size(&self) -> u32 {
        (self.macro_tile_height * self.macro_tile_width)
            / (self.micro_tile_height * self.micro_tile_width)
    }

    #[inline]
    pub fn nwitems_h(&self) -> u32 {
        self.macro_tile_height / self.micro_tile_height
    }

    #[inline]
    pub fn nwitems_w(&self) -> u32 {
        self.macro_tile_width / self.micro_tile_width
    }

    /// The "tiny" default: 1x1 macro, 1x1 micro. Used when `m<8 || n<8`.
    pub fn tiny() -> Self {
        HyperParams::parse(
            "Y1_X1_y1_x1_U16_P1_GA1_APLU0_BPLU1_PU1_LIW0_MIW1_ICE1_NAW64_UFO0",
        )
        .expect("literal is a valid hyperparams string")
    }

    /// The "small" default: 8x8 macro, 1x1 micro, unroll=16. `ICE=3` unless
    /// `deterministic`, in which case `ICE` is clamped to 1.
    pub fn small(deterministic: bool) -> Self {
        let ice = if deterministic { 1 } else { 3 };
        let mut hp = HyperParams::parse(&format!(
            "Y8_X8_y1_x1_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1_ICE{ice}_NAW64_UFO0"
        ))
        .expect("literal is a valid hyperparams string");
        hp.n_work_items_per_c_elm = ice;
        hp
    }

    /// `macro_tile_height <= m && macro_tile_width <= n`, the coarse
    /// applicability filter ahead of the precise Phase-1 checks in
    /// [`crate::derived`].
    pub fn can_be_used_on(&self, g: &Geometry) -> bool {
        self.macro_tile_height <= g.m && self.macro_tile_width <= g.n
    }

    /// Canonical string comparison, per SPEC_FULL.md §4.2 ("equality via
    /// canonical string").
    pub fn canonical_eq(&self, other: &HyperParams) -> bool {
        self.serialize() == other.serialize()
    }
}

impl PartialEq for HyperParams {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_eq(other)
    }
}
impl Eq for HyperParams {}

impl std::hash::Hash for HyperParams {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serialize().hash(state);
    }
}

// ============================================================================
// Neighbor graph (`one_aways` / `two_aways`)
// ============================================================================

const MICRO_COORDS: [u32; 7] = [1, 2, 3, 4, 5, 6, 8];

fn micro_step_neighbors(v: u32) -> &'static [u32] {
    match v {
        1 => &[1, 2],
        2 => &[1, 2, 3, 4],
        3 => &[2, 3, 4],
        4 => &[2, 3, 4, 5, 6],
        5 => &[4, 5, 6, 8],
        6 => &[4, 5, 6, 8],
        8 => &[6, 8],
        _ => &[],
    }
}

fn micro_step_admissible(y: u32, x: u32, yp: u32, xp: u32) -> bool {
    if !MICRO_COORDS.contains(&y) || !MICRO_COORDS.contains(&x) {
        return false;
    }
    // Not-too-skinny.
    if (yp as i64 - xp as i64).abs() > 4 {
        return false;
    }
    // Skew-change bounded.
    let skew_old = y as f64 / x as f64;
    let skew_new = yp as f64 / xp as f64;
    let skew_ratio = skew_old / skew_new;
    if !(0.5 < skew_ratio && skew_ratio < 2.0) {
        return false;
    }
    // Volume-change bounded, unless both new coords are even.
    if !(yp % 2 == 0 && xp % 2 == 0) {
        let vol_old = (y * x) as f64;
        let vol_new = (yp * xp) as f64;
        let vol_ratio = vol_old / vol_new;
        if !(0.5 < vol_ratio && vol_ratio < 2.0) {
            return false;
        }
    }
    // (5,8)/(8,5) only reachable from (4,8)/(8,4) respectively.
    if (yp, xp) == (5, 8) && (y, x) != (4, 8) {
        return false;
    }
    if (yp, xp) == (8, 5) && (y, x) != (8, 4) {
        return false;
    }
    true
}

/// Expert-tuned canonical HP strings gated by predicates on the current
/// point; see SPEC_FULL.md §4.2 for the exact gates.
fn custom_edges(hp: &HyperParams, g: &Geometry) -> Vec<HyperParams> {
    let y = hp.micro_tile_height;
    let x = hp.micro_tile_width;
    let ice = hp.n_work_items_per_c_elm;

    let mut candidates: Vec<(bool, &str)> = Vec::new();
    candidates.push((
        (y, x) == (1, 1),
        "Y8_X8_y1_x1_U16_P1_GA1_APLU0_BPLU1_PU1_LIW0_MIW1_ICE1_NAW64_UFO0",
    ));
    candidates.push((
        (y, x) == (1, 1) && ice < 4,
        "Y16_X16_y2_x2_U16_P1_GA1_APLU0_BPLU1_PU1_LIW0_MIW1_ICE6_NAW64_UFO0",
    ));
    candidates.push((
        (y, x) == (2, 2),
        "Y16_X16_y2_x2_U32_P1_GA2_APLU0_BPLU1_PU1_LIW0_MIW1_ICE3_NAW64_UFO0",
    ));
    candidates.push((
        (g.m as u64) * (g.n as u64) >= 4096 * 4096 && g.k <= 64,
        "Y128_X128_y8_x8_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1_ICE1_NAW64_UFO0",
    ));
    candidates.push((
        g.is_col_major && g.t(crate::mat::Mat::A),
        "Y96_X64_y6_x4_U16_P1_GA2_APLU0_BPLU0_PU1_LIW1_MIW1_ICE5_NAW64_UFO0",
    ));
    candidates.push((
        (y, x) == (4, 4),
        "Y64_X64_y4_x4_U16_P1_GA2_APLU1_BPLU0_PU0_LIW1_MIW1_ICE4_NAW64_UFO0",
    ));

    candidates
        .into_iter()
        .filter(|(gate, _)| *gate)
        .filter_map(|(_, s)| HyperParams::parse(s).ok())
        .filter(|cand| cand.can_be_used_on(g))
        .collect()
}

impl HyperParams {
    /// Enumerates HPs one design step away from `self`, shuffled, bounding
    /// the expected time to the first improving candidate in local search.
    pub fn one_aways(&self, g: &Geometry, rng: &mut impl Rng) -> Vec<HyperParams> {
        let mut out = Vec::new();
        let y = self.micro_tile_height;
        let x = self.micro_tile_width;
        let nh = self.nwitems_h();
        let nw = self.nwitems_w();

        // 1. Micro-tile step graph.
        for &yp in micro_step_neighbors(y) {
            for &xp in micro_step_neighbors(x) {
                if !micro_step_admissible(y, x, yp, xp) {
                    continue;
                }
                let mut cand = *self;
                cand.micro_tile_height = yp;
                cand.micro_tile_width = xp;
                cand.macro_tile_height = yp * nh;
                cand.macro_tile_width = xp * nw;
                out.push(cand);

                if rng.gen_bool(1.0 / 3.0) {
                    let area_old = (y * x) as i64;
                    let area_new = (yp * xp) as i64;
                    let ice = self.n_work_items_per_c_elm;
                    let new_ice = if area_new < area_old {
                        Some(ice.saturating_sub(1)).filter(|&v| v > 0)
                    } else if area_new > area_old && ice > 1 {
                        Some(ice + 1)
                    } else {
                        None
                    };
                    if let Some(ice2) = new_ice {
                        let mut cand2 = cand;
                        cand2.n_work_items_per_c_elm = ice2;
                        out.push(cand2);
                    }
                }
            }
        }

        // 2. ICE sweep at fixed tile.
        let ice = self.n_work_items_per_c_elm as i64;
        for delta in [-4i64, -2, -1, 1, 2, 4, 8] {
            let new_ice = ice + delta;
            if new_ice <= 0 {
                continue;
            }
            let ratio = new_ice.max(ice) as f64 / new_ice.min(ice) as f64;
            if ratio > 2.0 {
                continue;
            }
            let mut cand = *self;
            cand.n_work_items_per_c_elm = new_ice as u32;
            if cand.n_work_items_per_c_elm > 1 {
                cand.unroll_for_offset = 0;
            }
            out.push(cand);
        }

        // 3. Standard tilings: macro in {8*micro, 16*micro}.
        for mult in [8u32, 16] {
            let mut cand = *self;
            cand.macro_tile_height = mult * y;
            cand.macro_tile_width = mult * x;
            out.push(cand);
        }

        // 4. Unroll sweep.
        let u = self.unroll as i64;
        for delta in [-16i64, -8, 8, 16] {
            let new_u = u + delta;
            if new_u <= 0 || new_u > 60 {
                continue;
            }
            let mut cand = *self;
            cand.unroll = new_u as u32;
            if cand.unroll > 8 {
                cand.unroll_for_offset = 0;
            }
            out.push(cand);
        }

        // 5. Binary / small-enum toggles.
        for &v in &[0u32, 1] {
            if v != self.pad {
                let mut cand = *self;
                cand.pad = v;
                out.push(cand);
            }
        }
        for &v in &[1u32, 2, 3] {
            if v != self.group_allocation {
                let mut cand = *self;
                cand.group_allocation = v;
                out.push(cand);
            }
        }
        for (field, cur) in [
            (Field::Aplu, self.work_item_load_a_pll_to_unroll),
            (Field::Bplu, self.work_item_load_b_pll_to_unroll),
            (Field::Pu, self.unroll_pragma),
            (Field::Liw, self.load_to_lds_interwoven),
            (Field::Miw, self.c_micro_tiles_interwoven),
            (Field::Ufo, self.unroll_for_offset),
        ] {
            let other = 1 - cur.min(1);
            let mut cand = *self;
            field.set(&mut cand, other);
            if field == Field::Ufo {
                cand.unroll_pragma = 1;
            }
            out.push(cand);
        }

        // 6. Coupled jump when ICE >= 4.
        if self.n_work_items_per_c_elm >= 4 {
            let mut cand = *self;
            cand.unroll = 16 * (self.unroll / 16 + 1);
            cand.n_work_items_per_c_elm = 2 * (self.n_work_items_per_c_elm / 4);
            out.push(cand);
        }

        // 7. Custom expert edges.
        out.extend(custom_edges(self, g));

        out.retain(|cand| cand.can_be_used_on(g));
        out.shuffle(rng);
        out
    }

    /// De-duplicated union of `one_aways` applied to every member of
    /// `self.one_aways(g, rng)`.
    pub fn two_aways(&self, g: &Geometry, rng: &mut impl Rng) -> Vec<HyperParams> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for hp in self.one_aways(g, rng) {
            for hp2 in hp.one_aways(g, rng) {
                let key = hp2.serialize();
                if seen.insert(key) {
                    out.push(hp2);
                }
            }
        }
        out.shuffle(rng);
        out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Field {
    Aplu,
    Bplu,
    Pu,
    Liw,
    Miw,
    Ufo,
}

impl Field {
    fn set(self, hp: &mut HyperParams, v: u32) {
        match self {
            Field::Aplu => hp.work_item_load_a_pll_to_unroll = v,
            Field::Bplu => hp.work_item_load_b_pll_to_unroll = v,
            Field::Pu => hp.unroll_pragma = v,
            Field::Liw => hp.load_to_lds_interwoven = v,
            Field::Miw => hp.c_micro_tiles_interwoven = v,
            Field::Ufo => hp.unroll_for_offset = v,
        }
    }
}

/// Selects [`HyperParams::tiny`] when `m<8 || n<8`, else [`HyperParams::small`].
pub fn get_default(g: &Geometry, deterministic: bool) -> HyperParams {
    if g.m < 8 || g.n < 8 {
        HyperParams::tiny()
    } else {
        HyperParams::small(deterministic)
    }
}

/// Forces `ICE` to 1 regardless of source, the deterministic-kernel override
/// applied uniformly whether an HP came from the cache, a default, or a
/// search candidate.
pub fn clamp_deterministic(mut hp: HyperParams) -> HyperParams {
    hp.n_work_items_per_c_elm = 1;
    hp
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scenario_1_geometry() -> Geometry {
        Geometry::parse("tC0_tA1_tB0_colMaj1_m1024_n128_k3072_lda3072_ldb3072_ldc1024_f32")
            .unwrap()
    }

    #[test]
    fn round_trip() {
        let hp = HyperParams::small(false);
        let s = hp.serialize();
        assert_eq!(HyperParams::parse(&s).unwrap(), hp);
    }

    #[test]
    fn parse_accepts_any_permutation() {
        let canonical =
            "Y8_X8_y1_x1_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1_ICE3_NAW64_UFO0";
        let shuffled =
            "ICE3_UFO0_Y8_NAW64_X8_y1_x1_U16_P1_GA1_APLU0_BPLU0_PU1_LIW0_MIW1";
        assert_eq!(
            HyperParams::parse(canonical).unwrap(),
            HyperParams::parse(shuffled).unwrap()
        );
    }

    #[test]
    fn tiny_matches_scenario_2() {
        assert_eq!(
            HyperParams::tiny().serialize(),
            "Y1_X1_y1_x1_U16_P1_GA1_APLU0_BPLU1_PU1_LIW0_MIW1_ICE1_NAW64_UFO0"
        );
    }

    #[test]
    fn get_default_picks_tiny_for_small_problems() {
        let g = Geometry::simple(7, 7, 16, false, false, vec![], crate::geometry::FloatType::F32)
            .unwrap();
        assert_eq!(get_default(&g, false), HyperParams::tiny());
    }

    #[test]
    fn deterministic_small_clamps_ice_to_one() {
        assert_eq!(HyperParams::small(true).n_work_items_per_c_elm, 1);
    }

    #[test]
    fn workgroup_size_arithmetic() {
        let hp = HyperParams::parse(
            "Y96_X64_y6_x4_U16_P1_GA2_APLU0_BPLU0_PU1_LIW1_MIW1_ICE5_NAW64_UFO0",
        )
        .unwrap();
        assert_eq!(hp.nwitems_h(), 16);
        assert_eq!(hp.nwitems_w(), 16);
        assert_eq!(hp.workgroup_size(), 256);
    }

    #[test]
    fn one_aways_contains_micro_step_and_custom_edge() {
        let g = scenario_1_geometry();
        let hp = HyperParams::small(false);
        let mut rng = StdRng::seed_from_u64(42);
        let neighbors = hp.one_aways(&g, &mut rng);

        let has_micro_step = neighbors
            .iter()
            .any(|c| c.micro_tile_height == 2 && c.micro_tile_width == 2);
        assert!(has_micro_step, "expected a (1,1)->(2,2) micro-tile step");

        let custom = HyperParams::parse(
            "Y16_X16_y2_x2_U16_P1_GA1_APLU0_BPLU1_PU1_LIW0_MIW1_ICE6_NAW64_UFO0",
        )
        .unwrap();
        assert!(
            neighbors.iter().any(|c| *c == custom),
            "expected the custom expert edge to be present"
        );
    }

    #[test]
    fn two_aways_is_deduplicated_union() {
        let g = scenario_1_geometry();
        let hp = HyperParams::small(false);
        let mut rng = StdRng::seed_from_u64(7);
        let twos = hp.two_aways(&g, &mut rng);
        let mut seen = std::collections::HashSet::new();
        for t in &twos {
            assert!(seen.insert(t.serialize()), "two_aways must be deduplicated");
        }
    }

    #[test]
    fn bad_hp_string_rejected() {
        assert!(HyperParams::parse("Y8_X8_y1_x1").is_err());
    }
}
