//! Problem geometry: the canonical description of a GEMM instance.
//!
//! A `Geometry` is an immutable value object validated once at construction
//! (`ld[M] >= coal(M)` for each matrix, a recognised float type) and then
//! freely cloned and compared for the rest of its lifetime. Canonical string
//! round-tripping and a distance metric (used for nearest-cache-entry lookup,
//! see [`crate::cache`]) live here alongside the coalescence arithmetic every
//! other module depends on.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::mat::{Mat, PerMat};

/// 32-bit or 64-bit IEEE floating point, the only two precisions this crate
/// generates kernels for (see the crate's Non-goals: no complex, no <32-bit).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FloatType {
    F32,
    F64,
}

impl FloatType {
    #[inline]
    pub fn size_bits(self) -> u32 {
        match self {
            FloatType::F32 => 32,
            FloatType::F64 => 64,
        }
    }

    #[inline]
    pub fn size_bytes(self) -> u32 {
        self.size_bits() / 8
    }

    fn from_bits(bits: u32) -> Result<Self, GeometryError> {
        match bits {
            32 => Ok(FloatType::F32),
            64 => Ok(FloatType::F64),
            other => Err(GeometryError::InvalidGeometry(format!(
                "float_type with {other} bits is not one of {{32, 64}}"
            ))),
        }
    }
}

/// Errors raised while constructing or parsing a [`Geometry`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("bad geometry string: {0}")]
    BadGeometryString(String),
}

/// A validated, immutable GEMM problem description.
///
/// Construct via [`Geometry::new`], [`Geometry::simple`], [`Geometry::tight`],
/// or [`Geometry::parse`]. All are fallible except `tight`, which is known
/// valid by inspection (used only to build minimal fixtures for tests).
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub is_col_major: bool,
    t: PerMat<bool>,
    ld: PerMat<u32>,
    pub m: u32,
    pub n: u32,
    pub k: u32,
    /// Usable scratch elements, one entry per workspace buffer. Sorted
    /// descending at construction, matching the reference implementation
    /// (the order itself carries no semantics, but equality/serialization
    /// must be stable).
    workspace_sizes: Vec<u32>,
    pub float_type: FloatType,

    // Cached distance-metric coordinates; recomputed only at construction.
    metric_co: [f64; 6],
    ws_sufficiency: [bool; 5],
}

impl Geometry {
    /// Full constructor. Validates `ld[M] >= coal(M)` for each matrix and
    /// that `float_type` is one of the two accepted widths.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        is_col_major: bool,
        t_a: bool,
        t_b: bool,
        t_c: bool,
        lda: u32,
        ldb: u32,
        ldc: u32,
        m: u32,
        n: u32,
        k: u32,
        mut workspace_sizes: Vec<u32>,
        float_type: FloatType,
    ) -> Result<Self, GeometryError> {
        workspace_sizes.sort_unstable_by(|a, b| b.cmp(a));

        let mut g = Geometry {
            is_col_major,
            t: PerMat([t_a, t_b, t_c]),
            ld: PerMat([lda, ldb, ldc]),
            m,
            n,
            k,
            workspace_sizes,
            float_type,
            metric_co: [0.0; 6],
            ws_sufficiency: [false; 5],
        };
        g.check_ld_consistent()?;
        g.recompute_distance_cache();
        Ok(g)
    }

    /// Convenience constructor for a row-major `C`, with `lda`/`ldb` set to
    /// the minimal value implied by `(m, n, k, t_a, t_b)`. Grounded in the
    /// reference's delegating `Geometry(m_, n_, k_, tA_, tB_, wSS, ftype)`
    /// constructor.
    pub fn simple(
        m: u32,
        n: u32,
        k: u32,
        t_a: bool,
        t_b: bool,
        workspace_sizes: Vec<u32>,
        float_type: FloatType,
    ) -> Result<Self, GeometryError> {
        let lda = if t_a { k } else { m };
        let ldb = if t_b { n } else { k };
        Geometry::new(
            true,
            t_a,
            t_b,
            false,
            lda,
            ldb,
            m,
            m,
            n,
            k,
            workspace_sizes,
            float_type,
        )
    }

    /// A minimal, always-valid geometry used to build fixtures in tests.
    pub fn tight(n_workspaces: usize) -> Self {
        Geometry::new(
            false,
            false,
            false,
            false,
            1,
            1,
            1,
            1,
            1,
            1,
            vec![1; n_workspaces],
            FloatType::F32,
        )
        .expect("tight geometry is valid by construction")
    }

    #[inline]
    pub fn t(&self, m: Mat) -> bool {
        *self.t.get(m)
    }

    #[inline]
    pub fn ld(&self, m: Mat) -> u32 {
        *self.ld.get(m)
    }

    #[inline]
    pub fn workspace_sizes(&self) -> &[u32] {
        &self.workspace_sizes
    }

    #[inline]
    pub fn workspace_size_total(&self) -> u64 {
        self.workspace_sizes.iter().map(|&x| x as u64).sum()
    }

    /// `gate(M) = ((t[M] == is_col_major) == want_coal)`, then the coal/uncoal
    /// table of §4.1.
    fn padless_dim(&self, m: Mat, want_coal: bool) -> u32 {
        let gate = (self.t(m) == self.is_col_major) == want_coal;
        match m {
            Mat::A => {
                if gate {
                    self.k
                } else {
                    self.m
                }
            }
            Mat::B => {
                if gate {
                    self.n
                } else {
                    self.k
                }
            }
            Mat::C => {
                if gate {
                    self.n
                } else {
                    self.m
                }
            }
        }
    }

    #[inline]
    pub fn coal(&self, m: Mat) -> u32 {
        self.padless_dim(m, true)
    }

    #[inline]
    pub fn uncoal(&self, m: Mat) -> u32 {
        self.padless_dim(m, false)
    }

    /// `((is_col_major + t[M] + [M==A]) mod 2) == 1`.
    pub fn coal_is_pll_k(&self, m: Mat) -> bool {
        let sum = self.is_col_major as u32 + self.t(m) as u32 + (m == Mat::A) as u32;
        sum % 2 == 1
    }

    /// The algebraic size along the non-K axis: `m` for A, `n` for B.
    pub fn non_k_dim(&self, m: Mat) -> u32 {
        match m {
            Mat::A => self.m,
            Mat::B => self.n,
            Mat::C => panic!("non_k_dim is only defined for A and B"),
        }
    }

    #[inline]
    pub fn padded_area(&self, m: Mat) -> u64 {
        self.uncoal(m) as u64 * self.ld(m) as u64
    }

    #[inline]
    pub fn gflops(&self, seconds: f64) -> f64 {
        (2.0 * self.m as f64 * self.n as f64 * self.k as f64) / (1e9 * seconds)
    }

    fn check_ld_consistent(&self) -> Result<(), GeometryError> {
        let mut bad = Vec::new();
        for m in Mat::ALL {
            let coal = self.coal(m);
            if self.ld(m) < coal {
                bad.push(format!(
                    "ld{} ({}) < coal_{} ({})",
                    m.letter(),
                    self.ld(m),
                    m.letter(),
                    coal
                ));
            }
        }
        if bad.is_empty() {
            Ok(())
        } else {
            Err(GeometryError::InvalidGeometry(format!(
                "leading dimensions inconsistent with m,n,k: {}",
                bad.join("; ")
            )))
        }
    }

    fn recompute_distance_cache(&mut self) {
        let log2 = f64::log2;
        self.metric_co[0] = log2(self.k as f64);
        self.metric_co[1] = log2(self.m as f64) - log2(self.n as f64);
        self.metric_co[2] = log2(self.m as f64) + log2(self.n as f64);
        self.metric_co[3] = 0.2 * log2(self.ld(Mat::A) as f64);
        self.metric_co[4] = 0.2 * log2(self.ld(Mat::B) as f64);
        self.metric_co[5] = 0.2 * log2(self.ld(Mat::C) as f64);

        let pad_cost_a = self.uncoal(Mat::A) as u64 * (self.coal(Mat::A) as u64 + 16);
        let pad_cost_b = self.uncoal(Mat::B) as u64 * (self.coal(Mat::B) as u64 + 16);
        let ws0 = self.workspace_size_total();
        self.ws_sufficiency = [
            pad_cost_a < ws0,
            pad_cost_b < ws0,
            pad_cost_a + pad_cost_b < ws0,
            2 * (pad_cost_a + pad_cost_b) < ws0,
            4 * (pad_cost_a + pad_cost_b) < ws0,
        ];
    }

    fn same_transposes(&self, other: &Geometry) -> bool {
        self.is_col_major == other.is_col_major
            && self.t(Mat::A) == other.t(Mat::A)
            && self.t(Mat::B) == other.t(Mat::B)
            && self.t(Mat::C) == other.t(Mat::C)
    }

    /// Distance used for nearest-cache-entry lookup; see SPEC_FULL.md §4.1
    /// for the exact formula this implements.
    pub fn distance(&self, other: &Geometry) -> f64 {
        if !self.same_transposes(other) {
            return f64::INFINITY;
        }

        let mut d: f64 = self
            .metric_co
            .iter()
            .zip(other.metric_co.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();

        for x in [2u32, 4, 8] {
            for m in Mat::ALL {
                let a = self.ld(m) % x == 0;
                let b = other.ld(m) % x == 0;
                d += 0.2 * (a != b) as u32 as f64;
            }
        }

        for x in [256u32, 512, 1024] {
            for m in Mat::ALL {
                let ra = (self.ld(m) % x).min(x - self.ld(m) % x) % 4;
                let rb = (other.ld(m) % x).min(x - other.ld(m) % x) % 4;
                d += 0.2 * (ra != rb) as u32 as f64;
            }
        }

        for i in 0..5 {
            d += 0.2 * (self.ws_sufficiency[i] != other.ws_sufficiency[i]) as u32 as f64;
        }

        d += 1e-5 * (self.workspace_sizes != other.workspace_sizes) as u32 as f64;

        d
    }

    /// Canonical string form: `tC<b>_tA<b>_tB<b>_colMaj<b>_m<n>_n<n>_k<n>_lda<n>_ldb<n>_ldc<n>[_ws<n>]*_f<bits>`.
    pub fn serialize(&self) -> String {
        let mut s = String::new();
        write!(
            s,
            "tC{}_tA{}_tB{}_colMaj{}_m{}_n{}_k{}_lda{}_ldb{}_ldc{}",
            self.t(Mat::C) as u8,
            self.t(Mat::A) as u8,
            self.t(Mat::B) as u8,
            self.is_col_major as u8,
            self.m,
            self.n,
            self.k,
            self.ld(Mat::A),
            self.ld(Mat::B),
            self.ld(Mat::C),
        )
        .unwrap();
        for ws in &self.workspace_sizes {
            write!(s, "_ws{ws}").unwrap();
        }
        write!(s, "_f{}", self.float_type.size_bits()).unwrap();
        s
    }

    /// Parses the canonical string form produced by [`Geometry::serialize`].
    ///
    /// All of `colMaj, tA, tB, tC, m, n, k, lda, ldb, ldc, f` are required;
    /// `ws` is optional and may repeat. Unknown keys or a repeated
    /// non-`ws` key are rejected.
    pub fn parse(s: &str) -> Result<Self, GeometryError> {
        const REQUIRED: &[&str] = &[
            "colMaj", "tA", "tB", "tC", "m", "n", "k", "lda", "ldb", "ldc", "f",
        ];

        let mut map: HashMap<&str, Vec<u64>> = HashMap::new();
        for frag in s.split('_').filter(|f| !f.is_empty()) {
            let split_at = frag
                .find(|c: char| c.is_ascii_digit())
                .ok_or_else(|| GeometryError::BadGeometryString(format!("no value in `{frag}`")))?;
            let (key, val_str) = frag.split_at(split_at);
            let val: u64 = val_str.parse().map_err(|_| {
                GeometryError::BadGeometryString(format!("non-numeric value in `{frag}`"))
            })?;
            map.entry(key).or_default().push(val);
        }

        let mut bad = Vec::new();
        for (key, vals) in &map {
            if *key != "ws" && vals.len() != 1 {
                bad.push(format!("key `{key}` appears {} times", vals.len()));
            }
            if !REQUIRED.contains(key) && *key != "ws" {
                bad.push(format!("key `{key}` is not valid"));
            }
        }
        for key in REQUIRED {
            if !map.contains_key(key) {
                bad.push(format!("missing required key `{key}`"));
            }
        }
        if !bad.is_empty() {
            return Err(GeometryError::BadGeometryString(bad.join("; ")));
        }

        let one = |k: &str| map.get(k).unwrap()[0];
        let ws = map.get("ws").cloned().unwrap_or_default();

        Geometry::new(
            one("colMaj") != 0,
            one("tA") != 0,
            one("tB") != 0,
            one("tC") != 0,
            one("lda") as u32,
            one("ldb") as u32,
            one("ldc") as u32,
            one("m") as u32,
            one("n") as u32,
            one("k") as u32,
            ws.into_iter().map(|v| v as u32).collect(),
            FloatType::from_bits(one("f") as u32)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_1() -> Geometry {
        Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 128, 3072, vec![0], FloatType::F32,
        )
        .unwrap()
    }

    #[test]
    fn round_trip_scenario_1() {
        let g = scenario_1();
        let s = g.serialize();
        assert_eq!(
            s,
            "tC0_tA1_tB0_colMaj1_m1024_n128_k3072_lda3072_ldb3072_ldc1024_ws0_f32"
        );
        assert_eq!(Geometry::parse(&s).unwrap(), g);
    }

    #[test]
    fn round_trip_without_workspace() {
        let g = Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 128, 3072, vec![], FloatType::F32,
        )
        .unwrap();
        let s = g.serialize();
        assert_eq!(
            s,
            "tC0_tA1_tB0_colMaj1_m1024_n128_k3072_lda3072_ldb3072_ldc1024_f32"
        );
        assert_eq!(Geometry::parse(&s).unwrap(), g);
    }

    #[test]
    fn bad_string_missing_key_rejected() {
        let err = Geometry::parse("tC0_tA1_tB0_colMaj1_m1024_n128_k3072_lda3072_ldb3072_f32");
        assert!(matches!(err, Err(GeometryError::BadGeometryString(_))));
    }

    #[test]
    fn bad_string_unknown_key_rejected() {
        let err = Geometry::parse(
            "tC0_tA1_tB0_colMaj1_m1024_n128_k3072_lda3072_ldb3072_ldc1024_f32_bogus7",
        );
        assert!(matches!(err, Err(GeometryError::BadGeometryString(_))));
    }

    #[test]
    fn ld_below_coal_rejected() {
        // row-major, no transpose: coal(A) = k = 16, lda = 8 is inconsistent.
        let err = Geometry::new(
            false,
            false,
            false,
            false,
            8,
            16,
            16,
            16,
            16,
            16,
            vec![],
            FloatType::F32,
        );
        assert!(matches!(err, Err(GeometryError::InvalidGeometry(_))));
    }

    #[test]
    fn ld_equal_to_coal_accepted() {
        let g = Geometry::new(
            false,
            false,
            false,
            false,
            16,
            16,
            16,
            16,
            16,
            16,
            vec![],
            FloatType::F32,
        );
        assert!(g.is_ok());
    }

    #[test]
    fn coalescence_identity_holds_for_all_combinations() {
        for is_col_major in [false, true] {
            for t_a in [false, true] {
                for t_b in [false, true] {
                    let lda = 64;
                    let ldb = 64;
                    let ldc = 64;
                    let g = Geometry::new(
                        is_col_major,
                        t_a,
                        t_b,
                        false,
                        lda,
                        ldb,
                        ldc,
                        32,
                        32,
                        32,
                        vec![],
                        FloatType::F32,
                    )
                    .unwrap();
                    // coal + uncoal always equals one of {m+k, k+n, m+n} depending on M.
                    assert!(g.coal(Mat::A) + g.uncoal(Mat::A) == g.m + g.k);
                    assert!(g.coal(Mat::B) + g.uncoal(Mat::B) == g.k + g.n);
                    assert!(g.coal(Mat::C) + g.uncoal(Mat::C) == g.m + g.n);
                }
            }
        }
    }

    #[test]
    fn distance_zero_for_equal_geometries() {
        let g = scenario_1();
        assert_eq!(g.distance(&g), 0.0);
    }

    #[test]
    fn distance_infinite_on_transpose_mismatch() {
        let g1 = scenario_1();
        let mut g2 = scenario_1();
        g2.t.set(Mat::A, !g2.t(Mat::A));
        assert_eq!(g1.distance(&g2), f64::INFINITY);
    }

    #[test]
    fn distance_increases_with_divergence() {
        let g1 = scenario_1();
        let g_near = Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 130, 3072, vec![0], FloatType::F32,
        )
        .unwrap();
        let g_far = Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 8192, 3072, vec![0], FloatType::F32,
        )
        .unwrap();
        assert!(g1.distance(&g_near) < g1.distance(&g_far));
    }

    #[test]
    fn tight_geometry_is_valid() {
        let g = Geometry::tight(2);
        assert_eq!(g.workspace_sizes(), &[1, 1]);
    }
}
