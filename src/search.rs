//! Guided local-search autotuning driver.
//!
//! [`basicfind`] is the crate's single top-level entry point: it seeds a
//! hyperparameter point from the kernel cache (or a caller-forced override),
//! then repeatedly enumerates [`HyperParams::one_aways`], benchmarks every
//! deriveable candidate through a [`GpuRuntime`], and descends to the first
//! improvement. It never depends on a concrete GPU backend — tests substitute
//! [`crate::gpu_runtime::FakeGpuRuntime`], whose "device time" is a pure
//! function of a kernel's launch geometry, so the monotonicity and
//! termination properties in SPEC_FULL.md §8 are checkable without hardware.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cache;
use crate::codegen::{self, KernelString};
use crate::derived::DerivedParams;
use crate::geometry::Geometry;
use crate::gpu_runtime::{GpuRuntime, KernelBuffers};
use crate::hyperparams::HyperParams;

/// Pre-/post-padding element counts around A, B, C, and each workspace
/// buffer. Tails exist so a kernel that writes one element past where it
/// should is caught by a test harness running under a memory checker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offsets {
    pub base: [u32; 3],
    pub tail: [u32; 3],
    pub workspace_pre: Vec<u32>,
    pub workspace_post: Vec<u32>,
}

/// Errors constructing an [`Offsets`]: the pre- and post-padding lists for
/// workspace buffers must be the same length (one pair per buffer).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("workspace pre/post offset lists have mismatched lengths: {pre} != {post}")]
pub struct OffsetsError {
    pre: usize,
    post: usize,
}

impl Offsets {
    pub fn new(
        base: [u32; 3],
        tail: [u32; 3],
        workspace_pre: Vec<u32>,
        workspace_post: Vec<u32>,
    ) -> Result<Self, OffsetsError> {
        if workspace_pre.len() != workspace_post.len() {
            return Err(OffsetsError {
                pre: workspace_pre.len(),
                post: workspace_post.len(),
            });
        }
        Ok(Offsets {
            base,
            tail,
            workspace_pre,
            workspace_post,
        })
    }

    /// All offsets and tails zero — for tests that don't care about
    /// out-of-bounds catching.
    pub fn zero(n_workspaces: usize) -> Self {
        Offsets {
            base: [0; 3],
            tail: [0; 3],
            workspace_pre: vec![0; n_workspaces],
            workspace_post: vec![0; n_workspaces],
        }
    }

    /// Small nonzero offsets/tails so a kernel writing one element past
    /// where it should is caught by a memory checker: `11/17/13` base,
    /// `67/15/29` tails, `101`/`103` per-workspace pre/post.
    pub fn padded(n_workspaces: usize) -> Self {
        Offsets {
            base: [11, 17, 13],
            tail: [67, 15, 29],
            workspace_pre: vec![101; n_workspaces],
            workspace_post: vec![103; n_workspaces],
        }
    }
}

/// How repeated per-candidate timings are aggregated into a single GFLOP/s
/// figure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatistic {
    Min,
    Median,
    Mean,
    Max,
}

impl SummaryStatistic {
    fn apply(self, mut samples: Vec<f64>) -> f64 {
        debug_assert!(!samples.is_empty());
        match self {
            SummaryStatistic::Min => samples.iter().cloned().fold(f64::INFINITY, f64::min),
            SummaryStatistic::Max => samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            SummaryStatistic::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            SummaryStatistic::Median => {
                samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = samples.len() / 2;
                if samples.len() % 2 == 0 {
                    (samples[mid - 1] + samples[mid]) / 2.0
                } else {
                    samples[mid]
                }
            }
        }
    }
}

/// Search budget and repeat-measurement policy.
///
/// `Serialize`/`Deserialize` let a caller snapshot or load a `FindParams` as
/// JSON (see `gemmtune-search --find-params <path>`); the canonical string
/// forms in §6 remain the primary wire format for `Geometry`/`HyperParams`,
/// this is additive for the one config-ish struct in the crate.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FindParams {
    pub allotted_time_s: f32,
    pub allotted_descents: u32,
    pub n_runs_per_kernel: u32,
    pub summary_statistic: SummaryStatistic,
    /// Seeds the neighbor-shuffle RNG once per search call, not freshly per
    /// neighbor, so a repeated call with the same seed reproduces the same
    /// descent path given a deterministic runtime.
    pub rng_seed: u64,
    /// Forces every returned HP to have `ICE == 1`.
    pub deterministic: bool,
}

impl Default for FindParams {
    fn default() -> Self {
        FindParams {
            allotted_time_s: 30.0,
            allotted_descents: 4,
            n_runs_per_kernel: 3,
            summary_statistic: SummaryStatistic::Median,
            rng_seed: 0xC0FFEE,
            deterministic: false,
        }
    }
}

/// The outcome of a `basicfind` call: the best hyperparameters found, their
/// derived parameters and emitted kernels, and the measured throughput.
#[derive(Clone, Debug)]
pub struct TinyGemmSolution {
    pub hp: HyperParams,
    pub derived: DerivedParams,
    pub kernels: Vec<KernelString>,
    pub gflops: f64,
    pub descents_run: u32,
    pub candidates_tried: u32,
}

/// Hard errors from `basicfind`: a forced seed HP that isn't even
/// deriveable, or a seed HP that doesn't fit the geometry at all. Everything
/// else (soft rejections, no-improving-neighbor, timeout) is ordinary
/// control flow reflected in the returned [`TinyGemmSolution`], never an
/// `Err`.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("seed hyperparameters are not deriveable for this geometry: {0}")]
    SeedNotDeriveable(String),
}

fn buffers_for(geometry: &Geometry, offsets: &Offsets) -> KernelBuffers {
    use crate::mat::Mat;
    let a_len = geometry.padded_area(Mat::A) as usize
        + offsets.base[0] as usize
        + offsets.tail[0] as usize;
    let b_len = geometry.padded_area(Mat::B) as usize
        + offsets.base[1] as usize
        + offsets.tail[1] as usize;
    let c_len = geometry.padded_area(Mat::C) as usize
        + offsets.base[2] as usize
        + offsets.tail[2] as usize;
    let workspace_len: usize = offsets
        .workspace_pre
        .iter()
        .zip(offsets.workspace_post.iter())
        .zip(geometry.workspace_sizes().iter())
        .map(|((pre, post), size)| (*pre + *post + *size) as usize)
        .sum();
    KernelBuffers {
        a_len,
        b_len,
        c_len,
        workspace_len,
        alpha: 1.0,
        beta: 0.0,
    }
}

/// Compiles, launches, and times every kernel `emit` produces for `d`,
/// aggregating per-kernel elapsed time into one total and converting to
/// GFLOP/s via `n_runs_per_kernel` repeats and `summary_statistic`. Returns
/// `None` if compilation or launch fails for any kernel in the sequence —
/// the caller treats that exactly like a soft Phase-1 rejection, logging and
/// skipping rather than aborting the descent.
fn benchmark(
    geometry: &Geometry,
    d: &DerivedParams,
    offsets: &Offsets,
    runtime: &dyn GpuRuntime,
    n_runs: u32,
    stat: SummaryStatistic,
) -> Option<(Vec<KernelString>, f64)> {
    let kernels = codegen::emit(d);
    let buffers = buffers_for(geometry, offsets);

    let mut run_totals = Vec::with_capacity(n_runs.max(1) as usize);
    for _ in 0..n_runs.max(1) {
        let mut total = 0.0f64;
        for kernel in &kernels {
            let compiled = match runtime.compile(kernel) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(kernel = %kernel.name, reason = %e, "compile failed, skipping candidate");
                    return None;
                }
            };
            let handle = match runtime.launch(&compiled, &buffers) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(kernel = %kernel.name, reason = %e, "launch failed, skipping candidate");
                    return None;
                }
            };
            total += runtime.elapsed_seconds(handle);
        }
        run_totals.push(total);
    }

    let seconds = stat.apply(run_totals);
    let gflops = geometry.gflops(seconds);
    Some((kernels, gflops))
}

/// The guided local-search autotuning entry point. Seeds from the kernel
/// cache (or `forced_hp`), then descends `find_params.allotted_descents`
/// times, each descent enumerating `hp.one_aways(geometry)` (shuffled) and
/// adopting the first deriveable candidate that beats the current best.
/// Terminates early on an empty time budget; never panics on a soft
/// rejection or a runtime that fails to compile/launch a candidate.
pub fn basicfind(
    geometry: &Geometry,
    offsets: &Offsets,
    find_params: &FindParams,
    constraints: &str,
    forced_hp: Option<HyperParams>,
    runtime: &dyn GpuRuntime,
) -> Result<TinyGemmSolution, SearchError> {
    let start = Instant::now();
    let deadline_s = find_params.allotted_time_s.max(0.0) as f64;
    let mut rng = StdRng::seed_from_u64(find_params.rng_seed);

    let mut hp = match forced_hp {
        Some(hp) => hp,
        None => cache::default_for(
            runtime.device_identifier(),
            constraints,
            geometry,
            find_params.deterministic,
        ),
    };
    if find_params.deterministic {
        hp = crate::hyperparams::clamp_deterministic(hp);
        tracing::debug!(hp = %hp.serialize(), "cache/default seed (cache hit unknown pre-search)");
    } else {
        tracing::debug!(hp = %hp.serialize(), "seed hyperparameters");
    }

    let seed_derived = DerivedParams::build(geometry, &hp);
    if !seed_derived.verdict.ok {
        return Err(SearchError::SeedNotDeriveable(
            seed_derived
                .verdict
                .reason
                .unwrap_or_else(|| "unknown reason".into()),
        ));
    }

    let (mut best_kernels, mut best_gflops) = benchmark(
        geometry,
        &seed_derived,
        offsets,
        runtime,
        find_params.n_runs_per_kernel,
        find_params.summary_statistic,
    )
    .unwrap_or((codegen::emit(&seed_derived), 0.0));
    let mut best_hp = hp;
    let mut best_derived = seed_derived;
    let mut candidates_tried = 0u32;
    let mut descents_run = 0u32;

    'descend: for descent in 0..find_params.allotted_descents {
        if start.elapsed().as_secs_f64() >= deadline_s {
            tracing::info!(descent, "allotted time exhausted before descent started");
            break;
        }
        descents_run = descent + 1;

        let neighbors = best_hp.one_aways(geometry, &mut rng);
        let mut improved = false;
        for mut candidate in neighbors {
            if start.elapsed().as_secs_f64() >= deadline_s {
                tracing::info!(descent, "allotted time exhausted mid-descent");
                break 'descend;
            }
            if find_params.deterministic {
                candidate = crate::hyperparams::clamp_deterministic(candidate);
            }

            let derived = DerivedParams::build(geometry, &candidate);
            if !derived.verdict.ok {
                continue;
            }
            candidates_tried += 1;

            let Some((kernels, gflops)) = benchmark(
                geometry,
                &derived,
                offsets,
                runtime,
                find_params.n_runs_per_kernel,
                find_params.summary_statistic,
            ) else {
                continue;
            };

            if gflops > best_gflops {
                tracing::info!(
                    descent,
                    hp = %candidate.serialize(),
                    gflops,
                    "first improvement, descending"
                );
                best_hp = candidate;
                best_derived = derived;
                best_kernels = kernels;
                best_gflops = gflops;
                improved = true;
                break;
            }
        }

        if !improved {
            tracing::info!(descent, gflops = best_gflops, "no improving neighbor, stopping");
            break;
        }
    }

    Ok(TinyGemmSolution {
        hp: best_hp,
        derived: best_derived,
        kernels: best_kernels,
        gflops: best_gflops,
        descents_run,
        candidates_tried,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FloatType;
    use crate::gpu_runtime::FakeGpuRuntime;

    fn scenario_1_geometry() -> Geometry {
        Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 128, 3072, vec![0], FloatType::F32,
        )
        .unwrap()
    }

    #[test]
    fn find_params_round_trips_through_json() {
        let fp = FindParams::default();
        let json = serde_json::to_string(&fp).unwrap();
        let back: FindParams = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }

    #[test]
    fn offsets_rejects_mismatched_workspace_lists() {
        let err = Offsets::new([0; 3], [0; 3], vec![1, 2], vec![1]);
        assert!(err.is_err());
    }

    #[test]
    fn offsets_presets_agree_on_length() {
        let z = Offsets::zero(2);
        let p = Offsets::padded(2);
        assert_eq!(z.workspace_pre.len(), p.workspace_pre.len());
    }

    #[test]
    fn basicfind_is_monotonic_against_the_seed() {
        let g = scenario_1_geometry();
        let offsets = Offsets::zero(1);
        let find_params = FindParams {
            allotted_time_s: 5.0,
            allotted_descents: 3,
            n_runs_per_kernel: 1,
            summary_statistic: SummaryStatistic::Min,
            rng_seed: 1,
            deterministic: false,
        };
        let runtime = FakeGpuRuntime::new("fiji");

        let seed_hp = cache::default_for("fiji", "", &g, false);
        let seed_derived = DerivedParams::build(&g, &seed_hp);
        let (_, seed_gflops) = benchmark(
            &g,
            &seed_derived,
            &offsets,
            &runtime,
            1,
            SummaryStatistic::Min,
        )
        .unwrap();

        let solution = basicfind(&g, &offsets, &find_params, "", None, &runtime).unwrap();
        assert!(solution.gflops >= seed_gflops);
    }

    #[test]
    fn basicfind_deterministic_override_forces_ice_one() {
        let g = scenario_1_geometry();
        let offsets = Offsets::zero(1);
        let find_params = FindParams {
            allotted_time_s: 5.0,
            allotted_descents: 2,
            n_runs_per_kernel: 1,
            summary_statistic: SummaryStatistic::Min,
            rng_seed: 2,
            deterministic: true,
        };
        let runtime = FakeGpuRuntime::new("fiji");
        let solution = basicfind(&g, &offsets, &find_params, "", None, &runtime).unwrap();
        assert_eq!(solution.hp.n_work_items_per_c_elm, 1);
    }

    #[test]
    fn basicfind_zero_time_budget_returns_seed() {
        let g = scenario_1_geometry();
        let offsets = Offsets::zero(1);
        let find_params = FindParams {
            allotted_time_s: 0.0,
            allotted_descents: 5,
            n_runs_per_kernel: 1,
            summary_statistic: SummaryStatistic::Min,
            rng_seed: 3,
            deterministic: false,
        };
        let runtime = FakeGpuRuntime::new("fiji");
        let solution = basicfind(&g, &offsets, &find_params, "", None, &runtime).unwrap();
        assert_eq!(solution.descents_run, 0);
        let seed_hp = cache::default_for("fiji", "", &g, false);
        assert_eq!(solution.hp, seed_hp);
    }

    #[test]
    fn basicfind_rejects_an_underiveable_forced_seed() {
        let g = Geometry::simple(4, 4, 16, false, false, vec![], FloatType::F32).unwrap();
        let offsets = Offsets::zero(0);
        let find_params = FindParams::default();
        let runtime = FakeGpuRuntime::new("fiji");
        let forced = HyperParams::small(false);
        let result = basicfind(&g, &offsets, &find_params, "", Some(forced), &runtime);
        assert!(matches!(result, Err(SearchError::SeedNotDeriveable(_))));
    }
}
