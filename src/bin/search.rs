//! CLI entry point for the guided local search. Since a real GPU backend is
//! out of scope for this crate (SPEC_FULL.md §1, §6), this binary drives
//! `basicfind` against a closed-form cost estimator rather than real
//! hardware — enough to watch the search descend and inspect the winning
//! kernel, not to get a trustworthy timing number. A production caller
//! would swap `EstimatorRuntime` for a real `GpuRuntime` impl backed by an
//! OpenCL/HIP/CUDA compiler and queue.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use anyhow::{bail, Result};
use gemmtune::codegen::KernelString;
use gemmtune::gpu_runtime::{CompileFailure, CompiledKernel, GpuRuntime, KernelBuffers, LaunchFailure, LaunchHandle};
use gemmtune::{basicfind, FindParams, Geometry, HyperParams, Offsets, SummaryStatistic};

/// Estimates device time from launch geometry alone: more global work and
/// less reuse per work-item costs more. Not a substitute for real
/// measurement; see the module doc comment.
struct EstimatorRuntime {
    device: String,
    next_handle: Cell<u64>,
    shapes: RefCell<HashMap<u64, KernelString>>,
}

impl EstimatorRuntime {
    fn new(device: impl Into<String>) -> Self {
        EstimatorRuntime {
            device: device.into(),
            next_handle: Cell::new(0),
            shapes: RefCell::new(HashMap::new()),
        }
    }
}

impl GpuRuntime for EstimatorRuntime {
    fn device_identifier(&self) -> &str {
        &self.device
    }

    fn compile(&self, kernel: &KernelString) -> Result<CompiledKernel, CompileFailure> {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.shapes.borrow_mut().insert(handle, kernel.clone());
        Ok(CompiledKernel::new(kernel.name.clone(), handle))
    }

    fn launch(
        &self,
        kernel: &CompiledKernel,
        _buffers: &KernelBuffers,
    ) -> Result<LaunchHandle, LaunchFailure> {
        Ok(LaunchHandle(kernel.handle))
    }

    fn elapsed_seconds(&self, handle: LaunchHandle) -> f64 {
        let shapes = self.shapes.borrow();
        let Some(kernel) = shapes.get(&handle.0) else {
            return 1e-3;
        };
        let useful = (kernel.work_per_thread.max(1) * kernel.local_work_size.max(1)) as f64;
        let total_work = kernel.global_work_size.max(1) as f64;
        total_work / (useful * 1e9)
    }
}

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn usage() -> ! {
    eprintln!(
        "usage: gemmtune-search --geometry <canonical-string> \
         [--device <id>] [--constraints <s>] [--hp <forced-hp-string>] \
         [--time <seconds>] [--descents <n>] [--runs <n>] [--stat min|median|mean|max] \
         [--seed <u64>] [--deterministic] [--find-params <path-to-json>]"
    );
    std::process::exit(2);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "gemmtune=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
    }

    let Some(geometry_str) = parse_flag(&args, "--geometry") else {
        usage();
    };
    let geometry = match Geometry::parse(&geometry_str) {
        Ok(g) => g,
        Err(e) => bail!("bad geometry string: {e}"),
    };

    let device = parse_flag(&args, "--device").unwrap_or_else(|| "fiji".to_string());
    let constraints = parse_flag(&args, "--constraints").unwrap_or_default();
    let forced_hp = parse_flag(&args, "--hp")
        .map(|s| HyperParams::parse(&s))
        .transpose()
        .map_err(|e| anyhow::anyhow!("bad forced hyperparams string: {e}"))?;

    let stat = match parse_flag(&args, "--stat").as_deref() {
        Some("min") | None => SummaryStatistic::Min,
        Some("median") => SummaryStatistic::Median,
        Some("mean") => SummaryStatistic::Mean,
        Some("max") => SummaryStatistic::Max,
        Some(other) => bail!("unknown --stat `{other}`, expected min|median|mean|max"),
    };

    // `--find-params` loads a full FindParams snapshot as JSON; any of
    // --time/--descents/--runs/--stat/--seed/--deterministic given alongside
    // it are ignored in favor of the file.
    let find_params = match parse_flag(&args, "--find-params") {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("reading --find-params file `{path}`: {e}"))?;
            serde_json::from_str(&text)
                .map_err(|e| anyhow::anyhow!("parsing --find-params file `{path}`: {e}"))?
        }
        None => FindParams {
            allotted_time_s: parse_flag(&args, "--time")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30.0),
            allotted_descents: parse_flag(&args, "--descents")
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            n_runs_per_kernel: parse_flag(&args, "--runs")
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            summary_statistic: stat,
            rng_seed: parse_flag(&args, "--seed")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0xC0FFEE),
            deterministic: args.iter().any(|a| a == "--deterministic"),
        },
    };

    let offsets = Offsets::padded(geometry.workspace_sizes().len());
    let runtime = EstimatorRuntime::new(device);

    let solution = basicfind(&geometry, &offsets, &find_params, &constraints, forced_hp, &runtime)?;

    println!("winning hyperparams: {}", solution.hp.serialize());
    println!("estimated gflops:    {:.2}", solution.gflops);
    println!("descents run:        {}", solution.descents_run);
    println!("candidates tried:    {}", solution.candidates_tried);
    println!("kernels emitted:     {}", solution.kernels.len());
    for k in &solution.kernels {
        println!("  - {} ({})", k.name, k.description);
    }
    Ok(())
}
