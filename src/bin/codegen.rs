//! Minimal CLI: emit kernel source for a (geometry, hyperparams) pair,
//! defaulting the hyperparams from the kernel cache when none is given.
//! Useful for inspecting what a candidate point would compile to without
//! running a search.

use anyhow::{bail, Result};
use gemmtune::{cache, codegen, derived::DerivedParams, Geometry, HyperParams};

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
        "usage: gemmtune-codegen --geometry <canonical-string> [--hp <canonical-string>] [--device <id>] [--constraints <s>]"
    );
    std::process::exit(2);
}

fn main() -> Result<()> {
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

    let hp = match parse_flag(&args, "--hp") {
        Some(s) => HyperParams::parse(&s).map_err(|e| anyhow::anyhow!("bad hyperparams string: {e}"))?,
        None => {
            let device = parse_flag(&args, "--device").unwrap_or_else(|| "fiji".to_string());
            let constraints = parse_flag(&args, "--constraints").unwrap_or_default();
            let hp = cache::default_for(&device, &constraints, &geometry, false);
            eprintln!("no --hp given, using cache default for device={device}: {}", hp.serialize());
            hp
        }
    };

    let derived = DerivedParams::build(&geometry, &hp);
    if !derived.verdict.ok {
        bail!(
            "not deriveable: {}",
            derived.verdict.reason.unwrap_or_else(|| "unknown reason".into())
        );
    }

    let kernels = codegen::emit(&derived);
    for kernel in &kernels {
        println!("// {}", kernel.description);
        println!(
            "// local_work_size={} global_work_size={} work_per_thread={}",
            kernel.local_work_size, kernel.global_work_size, kernel.work_per_thread
        );
        println!("{}", kernel.source);
    }
    Ok(())
}
