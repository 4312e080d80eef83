//! Minimal CLI: look up the default hyperparameters the kernel cache would
//! hand a given geometry, without running a search.

use anyhow::{bail, Result};
use gemmtune::{cache, Geometry};

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
        "usage: gemmtune-cache --geometry <canonical-string> [--device <id>] [--constraints <s>] [--deterministic]"
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
    let device = parse_flag(&args, "--device").unwrap_or_else(|| "fiji".to_string());
    let constraints = parse_flag(&args, "--constraints").unwrap_or_default();
    let deterministic = args.iter().any(|a| a == "--deterministic");

    let geometry = match Geometry::parse(&geometry_str) {
        Ok(g) => g,
        Err(e) => bail!("bad geometry string: {e}"),
    };

    let hp = cache::default_for(&device, &constraints, &geometry, deterministic);

    println!("geometry:     {}", geometry.serialize());
    println!("device:       {device}");
    println!(
        "constraints:  {}",
        if constraints.is_empty() {
            "(none)"
        } else {
            constraints.as_str()
        }
    );
    println!("hyperparams:  {}", hp.serialize());
    Ok(())
}
