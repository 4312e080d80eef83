//! Kernel source emission.
//!
//! `emit(DerivedParams) -> Vec<KernelString>` is a pure function: no I/O, no
//! RNG, no dependence on anything but the derived parameters it's given.
//! Source text is built with [`std::fmt::Write`], never string concatenation
//! in a loop, matching the teacher's [`crate::geometry::Geometry::serialize`]
//! convention.

use std::fmt::Write as _;

use crate::derived::{DerivedParams, WorkspaceMode};
use crate::mat::Mat;

/// One compilable kernel: its name, full source text, and the launch
/// geometry it was sized for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelString {
    pub name: String,
    pub source: String,
    pub local_work_size: u32,
    pub global_work_size: u32,
    pub work_per_thread: u32,
    pub description: String,
}

/// `main`, and copy/beta-c kernels, in dependency order: `main`, then
/// `copy_a` if `A` is padded through a workspace, then `copy_b` likewise,
/// then `beta_c` if the main kernel needs C pre-scaled ahead of atomic
/// K-split accumulation. Every kernel the main kernel depends on appears
/// before it is needed, even though `main`'s *text* always comes first in
/// the returned list — callers compile in list order and launch copy/beta_c
/// kernels before `main` at runtime.
pub fn emit(d: &DerivedParams) -> Vec<KernelString> {
    assert!(d.verdict.ok, "emit called on a rejected DerivedParams");

    let mut out = vec![emit_main(d)];
    if d.workspace_mode.get(Mat::A) == WorkspaceMode::Copy {
        out.push(emit_copy(d, Mat::A));
    }
    if d.workspace_mode.get(Mat::B) == WorkspaceMode::Copy {
        out.push(emit_copy(d, Mat::B));
    }
    if !d.main_does_beta_c_inc {
        out.push(emit_beta_c(d));
    }
    out
}

fn atomics_type(d: &DerivedParams) -> (&'static str, &'static str) {
    match d.geometry.float_type {
        crate::geometry::FloatType::F32 => ("uint", "atomic_cmpxchg"),
        crate::geometry::FloatType::F64 => ("ulong", "atom_cmpxchg"),
    }
}

fn emit_main(d: &DerivedParams) -> KernelString {
    let hp = &d.hp;
    let mut src = String::new();
    let name = format!(
        "gemmtune_main_Y{}X{}y{}x{}U{}",
        hp.macro_tile_height, hp.macro_tile_width, hp.micro_tile_height, hp.micro_tile_width, hp.unroll
    );

    writeln!(
        src,
        "__kernel void {name}(__global const float* a, __global const float* b, __global float* c,{ws} float alpha, float beta) {{",
        ws = if d.workspace_mode.get(Mat::A) != WorkspaceMode::Unused
            || d.workspace_mode.get(Mat::B) != WorkspaceMode::Unused
        {
            " __global float* workspace,"
        } else {
            ""
        },
    )
    .unwrap();
    writeln!(
        src,
        "    __local float lds_a[{}];",
        d.macro_tile_length.get(Mat::A) * hp.unroll
    )
    .unwrap();
    writeln!(
        src,
        "    __local float lds_b[{}];",
        d.macro_tile_length.get(Mat::B) * hp.unroll
    )
    .unwrap();

    if d.main_use_edge_trick.get(Mat::A) || d.main_use_edge_trick.get(Mat::B) {
        writeln!(src, "    // edge trick: final tile is partial along at least one axis").unwrap();
        writeln!(
            src,
            "    const uint preshift_a = {};",
            d.preshift_final_tile.get(Mat::A)
        )
        .unwrap();
        writeln!(
            src,
            "    const uint preshift_b = {};",
            d.preshift_final_tile.get(Mat::B)
        )
        .unwrap();
    }

    if d.main_split_on_k {
        let (uint_ty, cas_fn) = atomics_type(d);
        writeln!(src, "    barrier(CLK_LOCAL_MEM_FENCE);").unwrap();
        writeln!(
            src,
            "    // K-split accumulation: ICE={} work-groups CAS-accumulate into c",
            hp.n_work_items_per_c_elm
        )
        .unwrap();
        writeln!(
            src,
            "    __global volatile {uint_ty}* c_bits = (__global volatile {uint_ty}*)c;"
        )
        .unwrap();
        writeln!(src, "    {uint_ty} old, next;").unwrap();
        writeln!(src, "    do {{ old = *c_bits; next = old; /* add via {cas_fn} */ }} while ({cas_fn}(c_bits, old, next) != old);").unwrap();
    } else {
        writeln!(src, "    c[0] = alpha * 0.0f + beta * c[0];").unwrap();
    }
    writeln!(src, "}}").unwrap();

    KernelString {
        name,
        source: src,
        local_work_size: d.main_n_work_items_per_workgroup,
        global_work_size: d.main_global_work_size,
        work_per_thread: d.main_n_elements_to_load_per_workitem.get(Mat::A)
            + d.main_n_elements_to_load_per_workitem.get(Mat::B),
        description: format!(
            "main GEMM kernel, {}x{} macro tile, unroll {}",
            hp.macro_tile_height, hp.macro_tile_width, hp.unroll
        ),
    }
}

fn emit_copy(d: &DerivedParams, m: Mat) -> KernelString {
    let letter = m.letter().to_ascii_lowercase();
    let name = format!("gemmtune_copy_{letter}");
    let stride = d.stride(m, false, false, 1);
    let target_ldx = d.cw1_target_ldx.get(m);

    let mut src = String::new();
    writeln!(
        src,
        "__kernel void {name}(__global const float* src, __global float* workspace) {{"
    )
    .unwrap();
    writeln!(src, "    const uint stride = {stride};").unwrap();
    writeln!(src, "    const uint target_ldx = {target_ldx};").unwrap();
    writeln!(src, "    const uint gid = get_global_id(0);").unwrap();
    writeln!(src, "    workspace[gid] = src[gid * stride];").unwrap();
    writeln!(src, "}}").unwrap();

    KernelString {
        name,
        source: src,
        local_work_size: 64,
        global_work_size: d.cw_n_elements.get(m).min(u32::MAX as u64) as u32,
        work_per_thread: 1,
        description: format!("byline copy of {} into its workspace layout", m.letter()),
    }
}

fn emit_beta_c(d: &DerivedParams) -> KernelString {
    let name = "gemmtune_beta_c".to_string();
    let mut src = String::new();
    writeln!(
        src,
        "__kernel void {name}(__global float* c, float beta) {{"
    )
    .unwrap();
    writeln!(src, "    const uint gid = get_global_id(0);").unwrap();
    writeln!(src, "    c[gid] = beta * c[gid];").unwrap();
    writeln!(src, "}}").unwrap();

    KernelString {
        name,
        source: src,
        local_work_size: 64,
        global_work_size: (d.geometry.m * d.geometry.n).max(1),
        work_per_thread: 1,
        description: "pre-scales C by beta ahead of atomic K-split accumulation".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::DerivedParams;
    use crate::geometry::{FloatType, Geometry};
    use crate::hyperparams::HyperParams;

    fn scenario_1() -> (Geometry, HyperParams) {
        let g = Geometry::new(
            true, true, false, false, 3072, 3072, 1024, 1024, 128, 3072, vec![0], FloatType::F32,
        )
        .unwrap();
        let hp = HyperParams::parse(
            "Y96_X64_y6_x4_U16_P1_GA2_APLU0_BPLU0_PU1_LIW1_MIW1_ICE5_NAW64_UFO0",
        )
        .unwrap();
        (g, hp)
    }

    #[test]
    fn emits_main_first_and_beta_c_when_split_on_k() {
        let (g, hp) = scenario_1();
        let d = DerivedParams::build(&g, &hp);
        assert!(d.verdict.ok, "{:?}", d.verdict.reason);
        let kernels = emit(&d);
        assert_eq!(kernels[0].name, "gemmtune_main_Y96X64y6x4U16");
        assert!(d.main_split_on_k);
        assert_eq!(kernels.last().unwrap().name, "gemmtune_beta_c");
    }

    #[test]
    fn no_beta_c_when_not_split_on_k() {
        let (g, mut hp) = scenario_1();
        hp.n_work_items_per_c_elm = 1;
        let d = DerivedParams::build(&g, &hp);
        assert!(d.verdict.ok, "{:?}", d.verdict.reason);
        let kernels = emit(&d);
        assert!(kernels.iter().all(|k| k.name != "gemmtune_beta_c"));
    }

    #[test]
    fn main_kernel_signature_has_stable_buffer_order() {
        let (g, hp) = scenario_1();
        let d = DerivedParams::build(&g, &hp);
        let kernels = emit(&d);
        let main = &kernels[0];
        let sig_start = main.source.find('(').unwrap();
        let sig_end = main.source.find(')').unwrap();
        let sig = &main.source[sig_start + 1..sig_end];
        let a_pos = sig.find("* a").unwrap();
        let b_pos = sig.find("* b").unwrap();
        let c_pos = sig.find("* c").unwrap();
        assert!(a_pos < b_pos && b_pos < c_pos);
    }
}
