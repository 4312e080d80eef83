//! Crate root: public surface for the GEMM autotuning kernel generator.
//!
//! This module is the single canonical entry point for downstream users. It
//! re-exports the types needed to describe a GEMM problem, tune it, and emit
//! device kernels for it, and centralizes the crate's one hard-error type.
//!
//! ## Invariants
//!
//! - **Two-tier failure model.** Malformed input (`Geometry`/`HyperParams`
//!   construction or parsing) is a hard [`GemmTuneError`]. Whether a given
//!   `(Geometry, HyperParams)` pair is *deriveable* — has a valid tiling — is
//!   never an error: it is the `Verdict` returned by
//!   [`derived::DerivedParams::build`], and the search driver treats a
//!   negative verdict as ordinary control flow, not a failure to propagate.
//! - **Immutability.** `Geometry`, `HyperParams`, and `DerivedParams` are
//!   plain immutable values once constructed; a search round always builds
//!   fresh ones rather than mutating in place.
//! - **No hidden I/O.** Codegen is a pure function of `DerivedParams`. The
//!   only I/O boundary is [`gpu_runtime::GpuRuntime`], consumed as a trait
//!   object so the core crate never depends on a concrete GPU backend.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Problem geometry: shape, layout, transpose, leading dimensions, workspace.
pub mod geometry;
/// The 15-field discrete hyperparameter vector and its neighbor graph.
pub mod hyperparams;
/// Matrix-role enum and fixed-size per-matrix record shared across modules.
pub mod mat;
/// The `GA=3` super-column workgroup grid factorization.
pub mod macgrid;
/// Two-phase construction of codegen-ready derived quantities.
pub mod derived;
/// Immutable, statically-initialised nearest-neighbor hyperparameter cache.
pub mod cache;
/// Pure-function kernel source emission.
pub mod codegen;
/// The GPU execution boundary (trait, not an implementation).
pub mod gpu_runtime;
/// The guided local-search autotuning driver.
pub mod search;
/// CPU reference GEMM for the optional correctness test (test-only, never
/// called by the core itself).
#[cfg(test)]
pub mod cpu_reference;

pub use derived::{DerivedParams, Verdict};
pub use geometry::{FloatType, Geometry, GeometryError};
pub use hyperparams::{HpError, HyperParams};
pub use mat::{Mat, PerMat};
pub use search::{
    basicfind, FindParams, Offsets, OffsetsError, SearchError, SummaryStatistic, TinyGemmSolution,
};

/// Hard errors: malformed input rejected at construction or parse time.
///
/// Soft failures — a structurally valid `(Geometry, HyperParams)` pair that
/// simply has no valid tiling — are never represented here; see
/// [`derived::Verdict`].
#[derive(Debug, thiserror::Error)]
pub enum GemmTuneError {
    /// A `Geometry` failed its leading-dimension or float-width checks.
    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
    /// A `HyperParams` wire string was malformed or incomplete.
    #[error(transparent)]
    BadHpString(#[from] HpError),
}
