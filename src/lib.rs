//! This crate is a bit-exact software oracle for *precision-scalable* multiply-reduce trees, in
//! the style of [Bit Fusion](https://arxiv.org/abs/1712.01507) accelerators.
//!
//! # Introduction
//!
//! A fused multiplier tree is built from an `N × N` grid of small `L × L`-bit multipliers, which
//! are combined hierarchically, level by level, so that at run time the same hardware can compute
//! either many low-precision products or fewer high-precision ones (any power of two between `L`
//! and `H = N·L` bits, independently for each operand). Which one it does is selected by a
//! [`ModeCode`]. Whatever the precisions, the root of the tree outputs a dot product
//! `Σ a[i]·b[i]` of the operands packed onto its two input buses.
//!
//! Getting such a device right is fiddly: operands have to be sliced and laid out exactly as the
//! leaves read them, operand B has to be [swizzled](swizzle) because the device reads it
//! transposed, and every level has to shift its children by the right amounts for the current
//! mode. This crate models all of that, and can pinpoint the first node of a device's tree that
//! diverges from the model.
//!
//! # Usage
//!
//! ```
//! use fusion_oracle::{FusionConfig, Session, TestVector, Stimulus, Device};
//!
//! // A device under test. Here, a fake one that always answers 42.
//! struct Dut;
//! impl Device for Dut {
//!   fn apply(&mut self, _: &Stimulus) -> i128 { 42 }
//! }
//!
//! let config = FusionConfig::new(8, 2)?;  // 2- to 8-bit operands, 4 × 4 leaves
//! let mut session = Session::new(&config)?;
//! let pair = config.pair(4, 2)?;  // 4-bit A, 2-bit B: 8 products per evaluation
//! let vector = TestVector { pair, a: vec![7, -8, 1, 0, 0, 0, 0, 6], b: vec![1, 1, 1, 0, 0, 0, 0, 1] };
//! let report = session.run(&mut Dut, [vector])?;
//! assert_eq!(report.mismatches[0].expected, 7 - 8 + 1 + 6);
//! # Ok::<(), fusion_oracle::Error>(())
//! ```
//!
//! The building blocks (slicing and packing, the swizzle tables, the expected value of every node
//! of the tree, the systolic array feed) are all available separately.
//!
//! This crate includes benchmarks; run them with `cargo bench -F bench`.

mod config;
mod error;
mod mode;
pub mod packing;
pub mod swizzle;
pub mod tree;
pub mod verify;
mod session;
pub mod systolic;
pub mod temporal;

pub use config::{FusionConfig, PrecisionPair, Signedness};
pub use error::{Error, OracleDefect, Result};
pub use mode::{ModeCode, ModeField};
pub use packing::PackedSignal;
pub use session::{Device, Mismatch, Rejected, Report, Session, Stimulus, TestVector, Verdict};
pub use swizzle::{SwizzleCache, SwizzleTable};
pub use tree::ExpectedTree;
pub use verify::{Diagnosis, HierarchyVerifier, NodeCapture, NodeId, NodeState};


#[cfg(test)]
const PROPTEST_CASES: u32 = if cfg!(debug_assertions) {0x400} else {0x4000};

/// Re-export some internals for benchmarking purposes, only on `feature = "bench"`.
#[cfg(feature = "bench")]
mod bench;
