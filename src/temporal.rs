//! The temporal (bit-serial) counterpart of the fused tree: a single `a_width × b_width`
//! multiplier that iterates over the slices of its operands across cycles, shifting and
//! accumulating the partial products.
//!
//! A `a_prec × b_prec` multiply takes `(a_prec / a_width) · (b_prec / b_width)` steps. Step
//! `(i, j)` multiplies slice `i` of A with slice `j` of B (least significant first), shifted left
//! by `i·a_width + j·b_width` bits. The top slice of a negative operand is driven in *sign mode*
//! (sign-extended by the unit); all other slices are unsigned.

use tracing::{debug, warn};

use crate::config::Signedness;
use crate::packing::decompose;
use crate::{Error, Result};

/// What an operation does with the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalOp {
  /// Replace the accumulator with `a·b`.
  Mult,
  /// Add `a·b` to the accumulator.
  Macc,
}

/// The inputs of the unit for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalStep {
  pub a_slice: i128,
  pub b_slice: i128,
  pub a_sign: bool,
  pub b_sign: bool,
  /// Left shift of the partial product, in bits.
  pub shift: u32,
  /// Overwrite the accumulator instead of adding to it.
  pub restart: bool,
}

impl TemporalStep {
  /// The shifted partial product this step contributes.
  pub fn partial(&self) -> i128 {
    (self.a_slice * self.b_slice) << self.shift
  }
}

/// Outcome of checking one cycle of a device against the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepVerdict {
  Match,
  /// The unshifted slice product differs.
  Product { expected: i128, received: i128 },
  /// On the first step of an operation, the output still holds the previous accumulator, and it
  /// differs.
  Previous { expected: i128, received: i128 },
}

impl StepVerdict {
  pub fn is_match(&self) -> bool {
    matches!(self, StepVerdict::Match)
  }
}

/// A bit-serial multiply-accumulate unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalMac {
  a_width: u32,
  b_width: u32,
  max_precision: u32,
  signedness: Signedness,
  acc: i128,
}

impl TemporalMac {
  /// A signed unit with `a_width × b_width` multiplier, for operands up to `max_precision` bits.
  pub fn new(a_width: u32, b_width: u32, max_precision: u32) -> Result<Self> {
    for width in [a_width, b_width, max_precision] {
      if !width.is_power_of_two() { return Err(Error::NotPowerOfTwo(width)) }
    }
    if max_precision > crate::FusionConfig::MAX_PRECISION || a_width > max_precision || b_width > max_precision {
      return Err(Error::InvalidConfig(format!(
        "temporal unit {a_width}x{b_width} with maximum precision {max_precision}",
      )))
    }
    Ok(Self { a_width, b_width, max_precision, signedness: Signedness::Signed, acc: 0 })
  }

  pub fn with_signedness(self, signedness: Signedness) -> Self {
    Self { signedness, ..self }
  }

  pub fn accumulator(&self) -> i128 {
    self.acc
  }

  /// All supported `(a_prec, b_prec)`, ordered by `a_prec` then `b_prec`.
  pub fn modes(&self) -> impl Iterator<Item = (u32, u32)> + use<> {
    let (a_width, b_width, max) = (self.a_width, self.b_width, self.max_precision);
    let precs = move |width: u32| (0 ..= (max / width).trailing_zeros()).map(move |k| width << k);
    precs(a_width).flat_map(move |a| precs(b_width).map(move |b| (a, b)))
  }

  fn check(&self, operand: &'static str, value: i128, precision: u32, width: u32) -> Result<()> {
    if !precision.is_power_of_two() { return Err(Error::NotPowerOfTwo(precision)) }
    if precision < width || precision > self.max_precision {
      return Err(Error::PrecisionOutOfRange { precision, low: width, high: self.max_precision })
    }
    if !self.signedness.range(precision).contains(&value) {
      debug!(operand, value, precision, "temporal operand out of range");
      return Err(Error::ValueOutOfRange { index: 0, value, precision })
    }
    Ok(())
  }

  /// The steps computing `a·b`, `a` row-major over the slices of A.
  pub fn schedule(&self, a: i128, a_prec: u32, b: i128, b_prec: u32, op: TemporalOp) -> Result<Vec<TemporalStep>> {
    self.check("a", a, a_prec, self.a_width)?;
    self.check("b", b, b_prec, self.b_width)?;
    let a_slices = decompose(a, a_prec, self.a_width);
    let b_slices = decompose(b, b_prec, self.b_width);
    let mut steps = Vec::with_capacity(a_slices.len() * b_slices.len());
    for (i, &a_slice) in a_slices.iter().enumerate() {
      for (j, &b_slice) in b_slices.iter().enumerate() {
        steps.push(TemporalStep {
          a_slice,
          b_slice,
          a_sign: i == a_slices.len() - 1 && a < 0,
          b_sign: j == b_slices.len() - 1 && b < 0,
          shift: i as u32 * self.a_width + j as u32 * self.b_width,
          restart: op == TemporalOp::Mult && i == 0 && j == 0,
        });
      }
    }
    Ok(steps)
  }

  /// Clock one step through the unit; returns the (unshifted) slice product.
  pub fn step(&mut self, step: &TemporalStep) -> i128 {
    if step.restart { self.acc = 0 }
    self.acc += step.partial();
    step.a_slice * step.b_slice
  }

  /// Clock `step` through the unit and compare a device's outputs for the same cycle:
  /// `received_product` is its slice product, `received_output` its accumulator output, which is
  /// only checked on the first step of an operation (where it still shows the previous result).
  pub fn check_step(&mut self, step: &TemporalStep, received_product: i128, received_output: i128) -> StepVerdict {
    let previous = self.acc;
    let expected = self.step(step);
    if received_product != expected {
      warn!(a = step.a_slice, b = step.b_slice, a_sign = step.a_sign, b_sign = step.b_sign, expected, received = received_product, "slice product mismatch");
      return StepVerdict::Product { expected, received: received_product }
    }
    if step.shift == 0 && received_output != previous {
      warn!(expected = previous, received = received_output, "previous result mismatch");
      return StepVerdict::Previous { expected: previous, received: received_output }
    }
    StepVerdict::Match
  }

  /// Run a whole operation; returns the accumulator afterwards.
  pub fn execute(&mut self, a: i128, a_prec: u32, b: i128, b_prec: u32, op: TemporalOp) -> Result<i128> {
    let steps = self.schedule(a, a_prec, b, b_prec, op)?;
    debug!(a, a_prec, b, b_prec, ?op, cycles = steps.len(), "temporal operation");
    for step in &steps {
      self.step(step);
    }
    Ok(self.acc)
  }
}
