//! Session configuration: the precision bounds of the fused multiplier tree, and the precision
//! pairs it can run at.
//!
//! Notation used throughout the crate:
//!
//!   - `H` is the highest supported precision (`high_prec`), `L` the lowest (`low_prec`).
//!   - `N = H / L` is the side of the leaf grid: the tree has `N × N` multipliers of `L × L` bits.
//!   - A tree has `log2(N) + 1` *levels*; level 0 is the leaf level, the last one is the root.

use core::fmt;
use core::ops::RangeInclusive;

use crate::{Error, Result};

/// Whether operands are interpreted as two's complement or as plain unsigned integers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
  #[default]
  Signed,
  Unsigned,
}

impl Signedness {
  /// Range of the `precision`-bit integers (`precision ≥ 1`).
  pub fn range(self, precision: u32) -> RangeInclusive<i128> {
    match self {
      Signedness::Signed => -(1i128 << (precision - 1)) ..= (1i128 << (precision - 1)) - 1,
      Signedness::Unsigned => 0 ..= (1i128 << precision) - 1,
    }
  }
}

/// The fixed parameters of a test session.
///
/// ```
/// # use fusion_oracle::FusionConfig;
/// let config = FusionConfig::new(8, 2).unwrap();
/// assert_eq!(config.num_levels(), 3);
/// assert_eq!(config.grid_side(), 4);
/// assert_eq!(config.bus_width(), 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FusionConfig {
  high_prec: u32,
  low_prec: u32,
  signedness: Signedness,
}

impl FusionConfig {
  /// Largest supported `high_prec`. Products of two such operands, summed over a whole tree, are
  /// always exact in an `i128`.
  pub const MAX_PRECISION: u32 = 32;

  /// A signed configuration with precisions between `low_prec` and `high_prec`, both powers of
  /// two.
  pub fn new(high_prec: u32, low_prec: u32) -> Result<Self> {
    if !high_prec.is_power_of_two() { return Err(Error::NotPowerOfTwo(high_prec)) }
    if !low_prec.is_power_of_two() { return Err(Error::NotPowerOfTwo(low_prec)) }
    if high_prec > Self::MAX_PRECISION {
      return Err(Error::InvalidConfig(format!(
        "high precision {high_prec} exceeds the maximum of {}", Self::MAX_PRECISION,
      )))
    }
    if low_prec > high_prec {
      return Err(Error::InvalidConfig(format!(
        "low precision {low_prec} is above high precision {high_prec}",
      )))
    }
    Ok(Self { high_prec, low_prec, signedness: Signedness::Signed })
  }

  pub fn with_signedness(self, signedness: Signedness) -> Self {
    Self { signedness, ..self }
  }

  pub fn high_prec(&self) -> u32 { self.high_prec }

  pub fn low_prec(&self) -> u32 { self.low_prec }

  pub fn signedness(&self) -> Signedness { self.signedness }

  /// Number of levels of the tree, `log2(H/L) + 1`.
  pub fn num_levels(&self) -> u32 {
    (self.high_prec / self.low_prec).trailing_zeros() + 1
  }

  /// `N = H / L`, the number of leaf multipliers along each side of the grid.
  pub fn grid_side(&self) -> usize {
    (self.high_prec / self.low_prec) as usize
  }

  /// Width in bits of each operand bus, `H² / L`.
  pub fn bus_width(&self) -> usize {
    (self.high_prec as usize * self.high_prec as usize) / self.low_prec as usize
  }

  /// Precision of the multipliers at tree level `level` (0 = leaf).
  pub fn level_prec(&self, level: u32) -> u32 {
    self.low_prec << level
  }

  /// All supported precisions, from lowest to highest.
  pub fn precisions(&self) -> impl Iterator<Item = u32> + use<> {
    let low = self.low_prec;
    (0 .. self.num_levels()).map(move |k| low << k)
  }

  /// All valid precision pairs, ordered by `a_prec` then `b_prec`.
  pub fn pairs(&self) -> impl Iterator<Item = PrecisionPair> + use<> {
    let config = *self;
    self.precisions().flat_map(move |a| config.precisions().map(move |b| PrecisionPair { a, b }))
  }

  /// Check that `precision` is a valid precision for this configuration.
  pub fn check_precision(&self, precision: u32) -> Result<()> {
    if !precision.is_power_of_two() {
      Err(Error::NotPowerOfTwo(precision))
    } else if precision < self.low_prec || precision > self.high_prec {
      Err(Error::PrecisionOutOfRange { precision, low: self.low_prec, high: self.high_prec })
    } else {
      Ok(())
    }
  }

  /// A validated precision pair.
  pub fn pair(&self, a_prec: u32, b_prec: u32) -> Result<PrecisionPair> {
    self.check_precision(a_prec)?;
    self.check_precision(b_prec)?;
    Ok(PrecisionPair { a: a_prec, b: b_prec })
  }

  /// Number of operand pairs a single tree evaluation consumes at `pair`, `H² / (a_prec·b_prec)`.
  pub fn operand_count(&self, pair: PrecisionPair) -> usize {
    (self.high_prec as usize * self.high_prec as usize) / (pair.a as usize * pair.b as usize)
  }

  /// Range of the values representable in `precision` bits under this configuration's
  /// signedness.
  pub fn value_range(&self, precision: u32) -> RangeInclusive<i128> {
    self.signedness.range(precision)
  }

  /// Check that `values` has exactly `expected` elements, all representable in `precision` bits.
  pub(crate) fn check_values(
    &self,
    operand: &'static str,
    values: &[i128],
    precision: u32,
    expected: usize,
  ) -> Result<()> {
    if values.len() != expected {
      return Err(Error::LengthMismatch { operand, expected, found: values.len() })
    }
    let range = self.value_range(precision);
    match values.iter().position(|v| !range.contains(v)) {
      Some(index) => Err(Error::ValueOutOfRange { index, value: values[index], precision }),
      None => Ok(()),
    }
  }

  /// Check a pair of operand vectors for `pair`: lengths and value ranges.
  pub fn check_operands(&self, pair: PrecisionPair, a: &[i128], b: &[i128]) -> Result<()> {
    let count = self.operand_count(pair);
    self.check_values("a", a, pair.a, count)?;
    self.check_values("b", b, pair.b, count)
  }
}

/// The precisions `(a_prec, b_prec)` at which operands A and B are currently supplied.
///
/// Only obtainable through [`FusionConfig::pair`] (or [`FusionConfig::pairs`]), so a
/// `PrecisionPair` in hand is always valid for the configuration that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrecisionPair {
  a: u32,
  b: u32,
}

impl PrecisionPair {
  #[cfg(test)]
  pub(crate) const fn new_unchecked(a: u32, b: u32) -> Self {
    Self { a, b }
  }

  pub fn a_prec(&self) -> u32 { self.a }

  pub fn b_prec(&self) -> u32 { self.b }
}

/// Formats as `"{a_prec}x{b_prec}"`, e.g. `8x2`.
impl fmt::Display for PrecisionPair {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.a, self.b)
  }
}
