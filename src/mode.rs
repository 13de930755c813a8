//! The precision mode code, shared by the device under test and the oracle.
//!
//! At every level of the tree above the leaves, the device needs to know, for each operand,
//! whether it is *low* precision relative to that level (its values fit in one child, so the four
//! children multiply independent operands along that axis) or *high* precision (it spans both
//! children along that axis, which must then be fused with a shift). That is two bits per level:
//!
//! ```text
//!   threshold:   H/2       H/4      …      L
//!   field:     [a b]     [a b]      …    [a b]
//!              msb                         lsb
//! ```
//!
//! where `a` (the more significant bit of each field) is set iff `a_prec ≤ threshold`, and
//! likewise `b`. The field with threshold `L·2^t` lives at bit offset `2t`, so it is also the
//! field that controls the combination of tree level `t` into level `t+1`.

use core::fmt;

use crate::config::{FusionConfig, PrecisionPair};
use crate::{Error, Result};

/// The encoded precision mode for a [`PrecisionPair`]. See the [module docs](self).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeCode(u32);

/// One 2-bit field of a [`ModeCode`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeField {
  /// Operand A is low precision at this level.
  pub a_low: bool,
  /// Operand B is low precision at this level.
  pub b_low: bool,
}

impl ModeField {
  pub const fn from_bits(bits: u32) -> Self {
    Self { a_low: bits & 0b10 != 0, b_low: bits & 0b01 != 0 }
  }

  pub const fn to_bits(self) -> u32 {
    (self.a_low as u32) << 1 | self.b_low as u32
  }

  /// Shift (log2 of the weight) applied to child `(ii, jj)` when combining four children of
  /// precision `prec`.
  ///
  /// Rows (`ii`) run along operand B's slices and columns (`jj`) along operand A's, so the upper
  /// child along an axis is shifted by `prec` only if the corresponding operand is still high
  /// precision here.
  pub const fn weight_shift(self, ii: u32, jj: u32, prec: u32) -> u32 {
    (!self.b_low as u32) * ii * prec + (!self.a_low as u32) * jj * prec
  }
}

impl ModeCode {
  /// Encode `pair` for `config`.
  ///
  /// ```
  /// # use fusion_oracle::{FusionConfig, ModeCode};
  /// let config = FusionConfig::new(8, 2).unwrap();
  /// // Threshold 4: a is high, b is low. Threshold 2: both high.
  /// let mode = ModeCode::encode(&config, config.pair(8, 4).unwrap());
  /// assert_eq!(mode.bits(), 0b01_00);
  /// ```
  pub fn encode(config: &FusionConfig, pair: PrecisionPair) -> Self {
    let mut mode = 0;
    let mut threshold = config.high_prec() / 2;
    while threshold >= config.low_prec() {
      let field = ModeField { a_low: pair.a_prec() <= threshold, b_low: pair.b_prec() <= threshold };
      mode = mode << 2 | field.to_bits();
      threshold /= 2;
    }
    Self(mode)
  }

  /// Recover the precision pair this code was encoded from.
  ///
  /// Codes that are wider than [`width`](Self::width) or that no pair encodes to (e.g. an
  /// operand marked low at a fine level but high at a coarser one) are rejected.
  pub fn decode(self, config: &FusionConfig) -> Result<PrecisionPair> {
    let invalid = Error::InvalidModeCode { code: self.0 };
    let width = Self::width(config);
    if width < u32::BITS && self.0 >> width != 0 { return Err(invalid) }

    // An operand of precision `L·2^k` is high precision at exactly the `k` finest levels.
    let levels = config.num_levels() - 1;
    let high_levels = |low: fn(ModeField) -> bool| {
      (0 .. levels).filter(|&level| !low(self.field(level))).count() as u32
    };
    let a_prec = config.level_prec(high_levels(|f| f.a_low));
    let b_prec = config.level_prec(high_levels(|f| f.b_low));

    let pair = config.pair(a_prec, b_prec)?;
    if Self::encode(config, pair) == self { Ok(pair) } else { Err(invalid) }
  }

  /// A mode code from its raw bits, as captured from a device.
  pub const fn from_bits(bits: u32) -> Self {
    Self(bits)
  }

  pub const fn bits(self) -> u32 {
    self.0
  }

  /// Width in bits of mode codes for `config`, `2·(num_levels - 1)`.
  pub fn width(config: &FusionConfig) -> u32 {
    2 * (config.num_levels() - 1)
  }

  /// The field controlling the combination of tree level `level` (0 = leaf) into `level + 1`.
  /// Levels beyond the code read as `0b00` (both operands at high precision).
  pub const fn field(self, level: u32) -> ModeField {
    let bits = match self.0.checked_shr(level.saturating_mul(2)) {
      Some(bits) => bits & 0b11,
      None => 0,
    };
    ModeField::from_bits(bits)
  }
}

impl fmt::Binary for ModeCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Binary::fmt(&self.0, f)
  }
}
