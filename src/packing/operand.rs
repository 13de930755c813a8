use super::*;

use crate::config::{FusionConfig, PrecisionPair, Signedness};
use crate::swizzle::SwizzleTable;
use crate::{Error, Result};

/// Lays operand vectors out on the device's `H²/L`-bit operand buses.
///
/// Operands are packed in *rows* of `H / precision` values (one row is `H` bits wide, the width
/// of one row of leaf multipliers), and every row may be repeated so that the bus is always
/// filled completely. The first row, and the first value within a row, is the most significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandPacker {
  config: FusionConfig,
}

impl OperandPacker {
  pub fn new(config: &FusionConfig) -> Self {
    Self { config: *config }
  }

  pub fn config(&self) -> &FusionConfig {
    &self.config
  }

  /// Pack `values` of `precision` bits in rows of `H / precision`, each row repeated `repeat`
  /// times.
  ///
  /// ```
  /// # use fusion_oracle::{FusionConfig, packing::OperandPacker};
  /// let config = FusionConfig::new(4, 2).unwrap();
  /// let packer = OperandPacker::new(&config);
  /// let bus = packer.pack(&[1, 2, 3, -1], 2, 1).unwrap();
  /// assert_eq!(bus.to_u128(), Some(0b01_10_11_11));
  /// let bus = packer.pack(&[1, 2], 2, 2).unwrap();
  /// assert_eq!(bus.to_u128(), Some(0b01_10_01_10));
  /// ```
  pub fn pack(&self, values: &[i128], precision: u32, repeat: usize) -> Result<PackedSignal> {
    self.config.check_precision(precision)?;
    let per_row = (self.config.high_prec() / precision) as usize;
    if values.len() % per_row != 0 {
      return Err(Error::LengthMismatch {
        operand: "row",
        expected: values.len().next_multiple_of(per_row),
        found: values.len(),
      })
    }
    let expanded: Vec<i128> = values.chunks(per_row)
      .flat_map(|row| core::iter::repeat_n(row, repeat).flatten().copied())
      .collect();
    pack_fields(&expanded, precision)
  }

  /// The A bus for `pair`: every row of A is repeated once per slice of B, so that each B slice
  /// row of the leaf grid sees the full row of A.
  pub fn pack_a(&self, pair: PrecisionPair, a: &[i128]) -> Result<PackedSignal> {
    self.config.check_values("a", a, pair.a_prec(), self.config.operand_count(pair))?;
    self.pack(a, pair.a_prec(), (pair.b_prec() / self.config.low_prec()) as usize)
  }

  /// The B bus for the pair of `table`: B's operands reordered and replicated by the swizzle,
  /// packed without further repetition.
  pub fn pack_b(&self, table: &SwizzleTable, b: &[i128]) -> Result<PackedSignal> {
    table.check_config(&self.config)?;
    let pair = table.pair();
    self.config.check_values("b", b, pair.b_prec(), self.config.operand_count(pair))?;
    self.pack(&table.swizzle_operands(b), pair.b_prec(), 1)
  }

  /// B packed the same way as A (rows repeated once per slice of A), *without* swizzling. This
  /// is what a device reading B straight instead of transposed would need.
  pub fn pack_b_natural(&self, pair: PrecisionPair, b: &[i128]) -> Result<PackedSignal> {
    self.config.check_values("b", b, pair.b_prec(), self.config.operand_count(pair))?;
    self.pack(b, pair.b_prec(), (pair.a_prec() / self.config.low_prec()) as usize)
  }

  /// Apply the slot permutation of `table` to a naturally packed B bus.
  pub fn swizzle_bus(&self, table: &SwizzleTable, natural: &PackedSignal) -> PackedSignal {
    natural.permute_fields(self.config.low_prec(), table.slots())
  }

  /// Inverse of [`pack`](Self::pack) with `repeat = 1`, interpreting values according to the
  /// configured signedness.
  pub fn unpack(&self, signal: &PackedSignal, precision: u32) -> Result<Vec<i128>> {
    self.config.check_precision(precision)?;
    unpack_fields(signal, precision, self.config.signedness() == Signedness::Signed)
  }
}
