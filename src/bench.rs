//! Re-export some internals for benchmarking purposes; available with feature = "bench".

use crate::config::FusionConfig;
use crate::mode::ModeField;
use crate::packing::{decompose, PackedSignal};
use crate::swizzle::SwizzleTable;
use crate::Result;

impl SwizzleTable {
  pub fn bench_check_bijective(&self) -> Result<()> {
    self.check_bijective()
  }
}

impl FusionConfig {
  pub fn bench_check_values(&self, values: &[i128], precision: u32) -> Result<()> {
    self.check_values("bench", values, precision, values.len())
  }
}

// Export these for inspection with `cargo asm`.

#[unsafe(no_mangle)]
pub fn reduce_level_4(prev: &[i128], field: ModeField, prec: u32) -> Vec<i128> {
  crate::tree::reduce_level(prev, 4, field, prec)
}

#[unsafe(no_mangle)]
pub fn reduce_level_16(prev: &[i128], field: ModeField, prec: u32) -> Vec<i128> {
  crate::tree::reduce_level(prev, 16, field, prec)
}

//

#[unsafe(no_mangle)]
pub fn decompose_16_by_2(value: i128) -> Vec<i128> {
  decompose(value, 16, 2)
}

#[unsafe(no_mangle)]
pub fn decompose_32_by_1(value: i128) -> Vec<i128> {
  decompose(value, 32, 1)
}

//

#[unsafe(no_mangle)]
pub fn signal_field_signed_4(signal: &PackedSignal, index: usize) -> i128 {
  signal.field_signed(index, 4)
}

#[unsafe(no_mangle)]
pub fn signal_set_bits(signal: &mut PackedSignal, offset: usize, len: u32, value: u64) {
  signal.set_bits(offset, len, value)
}
