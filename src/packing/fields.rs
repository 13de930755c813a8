use super::*;

use crate::{Error, Result};

/// The raw `precision`-bit field encoding `value`: negative values are offset by `2^precision`.
///
/// Accepts anything representable in `precision` bits either as signed or as unsigned, i.e.
/// `-2^(precision-1) ≤ value < 2^precision`.
pub(crate) fn encode_field(index: usize, value: i128, precision: u32) -> Result<u64> {
  let min = -(1i128 << (precision - 1));
  let max = 1i128 << precision;
  if value < min || value >= max {
    return Err(Error::ValueOutOfRange { index, value, precision })
  }
  let raw = if value < 0 { value + max } else { value };
  Ok(raw as u64)
}

fn check_field_precision(precision: u32) -> Result<()> {
  if precision == 0 || precision > 64 {
    Err(Error::PrecisionOutOfRange { precision, low: 1, high: 64 })
  } else {
    Ok(())
  }
}

/// Concatenate `values` into `precision`-bit fields, the first value most significant.
///
/// ```
/// # use fusion_oracle::packing::pack_fields;
/// let signal = pack_fields(&[1, -1, 2], 3).unwrap();
/// assert_eq!(signal.to_u128(), Some(0b001_111_010));
/// ```
pub fn pack_fields(values: &[i128], precision: u32) -> Result<PackedSignal> {
  check_field_precision(precision)?;
  let mut signal = PackedSignal::zeroed(values.len() * precision as usize);
  for (i, &value) in values.iter().enumerate() {
    let field = encode_field(i, value, precision)?;
    signal.set_field(values.len() - 1 - i, precision, field);
  }
  Ok(signal)
}

/// Inverse of [`pack_fields`]: split `signal` into `precision`-bit fields, the most significant
/// one first. If `signed`, fields whose top bit is set are sign-extended.
pub fn unpack_fields(signal: &PackedSignal, precision: u32, signed: bool) -> Result<Vec<i128>> {
  check_field_precision(precision)?;
  if signal.width() % precision as usize != 0 {
    return Err(Error::InvalidConfig(format!(
      "a {}-bit signal does not split into {precision}-bit fields", signal.width(),
    )))
  }
  let count = signal.width() / precision as usize;
  let values = (0 .. count).rev()
    .map(|k| if signed { signal.field_signed(k, precision) } else { signal.field(k, precision) as i128 })
    .collect();
  Ok(values)
}
