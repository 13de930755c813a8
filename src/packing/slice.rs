/// Slice `value`, a `precision`-bit integer, into `precision / low_prec` pieces of `low_prec` bits,
/// least significant first.
///
/// Every slice is the unsigned value of its bits, except the most significant slice of a
/// *negative* value, which is sign-extended. For values in the signed range of `precision` this
/// is ordinary two's complement slicing; for non-negative values (in particular, unsigned values
/// whose msb is set) no slice is ever negative. Either way, [`recompose`] gives back `value`.
///
/// ```
/// # use fusion_oracle::packing::decompose;
/// assert_eq!(decompose(-5, 4, 2), [0b11, -2]);  // -5 = -2·4 + 3
/// assert_eq!(decompose(13, 4, 1), [1, 0, 1, 1]);
/// ```
pub fn decompose(value: i128, precision: u32, low_prec: u32) -> Vec<i128> {
  debug_assert!(low_prec > 0 && precision % low_prec == 0);
  let pieces = precision / low_prec;
  let mask = (1i128 << low_prec) - 1;
  (0 .. pieces)
    .map(|k| {
      // Arithmetic shift, so that the bits of negative values are their two's complement bits.
      let raw = value >> (k * low_prec) & mask;
      if k == pieces - 1 && value < 0 { raw - (1 << low_prec) } else { raw }
    })
    .collect()
}

/// Inverse of [`decompose`]: `Σ slices[k] · 2^(k·low_prec)`.
pub fn recompose(slices: &[i128], low_prec: u32) -> i128 {
  slices.iter().enumerate().map(|(k, &s)| s * (1i128 << (k as u32 * low_prec))).sum()
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn slices_of_small_values() {
    assert_eq!(decompose(-1, 8, 2), [3, 3, 3, -1]);
    assert_eq!(decompose(-128, 8, 2), [0, 0, 0, -2]);
    assert_eq!(decompose(127, 8, 2), [3, 3, 3, 1]);
    assert_eq!(decompose(-2, 2, 2), [-2]);
    assert_eq!(decompose(255, 8, 4), [15, 15]);
    assert_eq!(decompose(-7, 4, 4), [-7]);
    assert_eq!(recompose(&[3, 3, 3, -1], 2), -1);
    assert_eq!(recompose(&[], 2), 0);
  }

  proptest!{
    #![proptest_config(ProptestConfig::with_cases(crate::PROPTEST_CASES))]

    #[test]
    fn recompose_inverts_decompose(
      (low, precision, value) in (0 .. 6u32, 0 .. 6u32).prop_flat_map(|(l, k)| {
        let low = 1 << l;
        let precision = low << k;
        let precision = precision.min(32);
        let low = low.min(precision);
        (Just(low), Just(precision), -(1i128 << (precision - 1)) .. (1i128 << precision))
      })
    ) {
      let slices = decompose(value, precision, low);
      prop_assert_eq!(slices.len() as u32, precision / low);
      let (top, rest) = slices.split_last().unwrap();
      prop_assert!(rest.iter().all(|&s| (0 .. 1 << low).contains(&s)));
      prop_assert_eq!(*top < 0, value < 0);
      prop_assert_eq!(recompose(&slices, low), value);
    }
  }
}
