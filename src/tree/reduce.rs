use crate::mode::ModeField;

/// Combine a `side × side` level of partial sums (row-major) into the `side/2 × side/2` level
/// above it.
///
/// Parent `(i, j)` is the sum of its children `(2i + ii, 2j + jj)`, each shifted left by
/// `field.weight_shift(ii, jj, prec)`, where `prec` is the precision of the children.
///
/// ```
/// # use fusion_oracle::{ModeField, tree::reduce_level};
/// let both_high = ModeField { a_low: false, b_low: false };
/// assert_eq!(reduce_level(&[1, 2, 3, 4], 2, both_high, 1), [1 + 2*2 + 3*2 + 4*4]);
/// let both_low = ModeField { a_low: true, b_low: true };
/// assert_eq!(reduce_level(&[1, 2, 3, 4], 2, both_low, 1), [10]);
/// ```
pub fn reduce_level(prev: &[i128], side: usize, field: ModeField, prec: u32) -> Vec<i128> {
  debug_assert_eq!(prev.len(), side * side);
  let half = side / 2;
  let mut next = Vec::with_capacity(half * half);
  for i in 0 .. half {
    for j in 0 .. half {
      let mut sum = 0;
      for ii in 0 .. 2 {
        for jj in 0 .. 2 {
          let child = prev[(2 * i + ii) * side + 2 * j + jj];
          sum += child << field.weight_shift(ii as u32, jj as u32, prec);
        }
      }
      next.push(sum);
    }
  }
  next
}
