use super::*;

impl PackedSignal {
  /// An all-zero signal of `width` bits.
  pub fn zeroed(width: usize) -> Self {
    Self { bits: BitVec::repeat(false, width) }
  }

  /// A signal of `width ≤ 128` bits holding `value` (truncated to `width` bits).
  pub fn from_u128(value: u128, width: usize) -> Self {
    assert!(width <= 128, "from_u128 supports at most 128 bits, got {width}");
    let mut signal = Self::zeroed(width);
    if width > 0 { signal.bits.store_le(value) }
    signal
  }

  /// The value of the signal, if it is at most 128 bits wide.
  pub fn to_u128(&self) -> Option<u128> {
    match self.width() {
      0 => Some(0),
      1 ..= 128 => Some(self.bits.load_le()),
      _ => None,
    }
  }

  pub fn width(&self) -> usize {
    self.bits.len()
  }

  /// The underlying bits, lsb first.
  pub fn as_bitslice(&self) -> &BitSlice<u64, Lsb0> {
    &self.bits
  }

  fn range(&self, offset: usize, len: u32) -> core::ops::Range<usize> {
    assert!(len <= 64 && offset + len as usize <= self.width(), "bit range {offset}+{len} out of {} bits", self.width());
    offset .. offset + len as usize
  }

  /// Bits `offset .. offset + len` of the signal (`len ≤ 64`), in the lsbs of the result.
  ///
  /// # Panics
  ///
  /// If the range is not inside the signal.
  pub fn bits(&self, offset: usize, len: u32) -> u64 {
    let range = self.range(offset, len);
    if len == 0 { return 0 }
    self.bits[range].load_le()
  }

  /// Overwrite bits `offset .. offset + len` of the signal (`len ≤ 64`) with the `len` lsbs of
  /// `value`.
  ///
  /// # Panics
  ///
  /// If the range is not inside the signal.
  pub fn set_bits(&mut self, offset: usize, len: u32, value: u64) {
    let range = self.range(offset, len);
    if len == 0 { return }
    self.bits[range].store_le(value)
  }

  /// Field `index` of width `width`, unsigned.
  pub fn field(&self, index: usize, width: u32) -> u64 {
    self.bits(index * width as usize, width)
  }

  /// Field `index` of width `width`, interpreted as two's complement.
  pub fn field_signed(&self, index: usize, width: u32) -> i128 {
    let raw = self.field(index, width) as i128;
    if width > 0 && raw >> (width - 1) & 1 == 1 { raw - (1i128 << width) } else { raw }
  }

  pub fn set_field(&mut self, index: usize, width: u32, value: u64) {
    self.set_bits(index * width as usize, width, value)
  }

  /// Concatenate `parts`, the first one ending up most significant (like `{p0, p1, …}` in
  /// Verilog).
  pub fn concat<'a>(parts: impl IntoIterator<Item = &'a PackedSignal, IntoIter: DoubleEndedIterator>) -> Self {
    let mut bits = BitVec::new();
    for part in parts.into_iter().rev() {
      bits.extend_from_bitslice(part.bits.as_bitslice());
    }
    Self { bits }
  }

  /// A signal whose field `i` (of width `field_width`) is field `table[i]` of `self`.
  ///
  /// # Panics
  ///
  /// If `table` does not have exactly `width / field_width` entries, or refers to fields outside
  /// the signal.
  pub fn permute_fields(&self, field_width: u32, table: &[usize]) -> Self {
    assert_eq!(table.len() * field_width as usize, self.width(), "permutation does not cover the signal");
    let mut out = Self::zeroed(self.width());
    for (i, &src) in table.iter().enumerate() {
      out.set_field(i, field_width, self.field(src, field_width));
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bits_across_words() {
    let mut signal = PackedSignal::zeroed(200);
    signal.set_bits(60, 10, 0b11_0110_1011);
    assert_eq!(signal.bits(60, 10), 0b11_0110_1011);
    assert_eq!(signal.bits(60, 4), 0b1011);
    assert_eq!(signal.bits(64, 6), 0b11_0110);
    assert_eq!(signal.as_bitslice()[60 .. 64].load_le::<u8>(), 0b1011);
    assert_eq!(signal.as_bitslice()[64 .. 128].load_le::<u64>(), 0b11_0110);

    signal.set_bits(120, 64, u64::MAX);
    assert_eq!(signal.bits(120, 64), u64::MAX);
    assert_eq!(signal.bits(119, 2), 0b10);
    signal.set_bits(128, 8, 0);
    assert_eq!(signal.bits(120, 64), 0xffff_ffff_ffff_00ff);
  }

  #[test]
  fn set_bits_masks_value() {
    let mut signal = PackedSignal::zeroed(16);
    signal.set_bits(4, 4, 0xfff);
    assert_eq!(signal.to_u128(), Some(0x00f0));
  }

  #[test]
  #[should_panic]
  fn bits_out_of_range() {
    PackedSignal::zeroed(16).bits(10, 8);
  }

  #[test]
  fn u128_round_trip() {
    let value = 0x0123_4567_89ab_cdef_fedc_ba98_7654_3210u128;
    assert_eq!(PackedSignal::from_u128(value, 128).to_u128(), Some(value));
    assert_eq!(PackedSignal::from_u128(value, 12).to_u128(), Some(0x210));
    assert_eq!(PackedSignal::zeroed(129).to_u128(), None);
  }

  #[test]
  fn signed_fields() {
    let signal = PackedSignal::from_u128(0b10_01_11_00, 8);
    assert_eq!(signal.field_signed(0, 2), 0);
    assert_eq!(signal.field_signed(1, 2), -1);
    assert_eq!(signal.field_signed(2, 2), 1);
    assert_eq!(signal.field_signed(3, 2), -2);
    assert_eq!(signal.field(3, 2), 2);
  }

  #[test]
  fn concat_puts_first_part_on_top() {
    let hi = PackedSignal::from_u128(0b101, 3);
    let lo = PackedSignal::from_u128(0xabcd_ef01_2345_6789_0f, 72);
    let both = PackedSignal::concat([&hi, &lo]);
    assert_eq!(both.width(), 75);
    assert_eq!(both.to_u128(), Some(0b101 << 72 | 0xabcd_ef01_2345_6789_0f));
    assert_eq!(PackedSignal::concat(core::iter::empty::<&PackedSignal>()).width(), 0);
  }

  #[test]
  fn permute() {
    let signal = PackedSignal::from_u128(0x4321, 16);
    assert_eq!(signal.permute_fields(4, &[3, 2, 1, 0]).to_u128(), Some(0x1234));
    assert_eq!(signal.permute_fields(4, &[0, 0, 0, 0]).to_u128(), Some(0x1111));
  }
}
