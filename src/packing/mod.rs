//! Packing operands onto the device's flat input buses, and slicing them into the low-precision
//! pieces the leaf multipliers consume.
//!
//! Some notation used in the comments:
//!
//!   - **Field `k` of width `w`**: bits `k·w .. (k+1)·w` of a signal, counted from the lsb.
//!   - **First/last value**: in a packed sequence, the first value is the *most* significant
//!     field and the last value is field 0. This is the order a hardware bus `{v0, v1, …}`
//!     concatenation produces.

use core::fmt;

use bitvec::prelude::*;

/// A flat bit vector of fixed width, e.g. one operand bus of the device. Bit 0 is the lsb.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PackedSignal {
  bits: BitVec<u64, Lsb0>,
}

/// Basic bit access: get/set ranges and fields, concatenation, permutation.
mod basics;

/// Slicing values into `L`-bit two's complement pieces, and back.
mod slice;

/// Packing and unpacking of value sequences into fields.
mod fields;

/// Operand-bus layout of the device.
mod operand;

pub use fields::{pack_fields, unpack_fields};
pub use operand::OperandPacker;
pub use slice::{decompose, recompose};

impl fmt::Debug for PackedSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("PackedSignal")
      .field(&format_args!("{}'h{:x}", self.width(), self))
      .finish()
  }
}

impl fmt::LowerHex for PackedSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let digits = self.width().div_ceil(4);
    for d in (0 .. digits).rev() {
      let len = (self.width() - 4 * d).min(4) as u32;
      write!(f, "{:x}", self.bits(4 * d, len))?;
    }
    Ok(())
  }
}

impl fmt::Binary for PackedSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for bit in self.bits.iter().by_vals().rev() {
      f.write_str(if bit { "1" } else { "0" })?;
    }
    Ok(())
  }
}
