//! The error type of this crate.
//!
//! Errors come in two flavours:
//!
//!   - **Precondition violations**: the caller handed us something invalid (a precision that is
//!     not a power of two, an operand vector of the wrong length, a value that does not fit its
//!     declared precision…). These are rejected before anything is computed, and nothing is ever
//!     silently clamped or truncated.
//!   - **Oracle defects** ([`Error::Oracle`]): an internal consistency check of the model itself
//!     failed. These point at a bug in *this* crate, never at the device under test.
//!
//! Value mismatches between the oracle and a device are **not** errors; they are recorded in a
//! [`Report`](crate::Report).

use crate::config::PrecisionPair;

/// Shorthand for `Result<T, fusion_oracle::Error>`.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  #[error("precision {0} is not a power of two")]
  NotPowerOfTwo(u32),

  #[error("precision {precision} is outside the supported range [{low}, {high}]")]
  PrecisionOutOfRange { precision: u32, low: u32, high: u32 },

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("operand {operand} has {found} values, expected {expected}")]
  LengthMismatch { operand: &'static str, expected: usize, found: usize },

  #[error("value {value} at index {index} is not representable in {precision} bits")]
  ValueOutOfRange { index: usize, value: i128, precision: u32 },

  #[error("mode code {code:#b} does not encode any precision pair")]
  InvalidModeCode { code: u32 },

  #[error("invalid workload: {0}")]
  InvalidWorkload(String),

  #[error("oracle defect: {0}")]
  Oracle(#[from] OracleDefect),
}

impl Error {
  /// Is this an internal defect of the model (as opposed to a bad input)?
  pub fn is_oracle_defect(&self) -> bool {
    matches!(self, Error::Oracle(_))
  }
}

/// A structural inconsistency detected inside the oracle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleDefect {
  #[error("swizzle table for {pair} is not a permutation of [0, {len})")]
  SwizzleNotBijective { pair: PrecisionPair, len: usize },

  #[error("reduction produced {found} levels, configuration implies {expected}")]
  LevelCount { expected: usize, found: usize },

  #[error("tree root {root} differs from direct dot product {direct} for {pair}")]
  RootMismatch { pair: PrecisionPair, root: i128, direct: i128 },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defects_are_distinguishable() {
    let pair = PrecisionPair::new_unchecked(2, 4);
    let defect: Error = OracleDefect::RootMismatch { pair, root: 1, direct: 2 }.into();
    assert!(defect.is_oracle_defect());
    assert!(!Error::NotPowerOfTwo(3).is_oracle_defect());
    assert_eq!(
      defect.to_string(),
      "oracle defect: tree root 1 differs from direct dot product 2 for 2x4",
    );
  }
}
