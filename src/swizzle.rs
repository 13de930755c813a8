//! Operand B swizzling.
//!
//! The leaf grid is `N × N` multipliers of `L × L` bits. Leaf `(i, j)` (row `i`, column `j`)
//! multiplies one `L`-bit slice of an A operand with one `L`-bit slice of a B operand, and which
//! slices those are depends on *both* operand precisions. For a pair `(a_prec, b_prec)`:
//!
//!   - along a row, consecutive blocks of `a_prec / L` columns hold the slices of one A operand,
//!     least significant slice first;
//!   - along a column, consecutive blocks of `b_prec / L` rows hold the slices of one B operand;
//!   - the block at block-coordinates `(bi, bj)` multiplies operand
//!     `count - 1 - (bi · H/a_prec + bj)`, i.e. operand 0 sits in the last block, mirroring the
//!     fact that the first operand is the most significant field of the bus.
//!
//! Operand A is driven onto its bus in exactly this order. Operand B's bus however is read by the
//! device *transposed* (leaf `(i, j)` reads B from bus slot `(j, i)`), so B's operands have to be
//! reordered and replicated before packing. A [`SwizzleTable`] captures this reordering, both at
//! operand granularity (what a driver packs) and at slice granularity (a permutation of the `N²`
//! bus slots, which is what makes the transformation checkable).

use crate::config::{FusionConfig, PrecisionPair};
use crate::error::OracleDefect;
use crate::{Error, Result};

/// Where the inputs of one leaf multiplier come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSource {
  /// Index of the operand pair, into both the A and the (unswizzled) B vectors.
  pub operand: usize,
  /// Which `L`-bit slice of A, 0 = least significant.
  pub a_slice: u32,
  /// Which `L`-bit slice of B, 0 = least significant.
  pub b_slice: u32,
}

/// The swizzle for one [`PrecisionPair`]. See the [module docs](self).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwizzleTable {
  pair: PrecisionPair,
  /// `(H, L)` of the configuration the table was built for.
  precisions: (u32, u32),
  side: usize,
  /// Slices per A operand and per B operand.
  a_slices: usize,
  b_slices: usize,
  /// `slots[s]` = slot of the naturally packed B bus feeding slot `s` of the swizzled bus.
  slots: Vec<usize>,
  /// Operand indices of B, in the order they are packed onto the bus.
  operand_order: Vec<usize>,
  /// Leaf sources, row-major.
  leaves: Vec<LeafSource>,
}

impl SwizzleTable {
  /// Compute the table for `pair`. Pure function of the precisions.
  pub fn new(config: &FusionConfig, pair: PrecisionPair) -> Result<Self> {
    let side = config.grid_side();
    let low = config.low_prec();
    let count = config.operand_count(pair);

    // `b_divide` columns per A operand, `a_divide` rows per B operand.
    let b_divide = (pair.a_prec() / low) as usize;
    let a_divide = (pair.b_prec() / low) as usize;
    let a_per_row = (config.high_prec() / pair.a_prec()) as usize;
    let b_per_row = (config.high_prec() / pair.b_prec()) as usize;

    let leaves = (0 .. side * side)
      .map(|cell| {
        let (i, j) = (cell / side, cell % side);
        LeafSource {
          operand: count - 1 - ((i / a_divide) * a_per_row + j / b_divide),
          a_slice: (j % b_divide) as u32,
          b_slice: (i % a_divide) as u32,
        }
      })
      .collect();

    // The driver packs B in rows of `b_per_row` operands, one row per column of the leaf grid,
    // each A block of columns reusing the same B operands.
    let operand_order = (0 .. side)
      .flat_map(|j| (0 .. b_per_row).map(move |m| j / b_divide + m * a_per_row))
      .collect();

    // Slot-level view. Swizzled slot `(r, c)` holds slice `l` of operand `v`, copy `k` (each B
    // slice is replicated `b_divide` times on the bus); find the slot holding the same slice copy
    // in the natural packing, which repeats every row of B operands `b_divide` times.
    let slots = (0 .. side * side)
      .map(|slot| {
        let (r, c) = (slot / side, slot % side);
        let column = side - 1 - r;
        let m = b_per_row - 1 - c / a_divide;
        let l = c % a_divide;
        let v = column / b_divide + m * a_per_row;
        let k = column % b_divide;
        let (bi, bj) = ((count - 1 - v) / b_per_row, (count - 1 - v) % b_per_row);
        (k + b_divide * bi) * side + l + a_divide * bj
      })
      .collect();

    let precisions = (config.high_prec(), config.low_prec());
    let table = Self { pair, precisions, side, a_slices: b_divide, b_slices: a_divide, slots, operand_order, leaves };
    table.check_bijective()?;
    Ok(table)
  }

  pub(crate) fn check_bijective(&self) -> Result<()> {
    let len = self.side * self.side;
    let mut seen = vec![false; len];
    for &slot in &self.slots {
      if slot >= len || core::mem::replace(&mut seen[slot], true) {
        return Err(OracleDefect::SwizzleNotBijective { pair: self.pair, len }.into())
      }
    }
    if self.slots.len() != len {
      return Err(OracleDefect::SwizzleNotBijective { pair: self.pair, len }.into())
    }
    Ok(())
  }

  pub fn pair(&self) -> PrecisionPair {
    self.pair
  }

  /// Fail unless the table belongs to a configuration with the same leaf grid as `config`.
  pub fn check_config(&self, config: &FusionConfig) -> Result<()> {
    let (high, low) = self.precisions;
    if (config.high_prec(), config.low_prec()) != (high, low) {
      return Err(Error::InvalidConfig(format!(
        "swizzle table for {} built for {high}/{low} bits, used with {}/{} bits",
        self.pair, config.high_prec(), config.low_prec(),
      )))
    }
    Ok(())
  }

  /// The slot permutation: `swizzled[i] = natural[slots()[i]]`, over the `N²` B bus slots.
  pub fn slots(&self) -> &[usize] {
    &self.slots
  }

  /// Apply the slot permutation to a per-slot sequence (e.g. B's `L`-bit slices in natural
  /// order).
  pub fn apply<T: Copy>(&self, natural: &[T]) -> Vec<T> {
    debug_assert_eq!(natural.len(), self.slots.len());
    self.slots.iter().map(|&i| natural[i]).collect()
  }

  /// Indices into the B operand vector, in bus order (with repetitions).
  pub fn operand_order(&self) -> &[usize] {
    &self.operand_order
  }

  /// B's operands, reordered and replicated in bus order.
  pub fn swizzle_operands<T: Copy>(&self, b: &[T]) -> Vec<T> {
    self.operand_order.iter().map(|&i| b[i]).collect()
  }

  /// Source of the inputs of leaf `(i, j)`.
  pub fn leaf(&self, i: usize, j: usize) -> LeafSource {
    self.leaves[i * self.side + j]
  }

  /// All leaf sources, row-major.
  pub fn leaves(&self) -> &[LeafSource] {
    &self.leaves
  }

  /// Index into A's slice vector (operand-major, least significant slice first) feeding leaf
  /// `(i, j)`.
  pub fn a_source(&self, i: usize, j: usize) -> usize {
    let leaf = self.leaf(i, j);
    leaf.operand * self.a_slices + leaf.a_slice as usize
  }

  /// Index into B's slice vector (operand-major, least significant slice first) feeding leaf
  /// `(i, j)`.
  pub fn b_source(&self, i: usize, j: usize) -> usize {
    let leaf = self.leaf(i, j);
    leaf.operand * self.b_slices + leaf.b_slice as usize
  }
}

/// All the swizzle tables of a configuration, computed once.
///
/// Immutable after construction and freely shareable across test vectors (and threads).
#[derive(Debug, Clone)]
pub struct SwizzleCache {
  config: FusionConfig,
  tables: Vec<SwizzleTable>,
}

impl SwizzleCache {
  pub fn new(config: &FusionConfig) -> Result<Self> {
    let tables = config.pairs()
      .map(|pair| SwizzleTable::new(config, pair))
      .collect::<Result<_>>()?;
    Ok(Self { config: *config, tables })
  }

  pub fn config(&self) -> &FusionConfig {
    &self.config
  }

  /// The table for `pair`. Fails if `pair` is not a pair of this cache's configuration.
  pub fn get(&self, pair: PrecisionPair) -> Result<&SwizzleTable> {
    let pair = self.config.pair(pair.a_prec(), pair.b_prec())?;
    let levels = self.config.num_levels() as usize;
    let index = |prec: u32| (prec / self.config.low_prec()).trailing_zeros() as usize;
    self.tables.get(index(pair.a_prec()) * levels + index(pair.b_prec()))
      .ok_or_else(|| Error::InvalidConfig(format!("no swizzle table for {pair}")))
  }

  /// The table whose key (`"{a_prec}x{b_prec}"`) is `key`.
  pub fn by_key(&self, key: &str) -> Option<&SwizzleTable> {
    self.tables.iter().find(|table| table.pair.to_string() == key)
  }

  pub fn iter(&self) -> impl Iterator<Item = &SwizzleTable> {
    self.tables.iter()
  }
}
