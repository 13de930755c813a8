//! The multiply-reduce tree: what every node of a correct device holds for a given input.
//!
//! The tree has `num_levels` levels. Level 0 is the `N × N` grid of leaf multipliers, each
//! computing the product of one `L`-bit slice of A and one of B (as assigned by the
//! [swizzle](crate::swizzle)). Every node at level `l + 1` combines a `2 × 2` block of level `l`
//! nodes, shifting each child according to the mode field of level `l`
//! ([`ModeField::weight_shift`](crate::ModeField::weight_shift)). The single node at the last level is the root, and for every
//! precision pair it must equal the plain dot product of the operands.

use crate::config::{FusionConfig, PrecisionPair};
use crate::error::OracleDefect;
use crate::mode::ModeCode;
use crate::packing::decompose;
use crate::swizzle::SwizzleTable;
use crate::verify::NodeId;
use crate::{Error, Result};

/// Combining one level of the tree into the next.
mod reduce;

pub use reduce::reduce_level;

/// The direct dot product `Σ a[i]·b[i]`, the ground truth for the tree root.
///
/// Exact for any operands of at most [`FusionConfig::MAX_PRECISION`] bits and at most `2^62`
/// operands.
pub fn dot(a: &[i128], b: &[i128]) -> i128 {
  debug_assert_eq!(a.len(), b.len());
  a.iter().zip(b).map(|(&a, &b)| a * b).sum()
}

/// The expected value of every node of the tree for one test vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTree {
  pair: PrecisionPair,
  mode: ModeCode,
  /// `levels[l]` holds the `(N >> l)²` partial sums of level `l`, row-major.
  levels: Vec<Vec<i128>>,
  /// `(a_slice, b_slice)` of every leaf, row-major.
  leaf_inputs: Vec<(i128, i128)>,
}

impl ExpectedTree {
  /// Evaluate the tree for operands `a`, `b` at `pair`, using the swizzle `table` of that pair.
  ///
  /// Besides rejecting invalid operands, this checks the model against itself: the reduction
  /// must produce exactly `num_levels` levels and a root equal to [`dot`]`(a, b)`. Either
  /// failing is an [oracle defect](Error::Oracle). A `table` of another pair, or built for a
  /// configuration with another leaf grid, is an [`Error::InvalidConfig`].
  pub fn compute(
    config: &FusionConfig,
    table: &SwizzleTable,
    pair: PrecisionPair,
    a: &[i128],
    b: &[i128],
  ) -> Result<Self> {
    table.check_config(config)?;
    if table.pair() != pair {
      return Err(Error::InvalidConfig(format!(
        "swizzle table for {} used to evaluate {pair}", table.pair(),
      )))
    }
    config.check_operands(pair, a, b)?;

    let low = config.low_prec();
    let a_slices: Vec<Vec<i128>> = a.iter().map(|&v| decompose(v, pair.a_prec(), low)).collect();
    let b_slices: Vec<Vec<i128>> = b.iter().map(|&v| decompose(v, pair.b_prec(), low)).collect();
    let leaf_inputs: Vec<(i128, i128)> = table.leaves().iter()
      .map(|leaf| (
        a_slices[leaf.operand][leaf.a_slice as usize],
        b_slices[leaf.operand][leaf.b_slice as usize],
      ))
      .collect();

    let mode = ModeCode::encode(config, pair);
    let mut levels = vec![leaf_inputs.iter().map(|&(a, b)| a * b).collect::<Vec<_>>()];
    let mut side = config.grid_side();
    let mut level = 0;
    while side > 1 {
      let Some(prev) = levels.last() else { break };
      let next = reduce_level(prev, side, mode.field(level), config.level_prec(level));
      levels.push(next);
      side /= 2;
      level += 1;
    }

    let tree = Self { pair, mode, levels, leaf_inputs };
    let expected = config.num_levels() as usize;
    if tree.levels.len() != expected {
      return Err(OracleDefect::LevelCount { expected, found: tree.levels.len() }.into())
    }
    let direct = dot(a, b);
    if tree.root() != direct {
      return Err(OracleDefect::RootMismatch { pair, root: tree.root(), direct }.into())
    }
    Ok(tree)
  }

  pub fn pair(&self) -> PrecisionPair {
    self.pair
  }

  pub fn mode(&self) -> ModeCode {
    self.mode
  }

  pub fn num_levels(&self) -> usize {
    self.levels.len()
  }

  /// Side of the grid of nodes at `level`.
  pub fn side(&self, level: usize) -> usize {
    1 << (self.levels.len() - 1 - level)
  }

  /// The partial sums of `level` (0 = leaves), row-major.
  pub fn level(&self, level: usize) -> &[i128] {
    &self.levels[level]
  }

  /// The root, i.e. the dot product the device should output.
  pub fn root(&self) -> i128 {
    self.levels.last().and_then(|root| root.first()).copied().unwrap_or_default()
  }

  /// The expected output of node `id`, or `None` if there is no such node.
  pub fn node(&self, id: NodeId) -> Option<i128> {
    let level = self.levels.len().checked_sub(1 + id.depth as usize)?;
    let side = self.side(level);
    if id.i >= side || id.j >= side { return None }
    Some(self.levels[level][id.i * side + id.j])
  }

  /// The `(a_slice, b_slice)` leaf `(i, j)` multiplies.
  pub fn leaf_input(&self, i: usize, j: usize) -> (i128, i128) {
    self.leaf_inputs[i * self.side(0) + j]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Signedness;
  use crate::swizzle::SwizzleCache;
  use proptest::prelude::*;

  fn evaluate(config: &FusionConfig, pair: PrecisionPair, a: &[i128], b: &[i128]) -> Result<ExpectedTree> {
    let table = SwizzleTable::new(config, pair)?;
    ExpectedTree::compute(config, &table, pair, a, b)
  }

  #[test]
  fn low_precision_sum_of_operands() {
    let config = FusionConfig::new(8, 2).unwrap();
    let pair = config.pair(2, 2).unwrap();
    let a: Vec<i128> = (0 .. 16).map(|k| k % 4 - 2).collect();
    let tree = evaluate(&config, pair, &a, &[1; 16]).unwrap();
    assert_eq!(tree.root(), a.iter().sum::<i128>());
    assert_eq!(tree.root(), -8);
    assert_eq!(tree.mode().bits(), 0b11_11);
    // No shifts anywhere: each level is the plain sum of its children.
    assert_eq!(tree.level(1).iter().sum::<i128>(), tree.root());
    assert_eq!(tree.level(0).iter().sum::<i128>(), tree.root());
  }

  #[test]
  fn unsigned_single_operand() {
    let config = FusionConfig::new(4, 1).unwrap().with_signedness(Signedness::Unsigned);
    let pair = config.pair(4, 4).unwrap();
    let tree = evaluate(&config, pair, &[5], &[13]).unwrap();
    assert_eq!(tree.root(), 65);
    // Leaf (i, j) multiplies B slice i with A slice j.
    let b_slices: Vec<i128> = (0 .. 4).map(|i| tree.leaf_input(i, 0).1).collect();
    assert_eq!(b_slices, [1, 0, 1, 1]);
    let a_slices: Vec<i128> = (0 .. 4).map(|j| tree.leaf_input(0, j).0).collect();
    assert_eq!(a_slices, [1, 0, 1, 0]);
    assert_eq!(tree.level(0).len(), 16);
    assert_eq!(tree.level(1).len(), 4);
  }

  #[test]
  fn full_precision_is_a_single_leaf() {
    let config = FusionConfig::new(8, 8).unwrap();
    let pair = config.pair(8, 8).unwrap();
    let tree = evaluate(&config, pair, &[-128], &[127]).unwrap();
    assert_eq!(tree.num_levels(), 1);
    assert_eq!(tree.level(0), [-128 * 127]);
    assert_eq!(tree.leaf_input(0, 0), (-128, 127));
    assert_eq!(tree.node(NodeId::ROOT), Some(-128 * 127));
  }

  #[test]
  fn high_precision_pair_in_a_deep_tree() {
    let config = FusionConfig::new(16, 2).unwrap();
    let pair = config.pair(16, 16).unwrap();
    let tree = evaluate(&config, pair, &[-32768], &[-32768]).unwrap();
    assert_eq!(tree.root(), 1 << 30);
    assert_eq!(tree.mode().bits(), 0);
  }

  #[test]
  fn node_lookup() {
    let config = FusionConfig::new(8, 2).unwrap();
    let pair = config.pair(4, 2).unwrap();
    let a: Vec<i128> = (0 .. 8).map(|k| k - 4).collect();
    let b: Vec<i128> = (0 .. 8).map(|k| k % 4 - 2).collect();
    let tree = evaluate(&config, pair, &a, &b).unwrap();
    assert_eq!(tree.node(NodeId::ROOT), Some(dot(&a, &b)));
    assert_eq!(tree.node(NodeId { depth: 1, i: 1, j: 0 }), Some(tree.level(1)[2]));
    assert_eq!(tree.node(NodeId { depth: 2, i: 3, j: 3 }), Some(tree.level(0)[15]));
    assert_eq!(tree.node(NodeId { depth: 2, i: 4, j: 0 }), None);
    assert_eq!(tree.node(NodeId { depth: 3, i: 0, j: 0 }), None);
  }

  #[test]
  fn rejects_bad_inputs() {
    let config = FusionConfig::new(8, 2).unwrap();
    let pair = config.pair(8, 8).unwrap();
    assert!(matches!(evaluate(&config, pair, &[1, 2], &[1]), Err(Error::LengthMismatch { .. })));
    assert!(matches!(evaluate(&config, pair, &[1], &[128]), Err(Error::ValueOutOfRange { .. })));
    let other = SwizzleTable::new(&config, config.pair(2, 2).unwrap()).unwrap();
    assert!(matches!(
      ExpectedTree::compute(&config, &other, pair, &[1], &[1]),
      Err(Error::InvalidConfig(_)),
    ));
  }

  #[test]
  fn rejects_a_table_of_another_grid() {
    let small = FusionConfig::new(8, 2).unwrap();
    let large = FusionConfig::new(16, 2).unwrap();
    let table = SwizzleTable::new(&large, large.pair(8, 8).unwrap()).unwrap();
    let pair = small.pair(8, 8).unwrap();
    assert!(matches!(
      ExpectedTree::compute(&small, &table, pair, &[1], &[1]),
      Err(Error::InvalidConfig(_)),
    ));
  }

  proptest!{
    #![proptest_config(ProptestConfig::with_cases(crate::PROPTEST_CASES))]

    #[test]
    fn root_is_dot_product(vector in crate::test::vectors()) {
      let cache = SwizzleCache::new(&vector.config).unwrap();
      let tree = ExpectedTree::compute(&vector.config, cache.get(vector.pair).unwrap(), vector.pair, &vector.a, &vector.b);
      let tree = tree.unwrap();

      let mut exact = malachite::Integer::from(0);
      for (&a, &b) in vector.a.iter().zip(&vector.b) {
        exact += malachite::Integer::from(a) * malachite::Integer::from(b);
      }
      prop_assert_eq!(malachite::Integer::from(tree.root()), exact);
      prop_assert_eq!(tree.num_levels(), vector.config.num_levels() as usize);
      for level in 0 .. tree.num_levels() {
        prop_assert_eq!(tree.level(level).len(), tree.side(level).pow(2));
      }
    }
  }
}
