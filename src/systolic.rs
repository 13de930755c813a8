//! Feeding a systolic array of fused trees.
//!
//! The array has `rows × cols` fused multiplier trees. Each tree consumes
//! `ops = H² / (act_prec · wgt_prec)` products per cycle, so a column of the array consumes
//! `lanes = rows · ops` activation/weight pairs per cycle. Activations enter on the left and move
//! one column to the right per cycle; weights are injected per column. For a dense layer
//! `out = W · act`, with `W` of `rows_out × rows_in`, the array computes `cols` outputs at a time
//! (a *tile*), and the feed is skewed in time so that each product meets its partners:
//!
//! ```text
//!   activation lane ii, cycle c:           act[(c - ii)·lanes + ii]
//!   weight lane ii of column jj, cycle c:  W[t·cols + jj][(c - ii - jj)·lanes + ii]
//! ```
//!
//! Entries whose indices fall outside `act` or `W` are fed as zero. A tile takes
//! `ceil(rows_in / lanes) + lanes - 1 + cols - 1` cycles, plus `pipeline_offset` leading idle
//! cycles.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::{FusionConfig, PrecisionPair};
use crate::mode::ModeCode;
use crate::packing::{OperandPacker, PackedSignal};
use crate::swizzle::{SwizzleCache, SwizzleTable};
use crate::tree::ExpectedTree;
use crate::{Error, Result};

/// Dimensions of the array: `rows` trees along the activation path, `cols` output columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayShape {
  rows: usize,
  cols: usize,
}

impl ArrayShape {
  pub fn new(rows: usize, cols: usize) -> Result<Self> {
    if rows == 0 || cols == 0 {
      return Err(Error::InvalidConfig(format!("empty {rows}x{cols} systolic array")))
    }
    Ok(Self { rows, cols })
  }

  pub fn rows(&self) -> usize { self.rows }

  pub fn cols(&self) -> usize { self.cols }
}

/// A dense layer to run: `weights` (`rows_out × rows_in`) times `activations` (`rows_in`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
  weights: Vec<Vec<i128>>,
  activations: Vec<i128>,
  act_prec: u32,
  wgt_prec: u32,
}

impl Workload {
  /// Validate a workload against `config`: a non-empty rectangular weight matrix with one column
  /// per activation, and every value representable at its precision.
  pub fn new(
    config: &FusionConfig,
    weights: Vec<Vec<i128>>,
    activations: Vec<i128>,
    act_prec: u32,
    wgt_prec: u32,
  ) -> Result<Self> {
    config.check_precision(act_prec)?;
    config.check_precision(wgt_prec)?;
    let rows_in = activations.len();
    if rows_in == 0 || weights.is_empty() {
      return Err(Error::InvalidWorkload("empty weight matrix or activation vector".into()))
    }
    if let Some(r) = weights.iter().position(|row| row.len() != rows_in) {
      return Err(Error::InvalidWorkload(format!(
        "weight row {r} has {} entries, expected {rows_in}", weights[r].len(),
      )))
    }
    let act_range = config.value_range(act_prec);
    if let Some(k) = activations.iter().position(|v| !act_range.contains(v)) {
      return Err(Error::InvalidWorkload(format!(
        "activation {k} = {} is not representable in {act_prec} bits", activations[k],
      )))
    }
    let wgt_range = config.value_range(wgt_prec);
    for (r, row) in weights.iter().enumerate() {
      if let Some(c) = row.iter().position(|v| !wgt_range.contains(v)) {
        return Err(Error::InvalidWorkload(format!(
          "weight [{r}][{c}] = {} is not representable in {wgt_prec} bits", row[c],
        )))
      }
    }
    Ok(Self { weights, activations, act_prec, wgt_prec })
  }

  pub fn rows_out(&self) -> usize { self.weights.len() }

  pub fn rows_in(&self) -> usize { self.activations.len() }

  pub fn act_prec(&self) -> u32 { self.act_prec }

  pub fn wgt_prec(&self) -> u32 { self.wgt_prec }

  pub fn weights(&self) -> &[Vec<i128>] { &self.weights }

  pub fn activations(&self) -> &[i128] { &self.activations }

  fn activation(&self, k: isize) -> i128 {
    usize::try_from(k).ok().and_then(|k| self.activations.get(k)).copied().unwrap_or(0)
  }

  fn weight(&self, row: usize, k: isize) -> i128 {
    let Some(row) = self.weights.get(row) else { return 0 };
    usize::try_from(k).ok().and_then(|k| row.get(k)).copied().unwrap_or(0)
  }
}

/// The values injected during one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTile {
  /// `activations[c][ii]`: activation lane `ii` at cycle `c`.
  pub activations: Vec<Vec<i128>>,
  /// `weights[c][ii + lanes·jj]`: weight lane `ii` of column `jj` at cycle `c`.
  pub weights: Vec<Vec<i128>>,
}

/// The complete skewed feed of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystolicFeed {
  pub pair: PrecisionPair,
  pub mode: ModeCode,
  /// Products per tree per cycle.
  pub ops: usize,
  /// Activation lanes, `rows · ops`.
  pub lanes: usize,
  pub cycles: usize,
  pub tiles: Vec<FeedTile>,
}

/// The buses driven into the array in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleBuses {
  /// One A bus per row, row 0 most significant.
  pub activation: PackedSignal,
  /// One swizzled B bus per tree, in the order column 0 rows `0 .. rows`, column 1…, the first
  /// most significant.
  pub weight: PackedSignal,
}

/// Builds feeds for, and evaluates, a systolic array of fused trees.
#[derive(Debug, Clone)]
pub struct SystolicFeeder {
  cache: SwizzleCache,
  packer: OperandPacker,
  shape: ArrayShape,
  pipeline_offset: usize,
}

impl SystolicFeeder {
  pub fn new(config: &FusionConfig, shape: ArrayShape) -> Result<Self> {
    Ok(Self {
      cache: SwizzleCache::new(config)?,
      packer: OperandPacker::new(config),
      shape,
      pipeline_offset: 0,
    })
  }

  /// Delay every injection by `cycles` idle cycles.
  pub fn with_pipeline_offset(self, cycles: usize) -> Self {
    Self { pipeline_offset: cycles, ..self }
  }

  pub fn config(&self) -> &FusionConfig {
    self.cache.config()
  }

  pub fn shape(&self) -> ArrayShape {
    self.shape
  }

  /// The skewed feed for `workload`, one [`FeedTile`] per group of `cols` outputs.
  pub fn feed(&self, workload: &Workload) -> Result<SystolicFeed> {
    let config = self.cache.config();
    let pair = config.pair(workload.act_prec, workload.wgt_prec)?;
    let ops = config.operand_count(pair);
    let (rows, cols) = (self.shape.rows, self.shape.cols);
    let lanes = rows * ops;
    let offset = self.pipeline_offset;
    let cycles = offset + workload.rows_in().div_ceil(lanes) + lanes - 1 + cols - 1;
    let tile_count = workload.rows_out().div_ceil(cols);
    debug!(%pair, ops, lanes, cycles, tiles = tile_count, "systolic feed");

    let tiles = (0 .. tile_count)
      .map(|t| {
        let mut activations = vec![vec![0; lanes]; cycles];
        let mut weights = vec![vec![0; lanes * cols]; cycles];
        for c in offset .. cycles {
          let c_rel = (c - offset) as isize;
          for ii in 0 .. lanes {
            activations[c][ii] = workload.activation((c_rel - ii as isize) * lanes as isize + ii as isize);
            for jj in 0 .. cols {
              let k = (c_rel - ii as isize - jj as isize) * lanes as isize + ii as isize;
              weights[c][ii + lanes * jj] = workload.weight(t * cols + jj, k);
            }
          }
        }
        FeedTile { activations, weights }
      })
      .collect();

    Ok(SystolicFeed { pair, mode: ModeCode::encode(config, pair), ops, lanes, cycles, tiles })
  }

  /// `W · act`, zero-padded to a whole number of tiles, in the order the array emits it.
  pub fn expected_outputs(&self, workload: &Workload) -> VecDeque<i128> {
    let padded = workload.rows_out().next_multiple_of(self.shape.cols);
    let mut queue: VecDeque<i128> = workload.weights.iter()
      .map(|row| crate::tree::dot(row, &workload.activations))
      .collect();
    queue.resize(padded, 0);
    queue
  }

  /// The swizzle table of `feed`, after checking that the feed has the shape this feeder
  /// produces.
  fn check_feed(&self, feed: &SystolicFeed) -> Result<&SwizzleTable> {
    let table = self.cache.get(feed.pair)?;
    let ops = self.config().operand_count(feed.pair);
    let (rows, cols) = (self.shape.rows, self.shape.cols);
    if feed.ops != ops || feed.lanes != rows * ops {
      return Err(Error::InvalidWorkload(format!(
        "feed has {} ops over {} lanes, expected {ops} over {}", feed.ops, feed.lanes, rows * ops,
      )))
    }
    for (t, tile) in feed.tiles.iter().enumerate() {
      let well_formed = tile.activations.len() == feed.cycles
        && tile.weights.len() == feed.cycles
        && tile.activations.iter().all(|act| act.len() == feed.lanes)
        && tile.weights.iter().all(|wgt| wgt.len() == feed.lanes * cols);
      if !well_formed {
        return Err(Error::InvalidWorkload(format!(
          "tile {t} is not {} cycles of {} activation and {} weight lanes",
          feed.cycles, feed.lanes, feed.lanes * cols,
        )))
      }
    }
    Ok(table)
  }

  /// Pack the values injected at `cycle` of `tile` into the array's input buses.
  pub fn pack_cycle(&self, feed: &SystolicFeed, tile: usize, cycle: usize) -> Result<CycleBuses> {
    let table = self.check_feed(feed)?;
    let tile = feed.tiles.get(tile)
      .ok_or_else(|| Error::InvalidWorkload(format!("feed has no tile {tile}")))?;
    let (Some(act), Some(wgt)) = (tile.activations.get(cycle), tile.weights.get(cycle)) else {
      return Err(Error::InvalidWorkload(format!("feed has no cycle {cycle}")))
    };
    let activation = act.chunks(feed.ops)
      .map(|chunk| self.packer.pack_a(feed.pair, chunk))
      .collect::<Result<Vec<_>>>()?;
    let weight = wgt.chunks(feed.ops)
      .map(|chunk| self.packer.pack_b(table, chunk))
      .collect::<Result<Vec<_>>>()?;
    Ok(CycleBuses {
      activation: PackedSignal::concat(&activation),
      weight: PackedSignal::concat(&weight),
    })
  }

  /// Evaluate `feed` on a reference array built from the fused-tree oracle: column `jj` sees the
  /// activations `jj` cycles late, every tree evaluates its `ops` products per cycle, and each
  /// column accumulates over the whole tile.
  pub fn simulate(&self, feed: &SystolicFeed) -> Result<VecDeque<i128>> {
    let config = self.cache.config();
    let table = self.check_feed(feed)?;
    let (rows, cols) = (self.shape.rows, self.shape.cols);
    let mut outputs = VecDeque::with_capacity(feed.tiles.len() * cols);
    for tile in &feed.tiles {
      for jj in 0 .. cols {
        let mut acc = 0;
        for c in jj .. feed.cycles {
          let act = &tile.activations[c - jj];
          let wgt = &tile.weights[c][feed.lanes * jj .. feed.lanes * (jj + 1)];
          for pe in 0 .. rows {
            let lanes = pe * feed.ops .. (pe + 1) * feed.ops;
            let tree = ExpectedTree::compute(config, table, feed.pair, &act[lanes.clone()], &wgt[lanes])?;
            acc += tree.root();
          }
        }
        outputs.push_back(acc);
      }
    }
    Ok(outputs)
  }
}

/// A position where the received queue differs from the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMismatch {
  pub index: usize,
  pub expected: i128,
  pub received: i128,
}

/// Result of comparing the array's output queue against the expected queue, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueComparison {
  pub matched: usize,
  pub mismatches: Vec<QueueMismatch>,
  /// Expected entries that never arrived.
  pub missing: Vec<i128>,
  /// Received entries beyond the expected ones.
  pub extra: Vec<i128>,
}

impl QueueComparison {
  pub fn is_clean(&self) -> bool {
    self.mismatches.is_empty() && self.missing.is_empty() && self.extra.is_empty()
  }
}

/// Compare `received` against `expected` entry by entry. No reordering is attempted.
pub fn compare(expected: &VecDeque<i128>, received: &[i128]) -> QueueComparison {
  let mut comparison = QueueComparison::default();
  for (index, (&expected, &received)) in expected.iter().zip(received).enumerate() {
    if expected == received {
      comparison.matched += 1;
    } else {
      warn!(index, expected, received, "systolic output mismatch");
      comparison.mismatches.push(QueueMismatch { index, expected, received });
    }
  }
  comparison.missing = expected.iter().skip(received.len()).copied().collect();
  comparison.extra = received.iter().skip(expected.len()).copied().collect();
  if !comparison.missing.is_empty() || !comparison.extra.is_empty() {
    warn!(missing = comparison.missing.len(), extra = comparison.extra.len(), "systolic output count mismatch");
  }
  comparison
}

/// Decode the array's output bus: `cols` signed accumulators of `acc_width` bits, accumulator 0
/// in the lsbs. Returns the accumulators whose bit is set in `valid`, lowest first.
pub fn decode_accumulators(bus: &PackedSignal, valid: u64, acc_width: u32, cols: usize) -> Result<Vec<i128>> {
  if acc_width == 0 || acc_width > 64 {
    return Err(Error::PrecisionOutOfRange { precision: acc_width, low: 1, high: 64 })
  }
  if cols > 64 || bus.width() < cols * acc_width as usize {
    return Err(Error::InvalidConfig(format!(
      "a {}-bit bus cannot hold {cols} accumulators of {acc_width} bits", bus.width(),
    )))
  }
  Ok((0 .. cols).filter(|i| valid >> i & 1 == 1).map(|i| bus.field_signed(i, acc_width)).collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn small_layer(config: &FusionConfig) -> Workload {
    Workload::new(config, vec![vec![1, 2, 3], vec![4, 5, 6]], vec![1, 1, 1], 8, 8).unwrap()
  }

  #[test]
  fn two_by_two_array() {
    let config = FusionConfig::new(8, 2).unwrap();
    let feeder = SystolicFeeder::new(&config, ArrayShape::new(2, 2).unwrap()).unwrap();
    let workload = small_layer(&config);
    let feed = feeder.feed(&workload).unwrap();
    assert_eq!((feed.ops, feed.lanes, feed.cycles, feed.tiles.len()), (1, 2, 4, 1));
    assert_eq!(feeder.expected_outputs(&workload), [6, 15]);
    assert_eq!(feeder.simulate(&feed).unwrap(), [6, 15]);

    let tile = &feed.tiles[0];
    assert_eq!(tile.activations, [[1, 0], [1, 1], [0, 0], [0, 0]]);
    // Column 1 starts one cycle after column 0.
    assert_eq!(tile.weights[0], [1, 0, 0, 0]);
    assert_eq!(tile.weights[1], [3, 2, 4, 0]);
    assert_eq!(tile.weights[2], [0, 0, 6, 5]);
  }

  #[test]
  fn padding_and_pipeline_offset() {
    let config = FusionConfig::new(8, 2).unwrap();
    let feeder = SystolicFeeder::new(&config, ArrayShape::new(2, 3).unwrap()).unwrap().with_pipeline_offset(2);
    let workload = small_layer(&config);
    assert_eq!(feeder.expected_outputs(&workload), [6, 15, 0]);
    let feed = feeder.feed(&workload).unwrap();
    assert_eq!(feed.cycles, 2 + 2 + 1 + 2);
    assert!(feed.tiles[0].activations[.. 2].iter().flatten().all(|&v| v == 0));
    assert_eq!(feeder.simulate(&feed).unwrap(), [6, 15, 0]);
  }

  #[test]
  fn cycle_buses() {
    let config = FusionConfig::new(4, 2).unwrap();
    let shape = ArrayShape::new(2, 2).unwrap();
    let feeder = SystolicFeeder::new(&config, shape).unwrap();
    let workload = Workload::new(&config, vec![vec![1, -1, 0, 1, 1]; 3], vec![1, -2, 0, 1, -1], 2, 2).unwrap();
    let feed = feeder.feed(&workload).unwrap();
    assert_eq!(feed.ops, 4);
    let buses = feeder.pack_cycle(&feed, 1, 3).unwrap();
    assert_eq!(buses.activation.width(), 2 * config.bus_width());
    assert_eq!(buses.weight.width(), 4 * config.bus_width());
    assert!(feeder.pack_cycle(&feed, 2, 0).is_err());
    assert!(feeder.pack_cycle(&feed, 0, feed.cycles).is_err());
  }

  #[test]
  fn rejects_malformed_feeds() {
    let config = FusionConfig::new(8, 2).unwrap();
    let feeder = SystolicFeeder::new(&config, ArrayShape::new(2, 2).unwrap()).unwrap();
    let feed = feeder.feed(&small_layer(&config)).unwrap();

    let mut short = feed.clone();
    short.tiles[0].weights[2].pop();
    assert!(matches!(feeder.simulate(&short), Err(Error::InvalidWorkload(_))));
    assert!(matches!(feeder.pack_cycle(&short, 0, 0), Err(Error::InvalidWorkload(_))));

    let mut lanes = feed.clone();
    lanes.ops = 2;
    assert!(matches!(feeder.simulate(&lanes), Err(Error::InvalidWorkload(_))));

    // A feed built for a wider tree.
    let wide = FusionConfig::new(16, 2).unwrap();
    let other = SystolicFeeder::new(&wide, ArrayShape::new(2, 2).unwrap()).unwrap();
    let workload = Workload::new(&wide, vec![vec![1, 2, 3]], vec![1, 1, 1], 16, 16).unwrap();
    let foreign = other.feed(&workload).unwrap();
    assert!(matches!(feeder.simulate(&foreign), Err(Error::PrecisionOutOfRange { .. })));
  }

  #[test]
  fn rejects_bad_workloads() {
    let config = FusionConfig::new(8, 2).unwrap();
    assert!(matches!(
      Workload::new(&config, vec![vec![1, 2], vec![1]], vec![1, 1], 8, 8),
      Err(Error::InvalidWorkload(_)),
    ));
    assert!(matches!(Workload::new(&config, vec![], vec![1], 8, 8), Err(Error::InvalidWorkload(_))));
    assert!(matches!(
      Workload::new(&config, vec![vec![2]], vec![1], 8, 2),
      Err(Error::InvalidWorkload(_)),
    ));
    assert!(Workload::new(&config, vec![vec![1]], vec![1], 3, 2).is_err());
    assert!(ArrayShape::new(0, 4).is_err());
  }

  #[test]
  fn queue_comparison() {
    let expected = VecDeque::from([1, 2, 3, 4]);
    assert!(compare(&expected, &[1, 2, 3, 4]).is_clean());
    let comparison = compare(&expected, &[1, 5, 3]);
    assert_eq!(comparison.matched, 2);
    assert_eq!(comparison.mismatches, [QueueMismatch { index: 1, expected: 2, received: 5 }]);
    assert_eq!(comparison.missing, [4]);
    assert_eq!(compare(&expected, &[1, 2, 3, 4, 0]).extra, [0]);
  }

  #[test]
  fn accumulator_decoding() {
    // Three 8-bit accumulators: -1, 2, -128 (accumulator 0 in the lsbs).
    let bus = PackedSignal::from_u128(0x80_02_ff, 24);
    assert_eq!(decode_accumulators(&bus, 0b010, 8, 3).unwrap(), [2]);
    assert_eq!(decode_accumulators(&bus, 0b100, 8, 3).unwrap(), [-128]);
    assert_eq!(decode_accumulators(&bus, 0b101, 8, 3).unwrap(), [-1, -128]);
    assert!(decode_accumulators(&bus, 0, 8, 3).unwrap().is_empty());
    assert!(decode_accumulators(&bus, 1, 8, 4).is_err());
    assert!(decode_accumulators(&bus, 1, 0, 3).is_err());
  }

  proptest!{
    #![proptest_config(ProptestConfig::with_cases(crate::PROPTEST_CASES / 16))]

    #[test]
    fn simulated_array_computes_the_layer(
      (config, workload) in crate::test::workloads(),
      (rows, cols, offset) in (1 ..= 3usize, 1 ..= 3usize, 0 ..= 2usize),
    ) {
      let feeder = SystolicFeeder::new(&config, ArrayShape::new(rows, cols).unwrap()).unwrap()
        .with_pipeline_offset(offset);
      let feed = feeder.feed(&workload).unwrap();
      let mut simulated = feeder.simulate(&feed).unwrap();
      prop_assert!(compare(&feeder.expected_outputs(&workload), simulated.make_contiguous()).is_clean());
    }
  }
}
