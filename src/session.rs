//! Driving test vectors through a device and keeping score.
//!
//! A [`Session`] owns everything that is fixed for a run: the configuration, the
//! [`SwizzleCache`], and the [`Report`] being accumulated. For each [`TestVector`] it builds the
//! [`Stimulus`] (the packed A and B buses and the mode code), hands it to a [`Device`], and checks
//! the value the device returns against the [`ExpectedTree`]. A mismatch is recorded, diagnosed
//! through the device's [`NodeCapture`] if it has one, and the session moves on to the next
//! vector.

use core::fmt;

use tracing::{debug, info, warn};

use crate::config::{FusionConfig, PrecisionPair};
use crate::mode::ModeCode;
use crate::packing::{OperandPacker, PackedSignal};
use crate::swizzle::SwizzleCache;
use crate::tree::ExpectedTree;
use crate::verify::{Diagnosis, HierarchyVerifier, NodeCapture};
use crate::{Error, Result};

/// One dot product to run: `Σ a[i]·b[i]` at precision `pair`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
  pub pair: PrecisionPair,
  pub a: Vec<i128>,
  pub b: Vec<i128>,
}

/// What is driven into the device for one vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
  pub a: PackedSignal,
  pub b: PackedSignal,
  pub mode: ModeCode,
}

/// A device under test: anything that takes a stimulus and produces the tree's output.
///
/// `apply` stands for one full drive-and-sample cycle; timing is up to the implementor.
pub trait Device {
  fn apply(&mut self, stimulus: &Stimulus) -> i128;

  /// Access to the device's internal node state, for diagnosing mismatches.
  fn capture(&self) -> Option<&dyn NodeCapture> {
    None
  }
}

/// Outcome of checking one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Match,
  Mismatch { expected: i128, received: i128 },
}

impl Verdict {
  pub fn is_match(&self) -> bool {
    matches!(self, Verdict::Match)
  }
}

/// A vector the device got wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
  /// Position of the vector in the session.
  pub index: usize,
  pub pair: PrecisionPair,
  pub mode: ModeCode,
  pub a: Vec<i128>,
  pub b: Vec<i128>,
  pub expected: i128,
  pub received: i128,
  pub diagnosis: Option<Diagnosis>,
}

impl fmt::Display for Mismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "vector {} ({}, mode {:b}): expected {}, received {}\n  a = {:?}\n  b = {:?}",
      self.index, self.pair, self.mode, self.expected, self.received, self.a, self.b,
    )?;
    if let Some(diagnosis) = &self.diagnosis {
      for line in diagnosis.to_string().lines() {
        write!(f, "\n  {line}")?;
      }
    }
    Ok(())
  }
}

/// A vector that was never run because it is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
  /// Position of the vector among those handed to [`Session::run`].
  pub position: usize,
  pub error: Error,
}

/// Tally of a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
  pub vectors_checked: usize,
  pub mismatches: Vec<Mismatch>,
  pub rejected: Vec<Rejected>,
}

impl Report {
  /// No mismatches and no rejected vectors.
  pub fn passed(&self) -> bool {
    self.mismatches.is_empty() && self.rejected.is_empty()
  }
}

impl fmt::Display for Report {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} vectors checked, {} mismatches", self.vectors_checked, self.mismatches.len())?;
    if !self.rejected.is_empty() {
      write!(f, ", {} rejected", self.rejected.len())?;
    }
    for mismatch in &self.mismatches {
      write!(f, "\n{mismatch}")?;
    }
    for Rejected { position, error } in &self.rejected {
      write!(f, "\nvector #{position} rejected: {error}")?;
    }
    Ok(())
  }
}

/// A test session. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct Session {
  cache: SwizzleCache,
  packer: OperandPacker,
  report: Report,
}

impl Session {
  pub fn new(config: &FusionConfig) -> Result<Self> {
    let cache = SwizzleCache::new(config)?;
    info!(
      high_prec = config.high_prec(),
      low_prec = config.low_prec(),
      signedness = ?config.signedness(),
      levels = config.num_levels(),
      modes = cache.iter().count(),
      "starting fusion session",
    );
    Ok(Self { cache, packer: OperandPacker::new(config), report: Report::default() })
  }

  pub fn config(&self) -> &FusionConfig {
    self.cache.config()
  }

  pub fn cache(&self) -> &SwizzleCache {
    &self.cache
  }

  pub fn report(&self) -> &Report {
    &self.report
  }

  pub fn into_report(self) -> Report {
    self.report
  }

  /// Build the stimulus for `vector`, validating it.
  pub fn prepare(&self, vector: &TestVector) -> Result<Stimulus> {
    let config = self.cache.config();
    let pair = config.pair(vector.pair.a_prec(), vector.pair.b_prec())?;
    config.check_operands(pair, &vector.a, &vector.b)?;
    Ok(Stimulus {
      a: self.packer.pack_a(pair, &vector.a)?,
      b: self.packer.pack_b(self.cache.get(pair)?, &vector.b)?,
      mode: ModeCode::encode(config, pair),
    })
  }

  /// Check the value a device `received` for `vector`, recording a mismatch in the report. On a
  /// mismatch, `capture` (if any) is walked to diagnose where the device went wrong.
  pub fn check(
    &mut self,
    vector: &TestVector,
    received: i128,
    capture: Option<&dyn NodeCapture>,
  ) -> Result<Verdict> {
    let config = *self.cache.config();
    let pair = config.pair(vector.pair.a_prec(), vector.pair.b_prec())?;
    let tree = ExpectedTree::compute(&config, self.cache.get(pair)?, pair, &vector.a, &vector.b)?;
    let index = self.report.vectors_checked;
    self.report.vectors_checked += 1;
    debug!(index, %pair, mode = tree.mode().bits(), expected = tree.root(), received, "checked vector");

    let expected = tree.root();
    if received == expected { return Ok(Verdict::Match) }

    warn!(index, %pair, expected, received, "device output mismatch");
    let diagnosis = capture.map(|capture| HierarchyVerifier::new(&tree).verify(capture));
    self.report.mismatches.push(Mismatch {
      index,
      pair,
      mode: tree.mode(),
      a: vector.a.clone(),
      b: vector.b.clone(),
      expected,
      received,
      diagnosis,
    });
    Ok(Verdict::Mismatch { expected, received })
  }

  /// Run every vector through `device`. Neither mismatches nor invalid vectors stop the
  /// session: an invalid vector is recorded in [`Report::rejected`] and skipped. Only an oracle
  /// defect ends the run early, as an `Err`.
  pub fn run<D, I>(&mut self, device: &mut D, vectors: I) -> Result<&Report>
  where
    D: Device + ?Sized,
    I: IntoIterator<Item = TestVector>,
  {
    for (position, vector) in vectors.into_iter().enumerate() {
      let outcome = self.prepare(&vector).and_then(|stimulus| {
        let received = device.apply(&stimulus);
        self.check(&vector, received, device.capture())
      });
      match outcome {
        Ok(_) => {}
        Err(error) if error.is_oracle_defect() => return Err(error),
        Err(error) => {
          warn!(position, %error, "rejected test vector");
          self.report.rejected.push(Rejected { position, error });
        }
      }
    }
    Ok(&self.report)
  }
}
