//! Locating the first node of a device's tree that goes wrong.
//!
//! After a device's output disagrees with the oracle, the [`HierarchyVerifier`] walks the
//! device's tree from the root down, comparing the captured state of every node with the
//! [`ExpectedTree`]. Nodes are addressed by [`NodeId`]: depth 0 is the root, and the children of
//! `(depth, i, j)` are `(depth + 1, 2i + ii, 2j + jj)` for `ii, jj ∈ {0, 1}`.
//!
//! The verifier never stops at the first discrepancy: it visits every node and records every
//! [`Divergence`], so that [`Diagnosis::origins`] can tell apart the nodes where a wrong value
//! *appears* from the ancestors that merely inherit it.

use core::fmt;

use tracing::warn;

use crate::mode::ModeField;
use crate::tree::ExpectedTree;

/// Address of one node of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
  /// Distance from the root; the leaves are at depth `num_levels - 1`.
  pub depth: u32,
  pub i: usize,
  pub j: usize,
}

impl NodeId {
  pub const ROOT: Self = Self { depth: 0, i: 0, j: 0 };

  /// The four children, in the order `(0, 0), (0, 1), (1, 0), (1, 1)`.
  pub fn children(self) -> impl Iterator<Item = NodeId> {
    (0 .. 4).map(move |k| NodeId { depth: self.depth + 1, i: 2 * self.i + k / 2, j: 2 * self.j + k % 2 })
  }

  /// Tree level of this node in a tree of `num_levels` levels (0 = leaves).
  pub fn level(self, num_levels: usize) -> usize {
    num_levels - 1 - self.depth as usize
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "node[{}]({}, {})", self.depth, self.i, self.j)
  }
}

/// What a device exposes about one node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
  pub output: i128,
  /// The mode field the node combines its children with. Leaves have none.
  pub mode: Option<ModeField>,
  /// The `(a, b)` slices a leaf multiplies, sign-extended as the leaf sees them.
  pub inputs: Option<(i128, i128)>,
}

/// Read access to the internal state of a device's tree, e.g. a simulator's instance hierarchy.
pub trait NodeCapture {
  /// The state of node `id`, or `None` if it cannot be observed.
  fn node(&self, id: NodeId) -> Option<NodeState>;
}

/// One discrepancy between a device and the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
  pub node: NodeId,
  pub kind: DivergenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
  Output { expected: i128, observed: i128 },
  Mode { expected: ModeField, observed: ModeField },
  LeafInput { expected: (i128, i128), observed: (i128, i128) },
  /// The capture has no state for this node.
  Unobserved,
}

impl fmt::Display for Divergence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      DivergenceKind::Output { expected, observed } =>
        write!(f, "{}: output {observed}, expected {expected}", self.node),
      DivergenceKind::Mode { expected, observed } =>
        write!(f, "{}: mode {:02b}, expected {:02b}", self.node, observed.to_bits(), expected.to_bits()),
      DivergenceKind::LeafInput { expected, observed } =>
        write!(f, "{}: leaf inputs {observed:?}, expected {expected:?}", self.node),
      DivergenceKind::Unobserved =>
        write!(f, "{}: not observable", self.node),
    }
  }
}

/// The result of walking a device's tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnosis {
  divergences: Vec<Divergence>,
}

impl Diagnosis {
  pub fn is_clean(&self) -> bool {
    self.divergences.is_empty()
  }

  /// The first divergence found, in traversal order (root first).
  pub fn first(&self) -> Option<&Divergence> {
    self.divergences.first()
  }

  pub fn divergences(&self) -> &[Divergence] {
    &self.divergences
  }

  /// The nodes whose output diverges although the outputs of all their children match: the
  /// points where the error originates. A faulty leaf is always an origin.
  pub fn origins(&self) -> Vec<NodeId> {
    let wrong: Vec<NodeId> = self.divergences.iter()
      .filter(|d| matches!(d.kind, DivergenceKind::Output { .. }))
      .map(|d| d.node)
      .collect();
    wrong.iter()
      .copied()
      .filter(|node| node.children().all(|child| !wrong.contains(&child)))
      .collect()
  }
}

impl fmt::Display for Diagnosis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_clean() { return write!(f, "no divergent node") }
    for (k, divergence) in self.divergences.iter().enumerate() {
      if k > 0 { writeln!(f)? }
      write!(f, "{divergence}")?;
    }
    Ok(())
  }
}

/// Compares a device's tree against an [`ExpectedTree`], node by node.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyVerifier<'a> {
  tree: &'a ExpectedTree,
}

impl<'a> HierarchyVerifier<'a> {
  pub fn new(tree: &'a ExpectedTree) -> Self {
    Self { tree }
  }

  /// Walk the whole tree of `capture`, root first.
  pub fn verify(&self, capture: &dyn NodeCapture) -> Diagnosis {
    let mut diagnosis = Diagnosis::default();
    self.visit(capture, NodeId::ROOT, &mut diagnosis);
    diagnosis
  }

  fn visit(&self, capture: &dyn NodeCapture, node: NodeId, diagnosis: &mut Diagnosis) {
    let levels = self.tree.num_levels();
    let level = node.level(levels);
    let mut record = |kind| {
      let divergence = Divergence { node, kind };
      warn!(pair = %self.tree.pair(), "{divergence}");
      diagnosis.divergences.push(divergence);
    };

    match capture.node(node) {
      None => record(DivergenceKind::Unobserved),
      Some(state) => {
        if let Some(expected) = self.tree.node(node) && state.output != expected {
          record(DivergenceKind::Output { expected, observed: state.output });
        }
        // The node at level `l` combines its children with the field of level `l - 1`.
        if let (Some(observed), Some(child_level)) = (state.mode, level.checked_sub(1)) {
          let expected = self.tree.mode().field(child_level as u32);
          if observed != expected {
            record(DivergenceKind::Mode { expected, observed });
          }
        }
        if let Some(observed) = state.inputs && level == 0 {
          let expected = self.tree.leaf_input(node.i, node.j);
          if observed != expected {
            record(DivergenceKind::LeafInput { expected, observed });
          }
        }
      }
    }

    if level > 0 {
      for child in node.children() {
        self.visit(capture, child, diagnosis);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::FusionConfig;
  use crate::swizzle::SwizzleTable;

  /// A capture replaying the expected tree, with a few overrides.
  struct Replay<'a> {
    tree: &'a ExpectedTree,
    overrides: Vec<(NodeId, NodeState)>,
    hidden: Option<NodeId>,
  }

  impl NodeCapture for Replay<'_> {
    fn node(&self, id: NodeId) -> Option<NodeState> {
      if self.hidden == Some(id) { return None }
      if let Some((_, state)) = self.overrides.iter().find(|(node, _)| *node == id) {
        return Some(*state)
      }
      let level = id.level(self.tree.num_levels());
      Some(NodeState {
        output: self.tree.node(id)?,
        mode: level.checked_sub(1).map(|l| self.tree.mode().field(l as u32)),
        inputs: (level == 0).then(|| self.tree.leaf_input(id.i, id.j)),
      })
    }
  }

  fn tree() -> ExpectedTree {
    let config = FusionConfig::new(8, 2).unwrap();
    let pair = config.pair(4, 2).unwrap();
    let table = SwizzleTable::new(&config, pair).unwrap();
    let a: Vec<i128> = (0 .. 8).map(|k| 7 - 2 * k).collect();
    let b: Vec<i128> = (0 .. 8).map(|k| k % 4 - 2).collect();
    ExpectedTree::compute(&config, &table, pair, &a, &b).unwrap()
  }

  #[test]
  fn children_and_levels() {
    let node = NodeId { depth: 1, i: 1, j: 0 };
    let children: Vec<_> = node.children().map(|c| (c.i, c.j)).collect();
    assert_eq!(children, [(2, 0), (2, 1), (3, 0), (3, 1)]);
    assert_eq!(node.level(3), 1);
    assert_eq!(NodeId::ROOT.level(3), 2);
    assert_eq!(node.to_string(), "node[1](1, 0)");
  }

  #[test]
  fn faithful_capture_is_clean() {
    let tree = tree();
    let capture = Replay { tree: &tree, overrides: vec![], hidden: None };
    let diagnosis = HierarchyVerifier::new(&tree).verify(&capture);
    assert!(diagnosis.is_clean(), "{diagnosis}");
    assert!(diagnosis.origins().is_empty());
  }

  #[test]
  fn faulty_leaf_is_the_origin() {
    let tree = tree();
    let leaf = NodeId { depth: 2, i: 3, j: 1 };
    let parent = NodeId { depth: 1, i: 1, j: 0 };
    let bad = |node: NodeId, delta: i128| {
      let level = node.level(tree.num_levels());
      (node, NodeState {
        output: tree.node(node).unwrap_or_default() + delta,
        mode: level.checked_sub(1).map(|l| tree.mode().field(l as u32)),
        inputs: (level == 0).then(|| tree.leaf_input(node.i, node.j)),
      })
    };
    let capture = Replay {
      tree: &tree,
      overrides: vec![bad(leaf, 1), bad(parent, 1), bad(NodeId::ROOT, 16)],
      hidden: None,
    };
    let diagnosis = HierarchyVerifier::new(&tree).verify(&capture);
    assert_eq!(diagnosis.divergences().len(), 3);
    assert_eq!(diagnosis.first().map(|d| d.node), Some(NodeId::ROOT));
    assert_eq!(diagnosis.origins(), [leaf]);
  }

  #[test]
  fn mode_and_input_divergences() {
    let tree = tree();
    let leaf = NodeId { depth: 2, i: 0, j: 2 };
    let wrong_inputs = NodeState {
      output: tree.node(leaf).unwrap(),
      mode: None,
      inputs: Some((99, 0)),
    };
    let wrong_mode = NodeState {
      output: tree.root(),
      mode: Some(ModeField { a_low: !tree.mode().field(1).a_low, b_low: tree.mode().field(1).b_low }),
      inputs: None,
    };
    let hidden = NodeId { depth: 1, i: 0, j: 1 };
    let capture = Replay {
      tree: &tree,
      overrides: vec![(leaf, wrong_inputs), (NodeId::ROOT, wrong_mode)],
      hidden: Some(hidden),
    };
    let diagnosis = HierarchyVerifier::new(&tree).verify(&capture);
    let kinds: Vec<_> = diagnosis.divergences().iter().map(|d| (d.node, d.kind)).collect();
    assert_eq!(kinds.len(), 3);
    assert!(matches!(kinds[0], (NodeId::ROOT, DivergenceKind::Mode { .. })));
    assert_eq!(kinds[1], (hidden, DivergenceKind::Unobserved));
    assert!(matches!(kinds[2], (node, DivergenceKind::LeafInput { observed: (99, 0), .. }) if node == leaf));
    // No output is wrong, so nothing originates an error value.
    assert!(diagnosis.origins().is_empty());
  }
}
