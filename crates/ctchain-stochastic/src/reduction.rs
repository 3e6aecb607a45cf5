//! Fixed-topology binary reduction tree (spec §4.5).
//!
//! The tree shape is fixed at construction time from `num_leaves` alone, so
//! two executions that build a tree for the same batch size always merge
//! values in exactly the same order, independent of how the work happened to
//! be scheduled across threads (spec §8: tree reduction must equal sequential
//! compensated reduction).
//!
//! Node indices `[0, num_leaves)` are leaves; `[num_leaves, num_nodes)` are
//! internal nodes built bottom-up, with internal node `num_leaves + i` taking
//! children `2*i` and `2*i + 1`, clamped to [`LEAF_MARKER`] once an index
//! would reach or exceed the node itself. This canonical shape is pinned from
//! the reference implementation rather than re-derived (see DESIGN.md).

use ctchain_core::{CtError, CtResult, FaultFlags};

use crate::compensated::CompAccum;

/// Sentinel for "no child"/"no parent".
pub const LEAF_MARKER: u32 = u32::MAX;
/// Upper bound on leaves in a single tree (spec §4.5).
pub const MAX_LEAVES: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
    left_child: u32,
    right_child: u32,
    parent: u32,
    op_id: u64,
}

/// A fixed-topology binary reduction tree over `num_leaves` values.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionTree {
    nodes: Vec<Node>,
    num_leaves: u32,
    root_index: u32,
    depth: u32,
}

fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    (n - 1).ilog2() + 1
}

impl ReductionTree {
    /// Build the canonical tree for `num_leaves` leaves and a base op-id
    /// (each node's op-id is `base_op_id + index`, spec §4.5).
    pub fn new(num_leaves: u32, base_op_id: u64, faults: &mut FaultFlags) -> CtResult<Self> {
        if num_leaves == 0 {
            faults.domain = true;
            return Err(CtError::Config);
        }
        if num_leaves > MAX_LEAVES {
            faults.domain = true;
            return Err(CtError::Config);
        }

        let num_internal = if num_leaves > 1 { num_leaves - 1 } else { 0 };
        let num_nodes = num_leaves + num_internal;
        let root_index = if num_leaves > 1 { num_nodes - 1 } else { 0 };
        let depth = ceil_log2(num_leaves);

        let mut nodes = vec![
            Node { left_child: LEAF_MARKER, right_child: LEAF_MARKER, parent: LEAF_MARKER, op_id: 0 };
            num_nodes as usize
        ];

        for i in 0..num_leaves {
            nodes[i as usize].op_id = base_op_id + i as u64;
        }

        for i in 0..num_internal {
            let node_idx = num_leaves + i;
            let mut left = 2 * i;
            let mut right = 2 * i + 1;
            if left >= node_idx {
                left = LEAF_MARKER;
            }
            if right >= node_idx {
                right = LEAF_MARKER;
            }

            nodes[node_idx as usize] = Node { left_child: left, right_child: right, parent: LEAF_MARKER, op_id: base_op_id + node_idx as u64 };

            if left != LEAF_MARKER && left < num_nodes {
                nodes[left as usize].parent = node_idx;
            }
            if right != LEAF_MARKER && right < num_nodes {
                nodes[right as usize].parent = node_idx;
            }
        }

        Ok(Self { nodes, num_leaves, root_index, depth })
    }

    pub fn num_leaves(&self) -> u32 {
        self.num_leaves
    }

    pub fn num_nodes(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_leaf(&self, index: u32) -> bool {
        index < self.num_leaves
    }

    pub fn parent(&self, index: u32) -> Option<u32> {
        self.nodes.get(index as usize).map(|n| n.parent).filter(|&p| p != LEAF_MARKER)
    }

    pub fn left_child(&self, index: u32) -> Option<u32> {
        self.nodes.get(index as usize).map(|n| n.left_child).filter(|&c| c != LEAF_MARKER)
    }

    pub fn right_child(&self, index: u32) -> Option<u32> {
        self.nodes.get(index as usize).map(|n| n.right_child).filter(|&c| c != LEAF_MARKER)
    }

    pub fn op_id(&self, index: u32) -> Option<u64> {
        self.nodes.get(index as usize).map(|n| n.op_id)
    }

    /// Bottom-up compensated reduction over 64-bit leaf values (spec §4.5).
    pub fn reduce_64(&self, values: &[i64], faults: &mut FaultFlags) -> i64 {
        self.reduce_with(values.len(), |i| values[i], faults)
    }

    /// Bottom-up compensated reduction over 32-bit leaf values, widened to
    /// 64 bits before accumulation (spec §4.5).
    pub fn reduce_32(&self, values: &[i32], faults: &mut FaultFlags) -> i64 {
        self.reduce_with(values.len(), |i| values[i] as i64, faults)
    }

    fn reduce_with(&self, len: usize, leaf: impl Fn(usize) -> i64, faults: &mut FaultFlags) -> i64 {
        if self.num_leaves == 0 || len == 0 {
            return 0;
        }
        if self.num_leaves == 1 {
            return leaf(0);
        }

        let mut accum = vec![CompAccum::new(); self.nodes.len()];
        for i in 0..self.num_leaves as usize {
            accum[i] = CompAccum::with_value(leaf(i));
        }

        for i in self.num_leaves as usize..self.nodes.len() {
            let node = self.nodes[i];
            if node.left_child != LEAF_MARKER {
                let child = accum[node.left_child as usize];
                accum[i].merge(&child, faults);
            }
            if node.right_child != LEAF_MARKER {
                let child = accum[node.right_child as usize];
                accum[i].merge(&child, faults);
            }
        }

        accum[self.root_index as usize].finalize(faults)
    }
}
