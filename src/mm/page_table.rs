//! Implementation of the software-walked [`PageTable`].
//!
//! Three levels keyed by disjoint bit fields of the virtual page number:
//! a root array of [`PT_ROOT_SIZE`] optional mid nodes, each mid node an
//! array of [`PT_NODE_SIZE`] optional leaf nodes, each leaf an array of
//! [`PT_NODE_SIZE`] physical frame addresses. [`PhysAddr::NULL`] in a leaf
//! slot means "unmapped". Nodes are created on first insert beneath them and
//! released only by [`PageTable::destroy`].
use alloc::vec::Vec;

use super::{FrameAllocator, FrameTracker, PhysAddr, VirtPageNum};
use crate::{
    config::{PT_NODE_SIZE, PT_ROOT_SIZE},
    error::{VmError, VmResult},
};

fn try_node<T>(len: usize, fill: impl FnMut() -> T) -> VmResult<Vec<T>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|_| VmError::OutOfMemory)?;
    slots.resize_with(len, fill);
    Ok(slots)
}

/// second level: one slot per leaf array
struct MidNode {
    leaves: Vec<Option<LeafNode>>,
}

impl MidNode {
    fn new() -> VmResult<Self> {
        Ok(Self {
            leaves: try_node(PT_NODE_SIZE, || None)?,
        })
    }
}

/// last level: one physical frame address per page
struct LeafNode {
    frames: Vec<PhysAddr>,
}

impl LeafNode {
    fn new() -> VmResult<Self> {
        Ok(Self {
            frames: try_node(PT_NODE_SIZE, || PhysAddr::NULL)?,
        })
    }
}

/// Position of an allocated node: `(root, None)` for a mid node,
/// `(root, Some(mid))` for a leaf node.
pub type NodePos = (usize, Option<usize>);

/// page table structure
pub struct PageTable {
    root: Vec<Option<MidNode>>,
}

impl PageTable {
    /// Create an empty page table, only the root array is allocated
    pub fn new() -> VmResult<Self> {
        Ok(Self {
            root: try_node(PT_ROOT_SIZE, || None)?,
        })
    }

    /// The stored frame for `vpn`.
    ///
    /// `None` when a level on the way down was never allocated. A leaf that
    /// exists but was never written yields `Some(PhysAddr::NULL)`.
    pub fn lookup(&self, vpn: VirtPageNum) -> Option<PhysAddr> {
        let [root, mid, leaf] = vpn.indexes();
        let mid_node = self.root.get(root)?.as_ref()?;
        let leaf_node = mid_node.leaves[mid].as_ref()?;
        Some(leaf_node.frames[leaf])
    }

    /// The frame backing `vpn`, if it is mapped
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PhysAddr> {
        self.lookup(vpn).filter(|pa| !pa.is_null())
    }

    /// Store `frame` for `vpn`, creating the mid and leaf nodes on the way.
    ///
    /// A node created before a later allocation failed stays in place; it is
    /// an empty, well-formed node and teardown handles it.
    pub fn insert(&mut self, vpn: VirtPageNum, frame: PhysAddr) -> VmResult<()> {
        let [root, mid, leaf] = vpn.indexes();
        let mid_node = match &mut self.root[root] {
            Some(node) => node,
            slot => {
                trace!("page table: new mid node at root[{}]", root);
                slot.insert(MidNode::new()?)
            }
        };
        let leaf_node = match &mut mid_node.leaves[mid] {
            Some(node) => node,
            slot => {
                trace!("page table: new leaf node at root[{}][{}]", root, mid);
                slot.insert(LeafNode::new()?)
            }
        };
        leaf_node.frames[leaf] = frame;
        Ok(())
    }

    /// Deep copy of `old` into this table, which must be empty: nodes
    /// already present would be replaced without their frames being freed.
    ///
    /// Every allocated node of `old` gets a node at the same position here,
    /// and every mapped page a freshly allocated frame holding the same
    /// bytes. Nodes and frames are attached as soon as they exist, so when
    /// an allocation fails the partial copy is still torn down by
    /// [`PageTable::destroy`].
    pub fn copy_from(&mut self, old: &PageTable, frames: &dyn FrameAllocator) -> VmResult<()> {
        debug_assert!(
            self.root.iter().all(Option::is_none),
            "copy_from into a populated page table"
        );
        for (i, old_mid) in old.root.iter().enumerate() {
            let old_mid = match old_mid {
                Some(node) => node,
                None => continue,
            };
            let new_mid = self.root[i].insert(MidNode::new()?);
            for (j, old_leaf) in old_mid.leaves.iter().enumerate() {
                let old_leaf = match old_leaf {
                    Some(node) => node,
                    None => continue,
                };
                let new_leaf = new_mid.leaves[j].insert(LeafNode::new()?);
                for (k, &old_frame) in old_leaf.frames.iter().enumerate() {
                    if old_frame.is_null() {
                        continue;
                    }
                    let frame = FrameTracker::new_uninit(frames).ok_or(VmError::OutOfMemory)?;
                    frames.copy_frame(frame.kaddr, old_frame.into());
                    new_leaf.frames[k] = frame.keep();
                }
            }
        }
        Ok(())
    }

    /// Free every mapped frame and every node.
    ///
    /// Safe on a table in any state, including a partial copy; afterwards
    /// the table is empty and a second call frees nothing.
    pub fn destroy(&mut self, frames: &dyn FrameAllocator) {
        let mut released = 0;
        for mid_slot in self.root.iter_mut() {
            let mid_node = match mid_slot.take() {
                Some(node) => node,
                None => continue,
            };
            for leaf_node in mid_node.leaves.into_iter().flatten() {
                for frame in leaf_node.frames.into_iter().filter(|pa| !pa.is_null()) {
                    frames.free_kpages(frame.into());
                    released += 1;
                }
            }
        }
        trace!("page table: destroyed, {} frames released", released);
    }

    /// Mapped pages and their frames, in ascending page order
    pub fn mapped(&self) -> impl Iterator<Item = (VirtPageNum, PhysAddr)> + '_ {
        self.root
            .iter()
            .enumerate()
            .filter_map(|(i, mid)| mid.as_ref().map(|mid| (i, mid)))
            .flat_map(|(i, mid)| {
                mid.leaves
                    .iter()
                    .enumerate()
                    .filter_map(move |(j, leaf)| leaf.as_ref().map(|leaf| (i, j, leaf)))
            })
            .flat_map(|(i, j, leaf)| {
                leaf.frames
                    .iter()
                    .enumerate()
                    .filter(|(_, pa)| !pa.is_null())
                    .map(move |(k, &pa)| (VirtPageNum::from_indexes(i, j, k), pa))
            })
    }

    /// Positions of every allocated mid and leaf node
    pub fn shape(&self) -> Vec<NodePos> {
        let mut nodes = Vec::new();
        for (i, mid) in self.root.iter().enumerate() {
            if let Some(mid) = mid {
                nodes.push((i, None));
                for (j, leaf) in mid.leaves.iter().enumerate() {
                    if leaf.is_some() {
                        nodes.push((i, Some(j)));
                    }
                }
            }
        }
        nodes
    }
}
