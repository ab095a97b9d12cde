//! Implementation of physical and virtual address and page number.
use core::fmt::{self, Debug, Formatter};

use crate::config::{
    KSEG0, PAGE_FRAME, PAGE_SIZE, PAGE_SIZE_BITS, PT_LEAF_SHIFT, PT_MID_SHIFT, PT_NODE_SIZE,
    PT_ROOT_SHIFT, PT_ROOT_SIZE, VA_BITS,
};

/// physical address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct PhysAddr(pub usize);

/// virtual address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct VirtAddr(pub usize);

/// kernel virtual address aliasing a physical address through the direct map
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct KernelAddr(pub usize);

/// virtual page number
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtPageNum(pub usize);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#x}", self.0))
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}
impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PA:{:#x}", self.0))
    }
}
impl Debug for KernelAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("KA:{:#x}", self.0))
    }
}

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for VirtPageNum {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<PhysAddr> for usize {
    fn from(v: PhysAddr) -> Self {
        v.0
    }
}
impl From<VirtAddr> for usize {
    fn from(v: VirtAddr) -> Self {
        v.0
    }
}

impl VirtAddr {
    /// Get the (floor) virtual page number
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }
    /// Get the (ceil) virtual page number
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum((self.0 + PAGE_SIZE - 1) / PAGE_SIZE)
    }
    /// Get the page offset of virtual address
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    /// Mask the address down to its containing page
    pub fn page_base(&self) -> VirtAddr {
        VirtAddr(self.0 & PAGE_FRAME)
    }
    /// Check page aligned
    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
    /// Whether the address fits in the user address layout
    pub fn is_user_representable(&self) -> bool {
        (self.0 as u64) >> VA_BITS == 0
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtPageNum {
    /// Root, mid and leaf indexes of this page, in walk order
    pub fn indexes(&self) -> [usize; 3] {
        let va = self.0 << PAGE_SIZE_BITS;
        [
            (va >> PT_ROOT_SHIFT) & (PT_ROOT_SIZE - 1),
            (va >> PT_MID_SHIFT) & (PT_NODE_SIZE - 1),
            (va >> PT_LEAF_SHIFT) & (PT_NODE_SIZE - 1),
        ]
    }
    /// Rebuild a page number from its three table indexes
    pub fn from_indexes(root: usize, mid: usize, leaf: usize) -> Self {
        let va = (root << PT_ROOT_SHIFT) | (mid << PT_MID_SHIFT) | (leaf << PT_LEAF_SHIFT);
        VirtPageNum(va >> PAGE_SIZE_BITS)
    }
}

impl PhysAddr {
    /// The unmapped sentinel stored in empty leaf slots
    pub const NULL: PhysAddr = PhysAddr(0);
    /// Whether this is the unmapped sentinel
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
    /// Get the page offset of physical address
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl From<PhysAddr> for KernelAddr {
    fn from(pa: PhysAddr) -> Self {
        Self(pa.0 + KSEG0)
    }
}
impl From<KernelAddr> for PhysAddr {
    fn from(ka: KernelAddr) -> Self {
        Self(ka.0 - KSEG0)
    }
}
