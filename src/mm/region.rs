//! Declared regions of a user address space
//!
//! A region is a page-aligned span of virtual memory the process is allowed
//! to touch. The fault handler only backs pages that fall inside one. Regions
//! are declared at load time and live until the address space is destroyed;
//! overlap is not checked.

use alloc::collections::VecDeque;

use super::{VirtAddr, VirtPageNum};
use crate::{
    config::PAGE_SIZE,
    error::{VmError, VmResult},
};

bitflags! {
    /// region permissions, plus the marker left by `prepare_load`
    pub struct MapPermission: u8 {
        ///Readable
        const R = 1 << 0;
        ///Writable
        const W = 1 << 1;
        ///Excutable
        const X = 1 << 2;
        ///Write access granted only for the duration of a program load
        const LOAD = 1 << 3;
    }
}

impl MapPermission {
    /// Build from the three access flags a loader hands over
    pub fn from_rwx(readable: bool, writable: bool, executable: bool) -> Self {
        let mut perm = MapPermission::empty();
        if readable {
            perm |= MapPermission::R;
        }
        if writable {
            perm |= MapPermission::W;
        }
        if executable {
            perm |= MapPermission::X;
        }
        perm
    }
}

/// A declared span of virtual pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// first byte, page aligned
    pub base:   VirtAddr,
    /// length in pages
    pub npages: usize,
    /// access permissions
    pub perm:   MapPermission,
}

impl Region {
    /// One past the last byte of the region
    pub fn end(&self) -> VirtAddr {
        VirtAddr(self.base.0 + self.npages * PAGE_SIZE)
    }
    /// Whether `va` lies inside `[base, base + npages * PAGE_SIZE)`
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.base <= va && va < self.end()
    }
    /// First virtual page of the region
    pub fn start_vpn(&self) -> VirtPageNum {
        self.base.floor()
    }
    /// Readable?
    pub fn readable(&self) -> bool {
        self.perm.contains(MapPermission::R)
    }
    /// Writable? (includes write access granted for loading)
    pub fn writable(&self) -> bool {
        self.perm.contains(MapPermission::W)
    }
    /// Executable?
    pub fn executable(&self) -> bool {
        self.perm.contains(MapPermission::X)
    }
    /// Whether the region is currently opened up for loading
    pub fn load_override(&self) -> bool {
        self.perm.contains(MapPermission::LOAD)
    }
}

/// The region table of one address space, most recently declared first
#[derive(Debug, Default)]
pub struct RegionList {
    regions: VecDeque<Region>,
}

impl RegionList {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            regions: VecDeque::new(),
        }
    }
    /// Prepend a region. The caller keeps regions from overlapping.
    ///
    /// The end of the region must be representable, so [`Region::end`] can
    /// never wrap.
    pub fn define(&mut self, base: VirtAddr, npages: usize, perm: MapPermission) -> VmResult<()> {
        let end = npages
            .checked_mul(PAGE_SIZE)
            .and_then(|len| base.0.checked_add(len))
            .ok_or(VmError::InvalidAddress)?;
        self.regions
            .try_reserve(1)
            .map_err(|_| VmError::OutOfMemory)?;
        debug!(
            "define region [{:#x}, {:#x}) perm {:?}",
            base.0, end, perm
        );
        self.regions.push_front(Region { base, npages, perm });
        Ok(())
    }
    /// The region containing `va`, if any
    pub fn find(&self, va: VirtAddr) -> Option<&Region> {
        self.regions.iter().find(|region| region.contains(va))
    }
    /// Whether `va` is inside some declared region
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.find(va).is_some()
    }
    /// Open every exactly-read-only region for writing and mark it
    pub fn prepare_load(&mut self) {
        for region in self.regions.iter_mut() {
            if region.perm == MapPermission::R {
                region.perm |= MapPermission::W | MapPermission::LOAD;
            }
        }
    }
    /// Put every region opened by [`RegionList::prepare_load`] back to read-only
    pub fn complete_load(&mut self) {
        for region in self.regions.iter_mut() {
            if region.load_override() {
                region.perm = MapPermission::R;
            }
        }
    }
    /// Value copy of the list, order preserved
    pub fn try_clone(&self) -> VmResult<Self> {
        let mut regions = VecDeque::new();
        regions
            .try_reserve_exact(self.regions.len())
            .map_err(|_| VmError::OutOfMemory)?;
        regions.extend(self.regions.iter().copied());
        Ok(Self { regions })
    }
    /// Regions, most recently declared first
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }
    /// No regions declared?
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
