//! Address space [`AddressSpace`] management of a process
//!
//! One address space per process: a region list saying which virtual pages
//! may be touched, and a page table saying which of them already have a
//! frame. Frames are allocated lazily by the fault handler, copied eagerly
//! on fork and released when the address space is dropped.

use alloc::sync::Arc;

use super::{
    region::{MapPermission, Region, RegionList},
    FrameAllocator, FrameTracker, PageTable, PhysAddr, TlbController, VirtAddr, VirtPageNum,
};
use crate::{
    config::{PAGE_SIZE, STACK_PAGES, USERSTACK},
    error::{VmError, VmResult},
};

/// How the page table of a forked address space is populated
pub trait DuplicationPolicy {
    /// Fill `new` from `old`. `new` must be freshly created and hold no
    /// mappings.
    fn duplicate(
        &self,
        old: &PageTable,
        new: &mut PageTable,
        frames: &dyn FrameAllocator,
    ) -> VmResult<()>;
}

/// Copy every mapped page into a fresh frame at fork time
pub struct EagerCopy;

impl DuplicationPolicy for EagerCopy {
    fn duplicate(
        &self,
        old: &PageTable,
        new: &mut PageTable,
        frames: &dyn FrameAllocator,
    ) -> VmResult<()> {
        new.copy_from(old, frames)
    }
}

/// address space
pub struct AddressSpace {
    /// initial user stack pointer
    pub stack_top: VirtAddr,
    regions:       RegionList,
    page_table:    PageTable,
    frames:        Arc<dyn FrameAllocator>,
}

impl AddressSpace {
    /// Create an empty address space: no regions, empty root array
    pub fn new(frames: Arc<dyn FrameAllocator>) -> VmResult<Self> {
        let page_table = PageTable::new()?;
        info!("create a new address space");
        Ok(Self {
            stack_top: VirtAddr(USERSTACK),
            regions: RegionList::new(),
            page_table,
            frames,
        })
    }

    /// Declare `npages` pages starting at the page containing `vaddr`.
    /// Overlap with existing regions is the caller's problem.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        npages: usize,
        readable: bool,
        writable: bool,
        executable: bool,
    ) -> VmResult<()> {
        let perm = MapPermission::from_rwx(readable, writable, executable);
        self.regions.define(vaddr.page_base(), npages, perm)
    }

    /// Declare the user stack below [`USERSTACK`] and return the initial
    /// stack pointer
    pub fn define_stack(&mut self) -> VmResult<VirtAddr> {
        let stack_base = VirtAddr(USERSTACK - STACK_PAGES * PAGE_SIZE);
        self.define_region(stack_base, STACK_PAGES, true, true, false)?;
        self.stack_top = VirtAddr(USERSTACK);
        Ok(self.stack_top)
    }

    /// Let the loader write into read-only regions
    pub fn prepare_load(&mut self) {
        self.regions.prepare_load();
    }

    /// Revoke write access granted by [`AddressSpace::prepare_load`]. Cached
    /// translations may carry the old permissions, so the TLB is flushed.
    pub fn complete_load(&mut self, tlb: &TlbController) {
        self.regions.complete_load();
        tlb.invalidate_all();
    }

    /// Whether `va` is inside a declared region
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.regions.contains(va)
    }

    /// The region containing `va`
    pub fn find_region(&self, va: VirtAddr) -> Option<&Region> {
        self.regions.find(va)
    }

    /// All regions, most recently declared first
    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// The page table
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Frame service this address space allocates from
    pub fn frames(&self) -> &dyn FrameAllocator {
        self.frames.as_ref()
    }

    /// Frame mapped at `vpn`, if any
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PhysAddr> {
        self.page_table.translate(vpn)
    }

    /// Frame for the page at `page`, allocating a zeroed one if the page is
    /// inside a region and not mapped yet.
    pub fn resolve(&mut self, page: VirtAddr) -> VmResult<PhysAddr> {
        let vpn = page.floor();
        if let Some(frame) = self.page_table.translate(vpn) {
            return Ok(frame);
        }
        if !self.regions.contains(page) {
            return Err(VmError::InvalidAddress);
        }
        // freed again if the insert fails
        let frame = FrameTracker::new(self.frames.as_ref()).ok_or(VmError::OutOfMemory)?;
        self.page_table.insert(vpn, frame.paddr())?;
        trace!("resolve: {:?} -> {:?}", page, frame);
        Ok(frame.keep())
    }

    /// Number of pages backed by a frame
    pub fn mapped_pages(&self) -> usize {
        self.page_table.mapped().count()
    }

    /// Deep copy for fork: regions by value, every mapped page into a new
    /// frame.
    pub fn try_clone(&self) -> VmResult<Self> {
        self.duplicate_with(&EagerCopy)
    }

    /// Copy for fork with an explicit page table policy. On failure the
    /// partial copy is dropped, which frees whatever it already holds.
    pub fn duplicate_with(&self, policy: &dyn DuplicationPolicy) -> VmResult<Self> {
        let mut space = Self::new(self.frames.clone())?;
        space.stack_top = self.stack_top;
        space.regions = self.regions.try_clone()?;
        policy.duplicate(&self.page_table, &mut space.page_table, self.frames.as_ref())?;
        debug!(
            "address space copied: {} regions, {} pages",
            space.regions.len(),
            space.mapped_pages()
        );
        Ok(space)
    }

    /// Tear everything down. Same as dropping the address space.
    pub fn destroy(self) {}
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        info!(
            "destroy address space: {} regions, {} pages",
            self.regions.len(),
            self.mapped_pages()
        );
        self.page_table.destroy(self.frames.as_ref());
    }
}
