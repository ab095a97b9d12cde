//! Physical page frame allocator
//!
//! The kernel's frame service is an external collaborator; [`FrameAllocator`]
//! is the contract the rest of the subsystem relies on. Frames are handed out
//! as kernel aliases ([`KernelAddr`]) and converted to physical addresses with
//! the fixed direct-map offset.
//!
//! [`BuddyFrameAllocator`] backs the contract with a block of simulated RAM so
//! the subsystem runs unchanged on a host.

use alloc::{collections::BTreeMap, vec, vec::Vec};
use core::{
    fmt::{self, Debug, Formatter},
    mem,
};

use buddy_system_allocator::FrameAllocator as BuddyFrames;
use spin::Mutex;

use super::{KernelAddr, PhysAddr};
use crate::config::PAGE_SIZE;

/// Frame service used by the page table, the fault handler and fork
pub trait FrameAllocator: Send + Sync {
    /// Allocate `npages` contiguous frames, content is arbitrary
    fn alloc_kpages(&self, npages: usize) -> Option<KernelAddr>;
    /// Return frames obtained from [`FrameAllocator::alloc_kpages`]
    fn free_kpages(&self, kaddr: KernelAddr);
    /// Fill one frame with zeroes
    fn zero_frame(&self, kaddr: KernelAddr);
    /// Copy one whole frame
    fn copy_frame(&self, dst: KernelAddr, src: KernelAddr);
    /// Read `buf.len()` bytes starting at `offset` inside one frame
    fn read_frame(&self, kaddr: KernelAddr, offset: usize, buf: &mut [u8]);
    /// Write `data` starting at `offset` inside one frame
    fn write_frame(&self, kaddr: KernelAddr, offset: usize, data: &[u8]);
}

/// tracker for a single frame between allocation and installation
///
/// Dropping the tracker gives the frame back; [`FrameTracker::keep`] hands
/// ownership over to whoever stores the returned address.
pub struct FrameTracker<'a> {
    /// kernel alias of the frame
    pub kaddr: KernelAddr,
    frames:    &'a dyn FrameAllocator,
}

impl<'a> FrameTracker<'a> {
    /// Allocate one zero-filled frame
    pub fn new(frames: &'a dyn FrameAllocator) -> Option<Self> {
        let tracker = Self::new_uninit(frames)?;
        // page cleaning
        frames.zero_frame(tracker.kaddr);
        Some(tracker)
    }
    /// Allocate one frame, leaving whatever it held
    pub fn new_uninit(frames: &'a dyn FrameAllocator) -> Option<Self> {
        let kaddr = frames.alloc_kpages(1)?;
        Some(Self { kaddr, frames })
    }
    /// Physical address of the frame
    pub fn paddr(&self) -> PhysAddr {
        self.kaddr.into()
    }
    /// Stop tracking and return the physical address
    pub fn keep(self) -> PhysAddr {
        let paddr = self.paddr();
        mem::forget(self);
        paddr
    }
}

impl Debug for FrameTracker<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("FrameTracker:PA={:#x}", self.paddr().0))
    }
}

impl Drop for FrameTracker<'_> {
    fn drop(&mut self) {
        self.frames.free_kpages(self.kaddr);
    }
}

/// value simulated RAM is filled with before anything touches it
pub const RAM_POISON: u8 = 0xa5;

/// frame service over simulated RAM, allocation by a buddy system
pub struct BuddyFrameAllocator {
    inner: Mutex<BuddyInner>,
}

struct BuddyInner {
    buddy:     BuddyFrames,
    ram:       Vec<u8>,
    /// first frame number -> pages in the allocation
    sizes:     BTreeMap<usize, usize>,
    allocated: usize,
    nframes:   usize,
}

impl BuddyFrameAllocator {
    /// Create a frame service managing `nframes` frames of RAM
    ///
    /// Frame 0 is kept back: physical address 0 is the unmapped sentinel.
    pub fn new(nframes: usize) -> Self {
        let mut buddy = BuddyFrames::new();
        if nframes > 1 {
            buddy.add_frame(1, nframes);
        }
        debug!(
            "frame allocator: {} frames, ram [{:#x}, {:#x})",
            nframes,
            PAGE_SIZE,
            nframes * PAGE_SIZE
        );
        Self {
            inner: Mutex::new(BuddyInner {
                buddy,
                ram: vec![RAM_POISON; nframes * PAGE_SIZE],
                sizes: BTreeMap::new(),
                allocated: 0,
                nframes,
            }),
        }
    }
    /// Number of frames currently handed out
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }
    /// Number of frames still available
    pub fn available(&self) -> usize {
        let inner = self.inner.lock();
        inner.nframes.saturating_sub(1) - inner.allocated
    }
}

impl BuddyInner {
    fn frame_range(&self, kaddr: KernelAddr) -> core::ops::Range<usize> {
        let pa = PhysAddr::from(kaddr).0;
        assert!(
            pa % PAGE_SIZE == 0 && pa + PAGE_SIZE <= self.ram.len(),
            "{:?} is not a frame of this allocator",
            kaddr
        );
        pa..pa + PAGE_SIZE
    }
}

impl FrameAllocator for BuddyFrameAllocator {
    fn alloc_kpages(&self, npages: usize) -> Option<KernelAddr> {
        let mut inner = self.inner.lock();
        match inner.buddy.alloc(npages) {
            Some(ppn) => {
                inner.sizes.insert(ppn, npages);
                inner.allocated += npages;
                trace!("alloc_kpages: ppn={:#x} npages={}", ppn, npages);
                Some(PhysAddr(ppn * PAGE_SIZE).into())
            }
            None => {
                error!("FrameAllocator out of memory!");
                None
            }
        }
    }
    fn free_kpages(&self, kaddr: KernelAddr) {
        let mut inner = self.inner.lock();
        let ppn = PhysAddr::from(kaddr).0 / PAGE_SIZE;
        let npages = match inner.sizes.remove(&ppn) {
            Some(npages) => npages,
            None => panic!("Frame ppn={:#x} has not been allocated!", ppn),
        };
        trace!("free_kpages: ppn={:#x} npages={}", ppn, npages);
        inner.buddy.dealloc(ppn, npages);
        inner.allocated -= npages;
    }
    fn zero_frame(&self, kaddr: KernelAddr) {
        let mut inner = self.inner.lock();
        let range = inner.frame_range(kaddr);
        inner.ram[range].fill(0);
    }
    fn copy_frame(&self, dst: KernelAddr, src: KernelAddr) {
        let mut inner = self.inner.lock();
        let src = inner.frame_range(src);
        let dst = inner.frame_range(dst).start;
        inner.ram.copy_within(src, dst);
    }
    fn read_frame(&self, kaddr: KernelAddr, offset: usize, buf: &mut [u8]) {
        let inner = self.inner.lock();
        let start = inner.frame_range(kaddr).start + offset;
        assert!(offset + buf.len() <= PAGE_SIZE);
        buf.copy_from_slice(&inner.ram[start..start + buf.len()]);
    }
    fn write_frame(&self, kaddr: KernelAddr, offset: usize, data: &[u8]) {
        let mut inner = self.inner.lock();
        let start = inner.frame_range(kaddr).start + offset;
        assert!(offset + data.len() <= PAGE_SIZE);
        inner.ram[start..start + data.len()].copy_from_slice(data);
    }
}
