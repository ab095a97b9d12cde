//! Memory management implementation
//!
//! Demand-paged virtual memory for user processes on a CPU with a software
//! refilled TLB. Every process owns an [`AddressSpace`]: a list of regions
//! it may touch and a three-level page table recording which of those pages
//! already have a physical frame. Frames are allocated on the first fault,
//! copied eagerly on fork and freed when the address space is dropped.
//!
//! [`Vm`] ties the pieces to the rest of the kernel: the frame service, the
//! TLB of the current CPU and the process layer.

mod address;
mod address_space;
mod fault;
mod frame_allocator;
mod loader;
mod page_table;
pub mod region;
mod tlb;
mod usercopy;
mod vm;

pub use address::{KernelAddr, PhysAddr, VirtAddr, VirtPageNum};
pub use address_space::{AddressSpace, DuplicationPolicy, EagerCopy};
pub use fault::FaultType;
pub use frame_allocator::{BuddyFrameAllocator, FrameAllocator, FrameTracker, RAM_POISON};
pub use page_table::{NodePos, PageTable};
pub use region::{MapPermission, Region, RegionList};
pub use tlb::{
    tlbhi_invalid,
    SoftTlb,
    TlbController,
    TlbEntry,
    TlbHardware,
    TlbLoFlags,
    TlbShootdown,
    TLBHI_VPAGE,
    TLBLO_INVALID,
    TLBLO_PPAGE,
};
pub use vm::Vm;
