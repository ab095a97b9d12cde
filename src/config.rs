//! Constants in the virtual memory subsystem

/// page size : 4KB
pub const PAGE_SIZE: usize = 0x1000;
/// page size bits: 12
pub const PAGE_SIZE_BITS: usize = 0xc;
/// mask selecting the page-aligned part of an address
pub const PAGE_FRAME: usize = !(PAGE_SIZE - 1);

/// width of a user virtual address
pub const VA_BITS: usize = 32;

/// bit position of the root-level index inside a virtual address
pub const PT_ROOT_SHIFT: usize = 24;
/// bit position of the mid-level index inside a virtual address
pub const PT_MID_SHIFT: usize = 18;
/// bit position of the leaf-level index inside a virtual address
pub const PT_LEAF_SHIFT: usize = PAGE_SIZE_BITS;
/// number of slots in the root array (8 index bits)
pub const PT_ROOT_SIZE: usize = 1 << (VA_BITS - PT_ROOT_SHIFT);
/// number of slots in a mid or leaf array (6 index bits)
pub const PT_NODE_SIZE: usize = 1 << (PT_ROOT_SHIFT - PT_MID_SHIFT);

/// top of the user stack, the stack grows down from here
pub const USERSTACK: usize = 0x8000_0000;
/// user stack size in pages
pub const STACK_PAGES: usize = 16;

/// start of the kernel's direct map of physical memory
pub const KSEG0: usize = 0x8000_0000;

/// number of translation cache slots
pub const NUM_TLB: usize = 64;
