//! Demand-paged virtual memory for a small teaching kernel
//!
//! The crate is organised the way the rest of the kernel is:
//!
//! - [`mm`]: regions, the page table, address spaces, fault handling and
//!   the TLB
//! - [`task`]: the hook through which the memory subsystem sees the running
//!   process
//! - [`sync`]: interrupt masking around TLB updates
//! - [`logging`]: the `log` backend
//!
//! Hardware and the frame service are reached through traits
//! ([`mm::TlbHardware`], [`mm::FrameAllocator`], [`sync::InterruptControl`]),
//! with in-memory implementations so the whole subsystem runs on a host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod config;
pub mod error;
pub mod logging;
pub mod mm;
pub mod sync;
pub mod task;

pub use error::{VmError, VmResult};
pub use mm::{AddressSpace, FaultType, Vm};
pub use task::{AddressSpaceRef, ProcessContext, Processor};
