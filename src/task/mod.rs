//! The slice of process management the memory subsystem depends on
//!
//! Scheduling, thread creation and exit live elsewhere; [`ProcessContext`]
//! is how the fault handler and activation find the running address space.

mod processor;

pub use processor::{AddressSpaceRef, ProcessContext, Processor};
