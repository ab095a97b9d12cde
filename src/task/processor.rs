//! Implementation of [`Processor`]
//!
//! The thread layer is outside this crate; all the memory subsystem needs
//! from it is the address space of whatever runs on the CPU right now.

use alloc::sync::Arc;

use spin::Mutex;

use crate::mm::AddressSpace;

/// Shared handle to a process's address space. The lock serialises
/// structural changes (region definition, page table insert) made by the
/// process's threads.
pub type AddressSpaceRef = Arc<Mutex<AddressSpace>>;

/// What the memory subsystem asks of the process/thread layer
pub trait ProcessContext: Send + Sync {
    /// Address space of the running process, `None` for kernel threads
    fn current_as(&self) -> Option<AddressSpaceRef>;
}

/// Processor management structure
pub struct Processor {
    current: Mutex<Option<AddressSpaceRef>>,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    /// A CPU running a kernel thread
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
    /// Switch the running address space, returning the previous one
    pub fn set_current(&self, space: Option<AddressSpaceRef>) -> Option<AddressSpaceRef> {
        core::mem::replace(&mut *self.current.lock(), space)
    }
    ///Get current address space in moving semanteme
    pub fn take_current(&self) -> Option<AddressSpaceRef> {
        self.current.lock().take()
    }
    ///Get current address space in cloning semanteme
    pub fn current(&self) -> Option<AddressSpaceRef> {
        self.current.lock().clone()
    }
}

impl ProcessContext for Processor {
    fn current_as(&self) -> Option<AddressSpaceRef> {
        self.current()
    }
}
