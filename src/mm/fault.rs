//! Page fault handling
//!
//! Every TLB miss from user mode ends up in [`Vm::fault`]. A fault is handled
//! to completion in the faulting thread:
//!
//! 1. address 0 and writes to read-only translations are fatal
//! 2. the address is masked to its page
//! 3. a page already in the page table is reused
//! 4. otherwise the page must lie inside a declared region; a zeroed frame
//!    is allocated and recorded in the page table
//! 5. the translation is loaded into the TLB and the instruction restarts

use num_enum::TryFromPrimitive;

use super::{Vm, VirtAddr};
use crate::error::{VmError, VmResult};

/// Kind of access that missed
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum FaultType {
    /// a read was attempted
    Read     = 0,
    /// a write was attempted
    Write    = 1,
    /// a write hit a translation without the dirty bit
    ReadOnly = 2,
}

impl FaultType {
    /// Decode the trap layer's fault code
    pub fn from_code(code: u32) -> VmResult<Self> {
        Self::try_from_primitive(code).map_err(|_| VmError::InvalidAddress)
    }
}

impl Vm {
    /// vm_fault: resolve a miss at `fault_address`.
    ///
    /// `Ok` means a valid translation is in the TLB. Any error is fatal to
    /// the faulting process.
    pub fn fault(&self, fault_type: FaultType, fault_address: usize) -> VmResult<()> {
        if fault_address == 0 {
            error!("vm_fault: null pointer access");
            return Err(VmError::InvalidAddress);
        }
        // no copy-on-write, so a protection fault is a real violation
        if fault_type == FaultType::ReadOnly {
            error!("vm_fault: write to read-only page {:#x}", fault_address);
            return Err(VmError::InvalidAddress);
        }
        let va = VirtAddr(fault_address);
        if !va.is_user_representable() {
            error!("vm_fault: {:#x} outside the user address layout", fault_address);
            return Err(VmError::InvalidAddress);
        }
        let page = va.page_base();
        debug!("vm_fault: {:?} at {:#x}", fault_type, page.0);

        let space = self.current_as()?;
        // held across lookup and insert so two threads of one process
        // cannot race on creating the same table node
        let frame = space
            .lock()
            .resolve(page)
            .inspect_err(|err| error!("vm_fault: {:#x}: {}", page.0, err))?;

        self.tlb().insert(page, frame);
        Ok(())
    }

    /// Trap-layer entry: raw fault code in, 0 or an errno out
    pub fn vm_fault(&self, code: u32, fault_address: usize) -> isize {
        match FaultType::from_code(code).and_then(|ty| self.fault(ty, fault_address)) {
            Ok(()) => 0,
            Err(err) => err.errno(),
        }
    }
}
