//! The virtual memory subsystem as seen by the rest of the kernel

use alloc::sync::Arc;

use spin::Mutex;

use super::{AddressSpace, FrameAllocator, TlbController, TlbHardware, TlbShootdown, VirtAddr};
use crate::{
    config::{NUM_TLB, PAGE_SIZE, PT_NODE_SIZE, PT_ROOT_SIZE},
    error::{VmError, VmResult},
    sync::InterruptControl,
    task::{AddressSpaceRef, ProcessContext},
};

/// Collaborators of the subsystem, wired together once at boot
pub struct Vm {
    frames: Arc<dyn FrameAllocator>,
    tlb:    TlbController,
    procs:  Arc<dyn ProcessContext>,
}

impl Vm {
    /// vm_bootstrap: nothing global to set up beyond wiring
    pub fn bootstrap(
        frames: Arc<dyn FrameAllocator>,
        tlb: Arc<dyn TlbHardware>,
        intr: Arc<dyn InterruptControl>,
        procs: Arc<dyn ProcessContext>,
    ) -> Self {
        info!(
            "vm bootstrap: page size {:#x}, table {}x{}x{}, {} tlb slots",
            PAGE_SIZE, PT_ROOT_SIZE, PT_NODE_SIZE, PT_NODE_SIZE, NUM_TLB
        );
        Self {
            frames,
            tlb: TlbController::new(tlb, intr),
            procs,
        }
    }

    /// as_create
    pub fn create_as(&self) -> VmResult<AddressSpaceRef> {
        Ok(Arc::new(Mutex::new(AddressSpace::new(self.frames.clone())?)))
    }

    /// as_copy: duplicate `old` for a forked child
    pub fn copy_as(&self, old: &AddressSpaceRef) -> VmResult<AddressSpaceRef> {
        let child = old.lock().try_clone()?;
        Ok(Arc::new(Mutex::new(child)))
    }

    /// as_activate: called on every switch into a process. Kernel threads
    /// have no address space and leave the TLB alone.
    pub fn activate(&self) {
        if self.procs.current_as().is_none() {
            return;
        }
        debug!("activate: flushing tlb");
        self.tlb.invalidate_all();
    }

    /// as_deactivate: the next activation flushes everything anyway
    pub fn deactivate(&self) {}

    /// as_define_region on the current process
    pub fn define_region(
        &self,
        vaddr: VirtAddr,
        npages: usize,
        readable: bool,
        writable: bool,
        executable: bool,
    ) -> VmResult<()> {
        self.current_as()?
            .lock()
            .define_region(vaddr, npages, readable, writable, executable)
    }

    /// as_define_stack on the current process
    pub fn define_stack(&self) -> VmResult<VirtAddr> {
        self.current_as()?.lock().define_stack()
    }

    /// as_prepare_load on the current process
    pub fn prepare_load(&self) -> VmResult<()> {
        self.current_as()?.lock().prepare_load();
        Ok(())
    }

    /// as_complete_load on the current process
    pub fn complete_load(&self) -> VmResult<()> {
        self.current_as()?.lock().complete_load(&self.tlb);
        Ok(())
    }

    /// Load an ELF image into the current process, returning the entry
    /// point and initial stack pointer
    pub fn load_elf(&self, elf_data: &[u8]) -> VmResult<(usize, VirtAddr)> {
        self.current_as()?.lock().load_elf(elf_data, &self.tlb)
    }

    /// vm_tlbshootdown
    pub fn tlb_shootdown(&self, ts: &TlbShootdown) {
        self.tlb.shootdown(ts);
    }

    /// Address space of the running process
    pub fn current_as(&self) -> VmResult<AddressSpaceRef> {
        self.procs.current_as().ok_or(VmError::InvalidAddressSpace)
    }

    /// The TLB controller
    pub fn tlb(&self) -> &TlbController {
        &self.tlb
    }

    /// The frame service
    pub fn frames(&self) -> &Arc<dyn FrameAllocator> {
        &self.frames
    }
}
