//! Loading an ELF program image into a fresh address space

use alloc::vec::Vec;
use core::mem::{align_of, size_of};

use xmas_elf::{
    header::Class,
    program::{ProgramHeader32, ProgramHeader64, Type},
    ElfFile,
};

use super::{AddressSpace, TlbController, VirtAddr};
use crate::error::{VmError, VmResult};

const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];
const EI_CLASS: usize = 4;
const ELFCLASS64: u8 = 2;

/// Size and alignment of one program header; headers are read in place
fn program_header_layout(class: Class) -> Option<(usize, usize)> {
    match class {
        Class::ThirtyTwo => Some((size_of::<ProgramHeader32>(), align_of::<ProgramHeader32>())),
        Class::SixtyFour => Some((size_of::<ProgramHeader64>(), align_of::<ProgramHeader64>())),
        _ => None,
    }
}

impl AddressSpace {
    /// Declare a region per loadable segment, copy the file contents in and
    /// set up the stack. Returns the entry point and the initial stack
    /// pointer.
    ///
    /// Bytes of a segment past its file size are never written; they come
    /// from the zero fill on first touch.
    pub fn load_elf(
        &mut self,
        elf_data: &[u8],
        tlb: &TlbController,
    ) -> VmResult<(usize, VirtAddr)> {
        let base_align = match elf_data.get(EI_CLASS) {
            Some(&ELFCLASS64) => align_of::<u64>(),
            _ => align_of::<u32>(),
        };
        if elf_data.as_ptr() as usize % base_align != 0 {
            warn!("load_elf: image not aligned");
            return Err(VmError::InvalidExecutable);
        }
        let elf = ElfFile::new(elf_data).map_err(|err| {
            warn!("load_elf: {}", err);
            VmError::InvalidExecutable
        })?;
        if elf.header.pt1.magic != ELF_MAGIC {
            return Err(VmError::InvalidExecutable);
        }
        let pt2 = &elf.header.pt2;
        // header fields are untrusted; the table must be well formed and lie
        // inside the image before any program header is parsed
        let (ph_size, ph_align) =
            program_header_layout(elf.header.pt1.class()).ok_or(VmError::InvalidExecutable)?;
        let entry_size = usize::from(pt2.ph_entry_size());
        if pt2.ph_count() > 0
            && (entry_size < ph_size
                || entry_size % ph_align != 0
                || pt2.ph_offset() % ph_align as u64 != 0)
        {
            warn!("load_elf: malformed program header table");
            return Err(VmError::InvalidExecutable);
        }
        let ph_end = u64::from(pt2.ph_count())
            .checked_mul(u64::from(pt2.ph_entry_size()))
            .and_then(|len| pt2.ph_offset().checked_add(len))
            .and_then(|end| usize::try_from(end).ok());
        if !ph_end.map_or(false, |end| end <= elf_data.len()) {
            warn!("load_elf: program headers past end of image");
            return Err(VmError::InvalidExecutable);
        }

        let mut segments = Vec::new();
        for i in 0..pt2.ph_count() {
            let ph = elf
                .program_header(i)
                .map_err(|_| VmError::InvalidExecutable)?;
            if ph.get_type() != Ok(Type::Load) {
                continue;
            }
            let start_va = VirtAddr(ph.virtual_addr() as usize);
            let end_va = ph
                .virtual_addr()
                .checked_add(ph.mem_size())
                .and_then(|end| usize::try_from(end).ok())
                .map(VirtAddr)
                .ok_or(VmError::InvalidExecutable)?;
            if !VirtAddr(end_va.0.saturating_sub(1)).is_user_representable() {
                return Err(VmError::InvalidExecutable);
            }
            if ph.file_size() > ph.mem_size() {
                warn!("load_elf: segment {} file size exceeds memory size", i);
                return Err(VmError::InvalidExecutable);
            }
            let file_start = usize::try_from(ph.offset()).ok();
            let file_end = ph
                .offset()
                .checked_add(ph.file_size())
                .and_then(|end| usize::try_from(end).ok());
            let file_range = match (file_start, file_end) {
                (Some(start), Some(end)) if end <= elf_data.len() => start..end,
                _ => {
                    warn!("load_elf: segment {} data outside the image", i);
                    return Err(VmError::InvalidExecutable);
                }
            };
            let flags = ph.flags();
            let npages = end_va.ceil().0 - start_va.floor().0;
            debug!(
                "map [{:#x}, {:#x}) r={} w={} x={}",
                start_va.0,
                end_va.0,
                flags.is_read(),
                flags.is_write(),
                flags.is_execute()
            );
            self.define_region(
                start_va,
                npages,
                flags.is_read(),
                flags.is_write(),
                flags.is_execute(),
            )?;
            segments.push((start_va, &elf_data[file_range]));
        }

        self.prepare_load();
        for (va, data) in segments {
            if !data.is_empty() {
                self.copyout(va, data)?;
            }
        }
        self.complete_load(tlb);

        let sp = self.define_stack()?;
        let entry = pt2.entry_point() as usize;
        info!("load_elf: entry {:#x}, sp {:#x}", entry, sp.0);
        Ok((entry, sp))
    }
}
