//! Copying between kernel buffers and a user address space
//!
//! The kernel never dereferences user addresses directly. Both directions
//! walk the user range page by page and go through the frame service, so a
//! buffer crossing page boundaries may land in unrelated frames.

use super::{AddressSpace, VirtAddr};
use crate::{
    config::PAGE_SIZE,
    error::{VmError, VmResult},
};

/// Split `[start, start + len)` into per-page `(page, offset, len)` chunks
fn chunks(start: VirtAddr, len: usize) -> impl Iterator<Item = (VirtAddr, usize, usize)> {
    let end = start.0 + len;
    let mut va = start.0;
    core::iter::from_fn(move || {
        if va >= end {
            return None;
        }
        let page = VirtAddr(va).page_base();
        let offset = va - page.0;
        let n = (PAGE_SIZE - offset).min(end - va);
        va += n;
        Some((page, offset, n))
    })
}

impl AddressSpace {
    fn check_user_range(&self, start: VirtAddr, len: usize) -> VmResult<()> {
        if start.0 == 0 {
            return Err(VmError::InvalidAddress);
        }
        let end = start.0.checked_add(len).ok_or(VmError::InvalidAddress)?;
        if len > 0 && !VirtAddr(end - 1).is_user_representable() {
            return Err(VmError::InvalidAddress);
        }
        if chunks(start, len).all(|(page, _, _)| self.contains(page)) {
            Ok(())
        } else {
            Err(VmError::InvalidAddress)
        }
    }

    /// Copy `data` to user address `dst`, faulting in pages as needed.
    ///
    /// The whole range must lie in declared regions; nothing is written
    /// otherwise. Region permissions are not consulted.
    pub fn copyout(&mut self, dst: VirtAddr, data: &[u8]) -> VmResult<()> {
        self.check_user_range(dst, data.len())?;
        let mut copied = 0;
        for (page, offset, n) in chunks(dst, data.len()) {
            let frame = self.resolve(page)?;
            self.frames()
                .write_frame(frame.into(), offset, &data[copied..copied + n]);
            copied += n;
        }
        trace!("copyout: {} bytes to {:?}", copied, dst);
        Ok(())
    }

    /// Copy from user address `src` into `buf`.
    ///
    /// Pages of a region that were never touched read as zeroes and are not
    /// allocated.
    pub fn copyin(&self, src: VirtAddr, buf: &mut [u8]) -> VmResult<()> {
        self.check_user_range(src, buf.len())?;
        let mut copied = 0;
        for (page, offset, n) in chunks(src, buf.len()) {
            let dst = &mut buf[copied..copied + n];
            match self.translate(page.floor()) {
                Some(frame) => self.frames().read_frame(frame.into(), offset, dst),
                None => dst.fill(0),
            }
            copied += n;
        }
        Ok(())
    }
}
