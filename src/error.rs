//! Error taxonomy of the virtual memory subsystem

use thiserror::Error;

/// no memory left (errno)
pub const ENOMEM: isize = 3;
/// bad memory reference (errno)
pub const EFAULT: isize = 6;
/// not a loadable executable (errno)
pub const ENOEXEC: isize = 13;

/// Why a memory operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    /// The frame service is exhausted or a table node could not be allocated
    #[error("out of memory")]
    OutOfMemory,
    /// Null address, outside every region, or a write to a read-only mapping
    #[error("invalid address")]
    InvalidAddress,
    /// No address space where one is required
    #[error("no address space")]
    InvalidAddressSpace,
    /// The program image is malformed or does not fit the user layout
    #[error("invalid executable")]
    InvalidExecutable,
}

impl VmError {
    /// The errno the trap layer hands back to the faulting process
    pub fn errno(&self) -> isize {
        match self {
            VmError::OutOfMemory => ENOMEM,
            VmError::InvalidAddress | VmError::InvalidAddressSpace => EFAULT,
            VmError::InvalidExecutable => ENOEXEC,
        }
    }
}

/// Result alias used across the crate
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(VmError::OutOfMemory.errno(), ENOMEM);
        assert_eq!(VmError::InvalidAddress.errno(), EFAULT);
        assert_eq!(VmError::InvalidAddressSpace.errno(), EFAULT);
        assert_eq!(VmError::InvalidExecutable.errno(), ENOEXEC);
    }

    #[test]
    fn display_is_short() {
        assert_eq!(std::format!("{}", VmError::OutOfMemory), "out of memory");
    }
}
