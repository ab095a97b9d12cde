//! Interrupt priority level control
//!
//! `splhigh` masks interrupts on the current CPU and returns the level that
//! was in effect; `splx` puts that level back. [`IntrGuard`] pairs the two so
//! the prior level is restored on every exit path.

use core::sync::atomic::{compiler_fence, AtomicUsize, Ordering};

/// all interrupts enabled
pub const IPL_NONE: usize = 0;
/// all interrupts masked
pub const IPL_HIGH: usize = 1;

/// Interrupt mask/unmask primitives of the current CPU
pub trait InterruptControl: Send + Sync {
    /// Mask all interrupts, returning the previous level
    fn splhigh(&self) -> usize;
    /// Restore a level returned by [`InterruptControl::splhigh`]
    fn splx(&self, level: usize);
    /// Current level
    fn level(&self) -> usize;
}

/// Guard that masks interrupts and restores the prior level on drop
pub struct IntrGuard<'a> {
    intr:  &'a dyn InterruptControl,
    prior: usize,
}

impl<'a> IntrGuard<'a> {
    /// Mask interrupts until the guard is dropped
    #[inline]
    pub fn new(intr: &'a dyn InterruptControl) -> Self {
        let prior = intr.splhigh();
        compiler_fence(Ordering::SeqCst);
        Self { intr, prior }
    }
}

impl Drop for IntrGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        self.intr.splx(self.prior);
    }
}

/// Software interrupt level for a single simulated CPU
#[derive(Debug, Default)]
pub struct SoftInterrupts {
    level: AtomicUsize,
}

impl SoftInterrupts {
    /// Start with interrupts enabled
    pub fn new() -> Self {
        Self {
            level: AtomicUsize::new(IPL_NONE),
        }
    }
    /// Whether interrupts are currently masked
    pub fn masked(&self) -> bool {
        self.level() == IPL_HIGH
    }
}

impl InterruptControl for SoftInterrupts {
    fn splhigh(&self) -> usize {
        self.level.swap(IPL_HIGH, Ordering::SeqCst)
    }
    fn splx(&self, level: usize) {
        self.level.store(level, Ordering::SeqCst);
    }
    fn level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_on_drop() {
        let intr = SoftInterrupts::new();
        {
            let _guard = IntrGuard::new(&intr);
            assert!(intr.masked());
        }
        assert_eq!(intr.level(), IPL_NONE);
    }

    #[test]
    fn nested_guards_keep_outer_mask() {
        let intr = SoftInterrupts::new();
        let outer = IntrGuard::new(&intr);
        {
            let _inner = IntrGuard::new(&intr);
        }
        assert!(intr.masked());
        drop(outer);
        assert!(!intr.masked());
    }

    #[test]
    fn early_return_still_restores() {
        fn bail(intr: &SoftInterrupts, fail: bool) -> Result<(), ()> {
            let _guard = IntrGuard::new(intr);
            if fail {
                return Err(());
            }
            Ok(())
        }
        let intr = SoftInterrupts::new();
        assert!(bail(&intr, true).is_err());
        assert!(!intr.masked());
    }
}
