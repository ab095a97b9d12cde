//! Translation cache (TLB) control
//!
//! The TLB is a small hardware table with no address space tag, so every
//! switch to another address space has to blank it. All writes go through
//! [`TlbController`], which masks interrupts for the duration of each
//! update so a timer interrupt never sees a half-written slot.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::{PhysAddr, VirtAddr};
use crate::{
    config::NUM_TLB,
    sync::{InterruptControl, IntrGuard},
};

bitflags! {
    /// low word flags of a TLB entry
    pub struct TlbLoFlags: u32 {
        /// ignore the address space id
        const GLOBAL = 0x100;
        /// entry is usable
        const VALID = 0x200;
        /// writes allowed
        const DIRTY = 0x400;
        /// uncached
        const NOCACHE = 0x800;
    }
}

/// virtual page part of the high word
pub const TLBHI_VPAGE: u32 = 0xffff_f000;
/// physical frame part of the low word
pub const TLBLO_PPAGE: u32 = 0xffff_f000;
/// low word of a blank slot
pub const TLBLO_INVALID: u32 = 0;

/// High word of a blank slot: a distinct kernel-segment page per slot, so
/// no two slots ever match and no user address hits a blank slot.
pub fn tlbhi_invalid(slot: usize) -> u32 {
    ((0x80000 + slot) << 12) as u32
}

/// One hardware TLB slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// virtual page
    pub entryhi: u32,
    /// physical frame and flags
    pub entrylo: u32,
}

impl TlbEntry {
    /// The blank value for `slot`
    pub fn invalid(slot: usize) -> Self {
        Self {
            entryhi: tlbhi_invalid(slot),
            entrylo: TLBLO_INVALID,
        }
    }
    /// A valid, dirty mapping of `vpage` to `frame`
    pub fn mapping(vpage: VirtAddr, frame: PhysAddr) -> Self {
        Self {
            entryhi: vpage.0 as u32 & TLBHI_VPAGE,
            entrylo: (frame.0 as u32 & TLBLO_PPAGE)
                | (TlbLoFlags::DIRTY | TlbLoFlags::VALID).bits(),
        }
    }
    /// Flags of the low word
    pub fn flags(&self) -> TlbLoFlags {
        TlbLoFlags::from_bits_truncate(self.entrylo)
    }
    /// Valid bit set?
    pub fn is_valid(&self) -> bool {
        self.flags().contains(TlbLoFlags::VALID)
    }
    /// Dirty bit set?
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(TlbLoFlags::DIRTY)
    }
    /// Virtual page this slot translates
    pub fn vpage(&self) -> VirtAddr {
        VirtAddr((self.entryhi & TLBHI_VPAGE) as usize)
    }
    /// Physical frame this slot points at
    pub fn frame(&self) -> PhysAddr {
        PhysAddr((self.entrylo & TLBLO_PPAGE) as usize)
    }
}

/// Raw TLB primitives of one CPU
pub trait TlbHardware: Send + Sync {
    /// Read a slot
    fn read(&self, slot: usize) -> TlbEntry;
    /// Write a slot
    fn write(&self, entry: TlbEntry, slot: usize);
    /// Write a slot of the hardware's choosing
    fn random(&self, entry: TlbEntry);
    /// Slot whose high word matches `entryhi`, if any
    fn probe(&self, entryhi: u32) -> Option<usize>;
}

/// TLB kept in memory, victims picked round-robin
pub struct SoftTlb {
    slots:  Mutex<[TlbEntry; NUM_TLB]>,
    victim: AtomicUsize,
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTlb {
    /// A TLB with every slot blank
    pub fn new() -> Self {
        let mut slots = [TlbEntry::invalid(0); NUM_TLB];
        for (slot, entry) in slots.iter_mut().enumerate() {
            *entry = TlbEntry::invalid(slot);
        }
        Self {
            slots:  Mutex::new(slots),
            victim: AtomicUsize::new(0),
        }
    }
    /// Number of slots holding a valid mapping
    pub fn valid_entries(&self) -> usize {
        self.slots.lock().iter().filter(|e| e.is_valid()).count()
    }
}

impl TlbHardware for SoftTlb {
    fn read(&self, slot: usize) -> TlbEntry {
        self.slots.lock()[slot]
    }
    fn write(&self, entry: TlbEntry, slot: usize) {
        self.slots.lock()[slot] = entry;
    }
    fn random(&self, entry: TlbEntry) {
        let slot = self.victim.fetch_add(1, Ordering::Relaxed) % NUM_TLB;
        self.slots.lock()[slot] = entry;
    }
    fn probe(&self, entryhi: u32) -> Option<usize> {
        self.slots
            .lock()
            .iter()
            .position(|e| e.entryhi & TLBHI_VPAGE == entryhi & TLBHI_VPAGE)
    }
}

/// Request to drop translations on another CPU
#[derive(Debug, Clone, Copy)]
pub struct TlbShootdown {
    /// page to drop, `None` for everything
    pub vpage: Option<VirtAddr>,
}

/// The only path by which the subsystem touches the TLB
pub struct TlbController {
    hw:   Arc<dyn TlbHardware>,
    intr: Arc<dyn InterruptControl>,
}

impl TlbController {
    /// Wrap the TLB and interrupt primitives of this CPU
    pub fn new(hw: Arc<dyn TlbHardware>, intr: Arc<dyn InterruptControl>) -> Self {
        Self { hw, intr }
    }

    /// Blank every slot
    pub fn invalidate_all(&self) {
        // Disable interrupts on this CPU while frobbing the TLB.
        let _guard = IntrGuard::new(self.intr.as_ref());
        for slot in 0..NUM_TLB {
            self.hw.write(TlbEntry::invalid(slot), slot);
        }
        trace!("tlb: invalidated {} slots", NUM_TLB);
    }

    /// Install a valid, dirty translation of `vpage` to `frame`.
    ///
    /// The victim slot is left to the hardware even when blank slots exist.
    pub fn insert(&self, vpage: VirtAddr, frame: PhysAddr) {
        let entry = TlbEntry::mapping(vpage, frame);
        let _guard = IntrGuard::new(self.intr.as_ref());
        self.hw.random(entry);
        trace!("tlb: {:?} -> {:?}", vpage, frame);
    }

    /// Cross-CPU shootdown. Single CPU, nothing to do.
    pub fn shootdown(&self, ts: &TlbShootdown) {
        warn!("tlb shootdown requested for {:?}, ignored", ts.vpage);
    }

    /// Underlying hardware, for inspection
    pub fn hardware(&self) -> &dyn TlbHardware {
        self.hw.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SoftInterrupts;
    use core::sync::atomic::AtomicBool;

    /// fails the test if a slot is written with interrupts enabled
    struct MaskCheckingTlb {
        tlb:      SoftTlb,
        intr:     Arc<SoftInterrupts>,
        violated: AtomicBool,
    }

    impl MaskCheckingTlb {
        fn check(&self) {
            if !self.intr.masked() {
                self.violated.store(true, Ordering::SeqCst);
            }
        }
    }

    impl TlbHardware for MaskCheckingTlb {
        fn read(&self, slot: usize) -> TlbEntry {
            self.tlb.read(slot)
        }
        fn write(&self, entry: TlbEntry, slot: usize) {
            self.check();
            self.tlb.write(entry, slot)
        }
        fn random(&self, entry: TlbEntry) {
            self.check();
            self.tlb.random(entry)
        }
        fn probe(&self, entryhi: u32) -> Option<usize> {
            self.tlb.probe(entryhi)
        }
    }

    fn controller() -> (TlbController, Arc<MaskCheckingTlb>, Arc<SoftInterrupts>) {
        let intr = Arc::new(SoftInterrupts::new());
        let hw = Arc::new(MaskCheckingTlb {
            tlb:      SoftTlb::new(),
            intr:     intr.clone(),
            violated: AtomicBool::new(false),
        });
        (TlbController::new(hw.clone(), intr.clone()), hw, intr)
    }

    #[test]
    fn insert_sets_valid_and_dirty() {
        let (tlb, hw, intr) = controller();
        tlb.insert(VirtAddr(0x0040_0000), PhysAddr(0x7000));
        let slot = hw.probe(0x0040_0000).unwrap();
        let entry = hw.read(slot);
        assert!(entry.is_valid() && entry.is_dirty());
        assert_eq!(entry.vpage(), VirtAddr(0x0040_0000));
        assert_eq!(entry.frame(), PhysAddr(0x7000));
        assert!(!hw.violated.load(Ordering::SeqCst));
        assert!(!intr.masked());
    }

    #[test]
    fn invalidate_blanks_every_slot() {
        let (tlb, hw, intr) = controller();
        for n in 0..NUM_TLB + 3 {
            tlb.insert(VirtAddr(n << 12), PhysAddr((n + 1) << 12));
        }
        assert_eq!(hw.tlb.valid_entries(), NUM_TLB);
        tlb.invalidate_all();
        assert_eq!(hw.tlb.valid_entries(), 0);
        for slot in 0..NUM_TLB {
            assert_eq!(hw.read(slot), TlbEntry::invalid(slot));
        }
        assert!(!hw.violated.load(Ordering::SeqCst));
        assert!(!intr.masked());
    }

    #[test]
    fn blank_slots_never_match_user_pages() {
        let tlb = SoftTlb::new();
        assert_eq!(tlb.probe(0x0000_1000), None);
        assert_eq!(tlb.probe(0x7fff_f000), None);
    }

    #[test]
    fn round_robin_overwrites_oldest() {
        let tlb = SoftTlb::new();
        for n in 0..=NUM_TLB {
            tlb.random(TlbEntry::mapping(VirtAddr((n + 1) << 12), PhysAddr(0x1000)));
        }
        assert_eq!(tlb.probe(1 << 12), None);
        assert!(tlb.probe(((NUM_TLB + 1) << 12) as u32).is_some());
    }

    #[test]
    fn shootdown_is_harmless() {
        let (tlb, _, _) = controller();
        tlb.shootdown(&TlbShootdown { vpage: None });
    }
}
