//! End-to-end runs of the memory subsystem: faults, fork, exit, program
//! load and context switches, with every collaborator simulated in memory.

use std::{sync::Arc, thread};

use vm_core::{
    config::{PAGE_SIZE, USERSTACK},
    error::{EFAULT, ENOMEM},
    mm::{BuddyFrameAllocator, FrameAllocator, SoftTlb, TlbHardware, VirtAddr},
    sync::SoftInterrupts,
    FaultType, Processor, Vm, VmError,
};

struct Machine {
    vm:     Vm,
    frames: Arc<BuddyFrameAllocator>,
    tlb:    Arc<SoftTlb>,
    cpu:    Arc<Processor>,
}

fn boot(nframes: usize) -> Machine {
    let frames = Arc::new(BuddyFrameAllocator::new(nframes));
    let tlb = Arc::new(SoftTlb::new());
    let cpu = Arc::new(Processor::new());
    let vm = Vm::bootstrap(
        frames.clone(),
        tlb.clone(),
        Arc::new(SoftInterrupts::new()),
        cpu.clone(),
    );
    Machine {
        vm,
        frames,
        tlb,
        cpu,
    }
}

fn frame_of(m: &Machine, page: usize) -> usize {
    let slot = m.tlb.probe(page as u32).expect("no translation cached");
    m.tlb.read(slot).frame().0
}

#[test]
fn demand_paging_scenario() {
    let m = boot(16);
    let space = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(space.clone()));
    m.vm.define_region(VirtAddr(0x1000), 3, true, true, false)
        .unwrap();

    m.vm.fault(FaultType::Read, 0x1000).unwrap();
    assert_eq!(m.frames.allocated(), 1);
    let frame = frame_of(&m, 0x1000);
    let mut page = vec![0xffu8; PAGE_SIZE];
    space.lock().copyin(VirtAddr(0x1000), &mut page).unwrap();
    assert!(page.iter().all(|&b| b == 0));

    m.vm.fault(FaultType::Read, 0x1000).unwrap();
    assert_eq!(m.frames.allocated(), 1);
    assert_eq!(frame_of(&m, 0x1000), frame);

    assert_eq!(
        m.vm.fault(FaultType::Read, 0x4000),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(m.vm.fault(FaultType::Read, 0), Err(VmError::InvalidAddress));
    assert_eq!(m.frames.allocated(), 1);
}

#[test]
fn fork_then_exit() {
    let m = boot(32);
    let parent = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(parent.clone()));
    m.vm.define_region(VirtAddr(0x0040_0000), 8, true, true, false)
        .unwrap();
    m.vm.define_stack().unwrap();
    parent
        .lock()
        .copyout(VirtAddr(0x0040_0ffc), b"shared before fork")
        .unwrap();
    m.vm.fault(FaultType::Write, USERSTACK - 8).unwrap();
    let parent_frames = m.frames.allocated();
    assert_eq!(parent_frames, 3);

    let child = m.vm.copy_as(&parent).unwrap();
    assert_eq!(m.frames.allocated(), 2 * parent_frames);
    assert_eq!(
        child.lock().page_table().shape(),
        parent.lock().page_table().shape()
    );

    // switch to the child
    m.cpu.set_current(Some(child.clone()));
    m.vm.activate();
    assert_eq!(m.tlb.valid_entries(), 0);
    let mut buf = [0u8; 18];
    child
        .lock()
        .copyin(VirtAddr(0x0040_0ffc), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"shared before fork");
    child
        .lock()
        .copyout(VirtAddr(0x0040_0ffc), b"child wrote this!!")
        .unwrap();

    parent
        .lock()
        .copyin(VirtAddr(0x0040_0ffc), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"shared before fork");

    // child exits
    m.cpu.set_current(Some(parent.clone()));
    drop(child);
    assert_eq!(m.frames.allocated(), parent_frames);

    // parent exits
    m.cpu.take_current();
    drop(parent);
    assert_eq!(m.frames.allocated(), 0);
}

#[test]
fn fork_out_of_memory_leaves_parent_intact() {
    // 9 usable frames, parent maps 6
    let m = boot(10);
    let parent = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(parent.clone()));
    m.vm.define_region(VirtAddr(0x1000), 6, true, true, false)
        .unwrap();
    for n in 0..6 {
        m.vm.fault(FaultType::Write, 0x1000 + n * PAGE_SIZE).unwrap();
    }
    assert_eq!(m.vm.copy_as(&parent).err(), Some(VmError::OutOfMemory));
    assert_eq!(m.frames.allocated(), 6);
    assert_eq!(parent.lock().mapped_pages(), 6);

    // the parent keeps running
    m.vm.activate();
    m.vm.fault(FaultType::Read, 0x1000).unwrap();
    assert_eq!(m.frames.allocated(), 6);
}

#[test]
fn trap_layer_sees_errno() {
    let m = boot(2);
    let space = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(space));
    m.vm.define_region(VirtAddr(0x1000), 2, true, true, false)
        .unwrap();
    assert_eq!(m.vm.vm_fault(1, 0x1000), 0);
    assert_eq!(m.vm.vm_fault(1, 0x2000), ENOMEM);
    assert_eq!(m.vm.vm_fault(0, 0x9000), EFAULT);
    assert_eq!(m.vm.vm_fault(2, 0x1000), EFAULT);
}

#[test]
fn context_switch_never_leaks_translations() {
    let m = boot(32);
    let a = m.vm.create_as().unwrap();
    let b = m.vm.create_as().unwrap();
    for space in [&a, &b] {
        space
            .lock()
            .define_region(VirtAddr(0x1000), 4, true, true, false)
            .unwrap();
    }

    m.cpu.set_current(Some(a.clone()));
    m.vm.activate();
    for n in 0..4 {
        m.vm.fault(FaultType::Write, 0x1000 + n * PAGE_SIZE).unwrap();
    }
    let a_frames: Vec<_> = (0..4).map(|n| frame_of(&m, 0x1000 + n * PAGE_SIZE)).collect();

    m.cpu.set_current(Some(b.clone()));
    m.vm.deactivate();
    m.vm.activate();
    for n in 0..4 {
        assert_eq!(m.tlb.probe((0x1000 + n * PAGE_SIZE) as u32), None);
    }
    m.vm.fault(FaultType::Read, 0x1000).unwrap();
    assert!(!a_frames.contains(&frame_of(&m, 0x1000)));
}

#[test]
fn concurrent_faults_share_one_mapping_per_page() {
    const PAGES: usize = 128;
    let m = boot(PAGES + 8);
    let space = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(space.clone()));
    // spans two leaf nodes, so threads race on node creation too
    m.vm.define_region(VirtAddr(0x0100_0000), PAGES, true, true, false)
        .unwrap();

    thread::scope(|s| {
        for t in 0..4 {
            let vm = &m.vm;
            s.spawn(move || {
                for n in 0..PAGES {
                    let page = (n + t * 17) % PAGES;
                    vm.fault(FaultType::Write, 0x0100_0000 + page * PAGE_SIZE + t)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(m.frames.allocated(), PAGES);
    assert_eq!(space.lock().mapped_pages(), PAGES);
}

/// ELF parsing reads headers in place, which needs 8 byte alignment
#[repr(C, align(8))]
struct Image([u8; 0x200]);

fn tiny_elf(entry: u64, vaddr: u64, text: &[u8], memsz: u64) -> Box<Image> {
    fn put(b: &mut [u8], at: usize, v: &[u8]) {
        b[at..at + v.len()].copy_from_slice(v);
    }
    let mut image = Box::new(Image([0; 0x200]));
    let b = &mut image.0;
    put(b, 0, &[0x7f, b'E', b'L', b'F', 2, 1, 1]);
    put(b, 16, &2u16.to_le_bytes());
    put(b, 20, &1u32.to_le_bytes());
    put(b, 24, &entry.to_le_bytes());
    put(b, 32, &64u64.to_le_bytes());
    put(b, 52, &64u16.to_le_bytes());
    put(b, 54, &56u16.to_le_bytes());
    put(b, 56, &1u16.to_le_bytes());
    // one PT_LOAD, read + execute, file data at 0x100
    put(b, 64, &1u32.to_le_bytes());
    put(b, 68, &5u32.to_le_bytes());
    put(b, 72, &0x100u64.to_le_bytes());
    put(b, 80, &vaddr.to_le_bytes());
    put(b, 88, &vaddr.to_le_bytes());
    put(b, 96, &(text.len() as u64).to_le_bytes());
    put(b, 104, &memsz.to_le_bytes());
    put(b, 0x100, text);
    image
}

#[test]
fn exec_loads_program_and_runs() {
    let m = boot(16);
    let space = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(space.clone()));
    m.vm.activate();

    let text = [0x27u8, 0xbd, 0xff, 0xe8];
    let image = tiny_elf(0x0040_0000, 0x0040_0000, &text, 2 * PAGE_SIZE as u64);
    let (entry, sp) = m.vm.load_elf(&image.0).unwrap();
    assert_eq!(entry, 0x0040_0000);
    assert_eq!(sp, VirtAddr(USERSTACK));
    assert_eq!(m.frames.allocated(), 1);

    // instruction fetch hits the page the loader filled
    m.vm.fault(FaultType::Read, entry).unwrap();
    assert_eq!(m.frames.allocated(), 1);
    let mut word = [0u8; 4];
    m.frames
        .read_frame(vm_core::mm::PhysAddr(frame_of(&m, entry)).into(), 0, &mut word);
    assert_eq!(word, text);

    // second page of the segment is zero fill
    m.vm.fault(FaultType::Read, entry + PAGE_SIZE).unwrap();
    assert_eq!(m.frames.allocated(), 2);

    // first push onto the stack
    m.vm.fault(FaultType::Write, sp.0 - 4).unwrap();
    assert_eq!(m.frames.allocated(), 3);

    drop(space);
    m.cpu.take_current();
    assert_eq!(m.frames.allocated(), 0);
}

#[test]
fn oversized_region_is_refused_and_process_keeps_running() {
    let m = boot(8);
    let space = m.vm.create_as().unwrap();
    m.cpu.set_current(Some(space.clone()));
    m.vm.define_region(VirtAddr(0x1000), 2, true, true, false)
        .unwrap();
    assert_eq!(
        m.vm.define_region(VirtAddr(0x0040_0000), usize::MAX / PAGE_SIZE, true, true, false),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(space.lock().regions().len(), 1);
    m.vm.fault(FaultType::Write, 0x1000).unwrap();
    assert_eq!(
        m.vm.fault(FaultType::Read, 0x0040_0000),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(m.frames.allocated(), 1);
}
