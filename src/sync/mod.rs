//! Synchronization primitives
//!
//! Shared structures are guarded by [`spin::Mutex`]; translation cache
//! updates additionally run with interrupts masked through [`IntrGuard`].

mod spl;

pub use spl::{InterruptControl, IntrGuard, SoftInterrupts, IPL_HIGH, IPL_NONE};
