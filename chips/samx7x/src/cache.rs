// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Cortex-M7 data cache maintenance for DMA buffers.
//!
//! The USBHS DMA master does not snoop the L1 data cache. Buffers handed to
//! it are cleaned to memory before a transfer and invalidated after one,
//! line by line, through the cache maintenance operations in the System
//! Control Space.
//!
//! <https://developer.arm.com/documentation/dui0646/c/Cortex-M7-Peripherals/Cache-maintenance-operations>

use dcd::utilities::dma_fence::DmaFence;
use dcd::utilities::registers::interfaces::Writeable;
use dcd::utilities::registers::{register_structs, WriteOnly};
use dcd::utilities::StaticRef;

/// Size of a data cache line.
pub const CACHE_LINE: usize = 32;

register_structs! {
    /// Cache maintenance operations by address, write-only.
    CacheMaintenanceRegisters {
        (0x00 => _reserved0),
        /// D-cache invalidate by MVA to PoC
        (0x0c => dcimvac: WriteOnly<u32>),
        (0x10 => _reserved1),
        /// D-cache clean by MVA to PoC
        (0x18 => dccmvac: WriteOnly<u32>),
        (0x1c => _reserved2),
        /// D-cache clean and invalidate by MVA to PoC
        (0x20 => dccimvac: WriteOnly<u32>),
        (0x24 => @END),
    }
}

#[cfg_attr(
    not(any(doc, all(target_arch = "arm", target_os = "none"))),
    allow(dead_code)
)]
const CACHE_MAINTENANCE: StaticRef<CacheMaintenanceRegisters> =
    unsafe { StaticRef::new(0xE000EF50 as *const CacheMaintenanceRegisters) };

/// Cache lines covering `len` bytes at `addr`, as `(first, end)` line
/// addresses, and whether the first and last lines are only partly covered.
fn line_span(addr: usize, len: usize) -> (usize, usize, bool, bool) {
    let first = addr & !(CACHE_LINE - 1);
    let end = (addr + len + CACHE_LINE - 1) & !(CACHE_LINE - 1);
    let head_partial = addr != first;
    let tail_partial = (addr + len) % CACHE_LINE != 0;
    (first, end, head_partial, tail_partial)
}

fn byte_region<T>(buf: *mut [T]) -> (usize, usize) {
    (buf as *mut T as usize, buf.len() * core::mem::size_of::<T>())
}

/// DMA fence for a Cortex-M7 with the data cache enabled.
#[derive(Copy, Clone)]
pub struct CortexM7Fence;

// `release` cleans every line the buffer touches before the DSB that
// orders it against the MMIO write starting the channel. `acquire`
// invalidates them after the channel stopped, cleaning partial lines first
// so neighbouring data is not lost.
unsafe impl DmaFence for CortexM7Fence {
    fn release<T>(self, buf: *mut [T]) {
        let (addr, len) = byte_region(buf);
        if len == 0 {
            return;
        }
        dsb();
        let (first, end, _, _) = line_span(addr, len);
        for line in (first..end).step_by(CACHE_LINE) {
            clean_line(line);
        }
        dsb();
        isb();
    }

    fn acquire<T>(self, buf: *mut [T]) {
        let (addr, len) = byte_region(buf);
        if len == 0 {
            return;
        }
        dsb();
        let (first, end, head_partial, tail_partial) = line_span(addr, len);
        let last = end - CACHE_LINE;
        for line in (first..end).step_by(CACHE_LINE) {
            if (line == first && head_partial) || (line == last && tail_partial) {
                clean_invalidate_line(line);
            } else {
                invalidate_line(line);
            }
        }
        dsb();
        isb();
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
#[inline(always)]
fn dsb() {
    use core::arch::asm;
    unsafe {
        asm!("dsb", options(nostack, preserves_flags));
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
#[inline(always)]
fn isb() {
    use core::arch::asm;
    unsafe {
        asm!("isb", options(nostack, preserves_flags));
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn clean_line(addr: usize) {
    CACHE_MAINTENANCE.dccmvac.set(addr as u32);
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn invalidate_line(addr: usize) {
    CACHE_MAINTENANCE.dcimvac.set(addr as u32);
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn clean_invalidate_line(addr: usize) {
    CACHE_MAINTENANCE.dccimvac.set(addr as u32);
}

// Host builds have no cache to maintain; keep the ordering.
#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn dsb() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn isb() {}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn clean_line(_addr: usize) {}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn invalidate_line(_addr: usize) {}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn clean_invalidate_line(_addr: usize) {}
