// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Ordering of CPU memory accesses against DMA transfers.

/// Makes CPU writes visible to a DMA engine before it starts, and DMA writes
/// visible to the CPU after it stops.
///
/// On a core with a data cache this cleans or invalidates the cache lines
/// covering the buffer. On a core without one it is a memory barrier.
///
/// # Safety
///
/// An implementation must guarantee that after `release(buf)` returns, every
/// prior CPU write to `buf` is observable by a DMA read started by a later
/// MMIO write, and that after `acquire(buf)` returns, every DMA write to
/// `buf` that completed before the call is observable by later CPU reads.
pub unsafe trait DmaFence: Copy {
    /// Publish CPU writes to `buf` before a DMA transfer reads it.
    fn release<T>(self, buf: *mut [T]);

    /// Make DMA writes to `buf` visible to the CPU after a DMA transfer
    /// wrote it.
    fn acquire<T>(self, buf: *mut [T]);
}
