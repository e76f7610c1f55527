// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Lock-free single-producer single-consumer byte ring.
//!
//! One side (a task) pushes or pops bytes with [`ByteRing::push_slice`] and
//! [`ByteRing::pop_slice`]; the other side (the driver, in interrupt
//! context) moves bytes in place through the segments returned by
//! [`ByteRing::read_segments`] and [`ByteRing::write_segments`] and then
//! commits them with [`ByteRing::advance_read`] or
//! [`ByteRing::advance_write`]. The read index is only stored by the
//! consumer and the write index only by the producer, so no lock is needed.
//!
//! One byte of the storage is kept free to tell a full ring from an empty
//! one.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

/// One contiguous run of ring storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingSegment {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Location of the bytes a transfer will move: a linear run, and, when the
/// run crosses the end of the storage, the wrap run from the start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingInfo {
    pub linear: RingSegment,
    pub wrap: Option<RingSegment>,
}

impl RingInfo {
    /// A flat buffer, which never wraps.
    pub fn linear_only(ptr: *mut u8, len: usize) -> RingInfo {
        RingInfo {
            linear: RingSegment { ptr, len },
            wrap: None,
        }
    }

    pub fn len(&self) -> usize {
        self.linear.len + self.wrap.map_or(0, |w| w.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ByteRing<'a> {
    storage: NonNull<u8>,
    size: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    _buf: PhantomData<&'a mut [u8]>,
}

// Producer and consumer each only store their own index.
unsafe impl Send for ByteRing<'_> {}
unsafe impl Sync for ByteRing<'_> {}

impl<'a> ByteRing<'a> {
    pub fn new(buf: &'a mut [u8]) -> ByteRing<'a> {
        let size = buf.len();
        ByteRing {
            storage: NonNull::from(buf).cast(),
            size,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            _buf: PhantomData,
        }
    }

    /// Most bytes the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.size.saturating_sub(1)
    }

    /// Bytes ready to be read.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            (self.size - head) + tail
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be written before the ring is full.
    pub fn available_len(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Segments holding the next `n` bytes to read, or `None` if fewer than
    /// `n` bytes are in the ring.
    pub fn read_segments(&self, n: usize) -> Option<RingInfo> {
        if n > self.len() {
            return None;
        }
        Some(self.segments_from(self.head.load(Ordering::Acquire), n))
    }

    /// Segments where the next `n` bytes can be written, or `None` if there
    /// is not that much free space.
    pub fn write_segments(&self, n: usize) -> Option<RingInfo> {
        if n > self.available_len() {
            return None;
        }
        Some(self.segments_from(self.tail.load(Ordering::Acquire), n))
    }

    fn segments_from(&self, start: usize, n: usize) -> RingInfo {
        let base = self.storage.as_ptr();
        let linear = core::cmp::min(n, self.size - start);
        // `start < size` always holds, so the pointer stays in the storage.
        let linear_ptr = unsafe { base.add(start) };
        RingInfo {
            linear: RingSegment {
                ptr: linear_ptr,
                len: linear,
            },
            wrap: (n > linear).then_some(RingSegment {
                ptr: base,
                len: n - linear,
            }),
        }
    }

    /// Consume `n` bytes that were read in place. Clamped to `len()`.
    pub fn advance_read(&self, n: usize) {
        let n = core::cmp::min(n, self.len());
        if n == 0 {
            return;
        }
        let head = self.head.load(Ordering::Acquire);
        self.head.store((head + n) % self.size, Ordering::Release);
    }

    /// Publish `n` bytes that were written in place. Clamped to
    /// `available_len()`.
    pub fn advance_write(&self, n: usize) {
        let n = core::cmp::min(n, self.available_len());
        if n == 0 {
            return;
        }
        let tail = self.tail.load(Ordering::Acquire);
        self.tail.store((tail + n) % self.size, Ordering::Release);
    }

    /// Hand up to `n` readable bytes to `f` without consuming them. `f` is
    /// called once per segment with the offset of the segment in the run.
    pub fn read_with<F: FnMut(usize, &[u8])>(&self, n: usize, mut f: F) -> usize {
        let n = core::cmp::min(n, self.len());
        if let Some(info) = self.read_segments(n) {
            let mut offset = 0;
            for seg in [Some(info.linear), info.wrap].into_iter().flatten() {
                // The consumer owns these bytes until it advances the head.
                let bytes = unsafe { core::slice::from_raw_parts(seg.ptr, seg.len) };
                f(offset, bytes);
                offset += seg.len;
            }
        }
        n
    }

    /// Hand up to `n` bytes of free space to `f` without publishing them.
    pub fn write_with<F: FnMut(usize, &mut [u8])>(&self, n: usize, mut f: F) -> usize {
        let n = core::cmp::min(n, self.available_len());
        if let Some(info) = self.write_segments(n) {
            let mut offset = 0;
            for seg in [Some(info.linear), info.wrap].into_iter().flatten() {
                // The producer owns free space until it advances the tail.
                let bytes = unsafe { core::slice::from_raw_parts_mut(seg.ptr, seg.len) };
                f(offset, bytes);
                offset += seg.len;
            }
        }
        n
    }

    /// Copy as much of `data` as fits into the ring. Returns the number of
    /// bytes taken.
    pub fn push_slice(&self, data: &[u8]) -> usize {
        let n = self.write_with(data.len(), |offset, dst| {
            let len = dst.len();
            dst.copy_from_slice(&data[offset..offset + len]);
        });
        self.advance_write(n);
        n
    }

    /// Move up to `out.len()` bytes out of the ring. Returns the number of
    /// bytes moved.
    pub fn pop_slice(&self, out: &mut [u8]) -> usize {
        let n = self.read_with(out.len(), |offset, src| {
            out[offset..offset + src.len()].copy_from_slice(src);
        });
        self.advance_read(n);
        n
    }
}

impl fmt::Debug for ByteRing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ByteRing")
            .field("size", &self.size)
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish()
    }
}
