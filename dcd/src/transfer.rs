// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Per-endpoint, per-direction record of the transfer in flight.

use core::cell::Cell;

use crate::collections::byte_ring::{ByteRing, RingInfo};
use crate::dma::DescriptorChain;
use crate::utilities::cells::MapCell;

/// Where the bytes of a transfer come from (IN) or go to (OUT).
#[derive(Debug)]
pub enum TransferSource<'a> {
    Buffer(&'a mut [u8]),
    Ring(&'a ByteRing<'a>),
}

impl TransferSource<'_> {
    /// Whether `length` bytes can be moved in `direction_in` direction
    /// without overrunning the buffer or the ring.
    pub(crate) fn fits(&self, length: usize, direction_in: bool) -> bool {
        match self {
            TransferSource::Buffer(buf) => length <= buf.len(),
            TransferSource::Ring(ring) if direction_in => length <= ring.len(),
            TransferSource::Ring(ring) => length <= ring.available_len(),
        }
    }

    /// Where the first `length` bytes to move live: the start of the buffer,
    /// the readable part of the ring (IN) or its free space (OUT).
    pub(crate) fn region(&mut self, length: usize, direction_in: bool) -> Option<RingInfo> {
        match self {
            TransferSource::Buffer(buf) if length <= buf.len() => {
                Some(RingInfo::linear_only(buf.as_mut_ptr(), length))
            }
            TransferSource::Buffer(_) => None,
            TransferSource::Ring(ring) if direction_in => ring.read_segments(length),
            TransferSource::Ring(ring) => ring.write_segments(length),
        }
    }
}

/// How the slot's transfer is being moved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TransferMode {
    Idle,
    /// Packets copied through the endpoint FIFO by the CPU.
    Fifo,
    /// One DMA chain covering the whole transfer.
    Dma(DescriptorChain),
}

pub(crate) struct TransferSlot<'a> {
    source: MapCell<TransferSource<'a>>,
    mode: Cell<TransferMode>,
    total_len: Cell<usize>,
    queued_len: Cell<usize>,
}

impl<'a> TransferSlot<'a> {
    pub(crate) fn new() -> TransferSlot<'a> {
        TransferSlot {
            source: MapCell::empty(),
            mode: Cell::new(TransferMode::Idle),
            total_len: Cell::new(0),
            queued_len: Cell::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.mode.get() != TransferMode::Idle
    }

    pub(crate) fn mode(&self) -> TransferMode {
        self.mode.get()
    }

    pub(crate) fn start(&self, source: TransferSource<'a>, total_len: usize, mode: TransferMode) {
        self.source.put(source);
        self.total_len.set(total_len);
        self.queued_len.set(0);
        self.mode.set(mode);
    }

    /// `(queued_len, total_len)` of the active transfer.
    pub(crate) fn progress(&self) -> Option<(usize, usize)> {
        self.is_active()
            .then(|| (self.queued_len.get(), self.total_len.get()))
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queued_len.get()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.total_len.get() - self.queued_len.get()
    }

    /// Account for `n` more bytes handed to or taken from the hardware.
    /// Never moves past `total_len`.
    pub(crate) fn advance(&self, n: usize) -> usize {
        let n = core::cmp::min(n, self.remaining());
        self.queued_len.set(self.queued_len.get() + n);
        n
    }

    /// Run `f` on the active source.
    pub(crate) fn with_source<R, F: FnOnce(&mut TransferSource<'a>) -> R>(&self, f: F) -> Option<R> {
        self.source.map(f)
    }

    /// Clear the slot, returning the source and the bytes moved.
    pub(crate) fn finish(&self) -> Option<(TransferSource<'a>, usize)> {
        self.mode.set(TransferMode::Idle);
        let queued = self.queued_len.get();
        self.total_len.set(0);
        self.queued_len.set(0);
        self.source.take().map(|source| (source, queued))
    }
}
