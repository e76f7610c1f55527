// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! DMA descriptor chains.
//!
//! A transfer that moves through a DMA channel is described by at most two
//! segments. A flat region is one `Single` segment. A ring region that
//! crosses the end of the ring storage becomes a `Linear` segment up to the
//! end, chained to a `Wrap` segment from the start of the storage. The
//! channel loads the wrap segment by itself when the linear one ends, so
//! logical completion (end of buffer, and its interrupt) always comes from
//! the wrap segment.
//!
//! Control flags are derived from the segment's role and direction only.
//! There is no way to set them individually.

use core::fmt;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::InMemoryRegister;
use tock_registers::LocalRegisterCopy;

use crate::collections::byte_ring::{RingInfo, RingSegment};
use crate::hil::usb::Direction;
use crate::registers::DMA_CONTROL;
use crate::utilities::dma_fence::DmaFence;
use crate::ErrorCode;

/// Largest number of bytes one segment can describe.
pub const MAX_SEGMENT_LEN: usize = 0xffff;

/// Position of a segment in its chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentRole {
    /// The only segment of the transfer.
    Single,
    /// First of two segments; the channel loads the next descriptor when it
    /// ends.
    Linear,
    /// Second of two segments; ends the transfer.
    Wrap,
}

/// Channel control word of one segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaControlWord {
    role: SegmentRole,
    direction: Direction,
    length: u16,
}

impl DmaControlWord {
    pub fn new(role: SegmentRole, direction: Direction, length: u16) -> DmaControlWord {
        DmaControlWord {
            role,
            direction,
            length,
        }
    }

    pub fn role(&self) -> SegmentRole {
        self.role
    }

    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Channel control register value for this segment.
    ///
    /// IN segments end on buffer end. OUT segments also end early on a
    /// short packet from the host, which is why every OUT segment enables
    /// end-of-transfer and its interrupt. A linear segment never raises the
    /// end-of-buffer interrupt; it chains to the wrap segment instead.
    pub fn to_register_bits(&self) -> LocalRegisterCopy<u32, DMA_CONTROL::Register> {
        let flags = match (self.direction, self.role) {
            (Direction::In, SegmentRole::Single) | (Direction::In, SegmentRole::Wrap) => {
                DMA_CONTROL::END_B_EN::SET + DMA_CONTROL::END_BUFFIT::SET
            }
            (Direction::In, SegmentRole::Linear) => DMA_CONTROL::LDNXT_DSC::SET,
            (Direction::Out, SegmentRole::Single) | (Direction::Out, SegmentRole::Wrap) => {
                DMA_CONTROL::END_TR_EN::SET
                    + DMA_CONTROL::END_TR_IT::SET
                    + DMA_CONTROL::END_BUFFIT::SET
            }
            (Direction::Out, SegmentRole::Linear) => {
                DMA_CONTROL::LDNXT_DSC::SET
                    + DMA_CONTROL::END_TR_EN::SET
                    + DMA_CONTROL::END_TR_IT::SET
            }
        };
        let mut word = LocalRegisterCopy::new(0);
        word.modify(
            DMA_CONTROL::CHANN_ENB::SET
                + flags
                + DMA_CONTROL::BUFF_LENGTH.val(self.length as u32),
        );
        word
    }
}

/// One contiguous region handed to a DMA channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaSegment {
    pub ptr: *mut u8,
    pub control: DmaControlWord,
}

impl DmaSegment {
    fn new(seg: RingSegment, role: SegmentRole, direction: Direction) -> Result<DmaSegment, ErrorCode> {
        if seg.len > MAX_SEGMENT_LEN {
            return Err(ErrorCode::SIZE);
        }
        Ok(DmaSegment {
            ptr: seg.ptr,
            control: DmaControlWord::new(role, direction, seg.len as u16),
        })
    }

    pub fn len(&self) -> usize {
        self.control.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_slice_ptr(&self) -> *mut [u8] {
        core::ptr::slice_from_raw_parts_mut(self.ptr, self.len())
    }
}

/// The segments of one DMA transfer, in the order the channel runs them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorChain {
    pub first: DmaSegment,
    pub wrap: Option<DmaSegment>,
}

impl DescriptorChain {
    /// Build the chain for moving `region` in `direction`. Fails with `SIZE`
    /// if a segment is longer than one descriptor can describe.
    pub fn build(direction: Direction, region: &RingInfo) -> Result<DescriptorChain, ErrorCode> {
        match region.wrap {
            Some(wrap) if wrap.len > 0 && region.linear.len > 0 => Ok(DescriptorChain {
                first: DmaSegment::new(region.linear, SegmentRole::Linear, direction)?,
                wrap: Some(DmaSegment::new(wrap, SegmentRole::Wrap, direction)?),
            }),
            // A run that starts exactly at the storage start is flat.
            Some(wrap) if region.linear.len == 0 => Ok(DescriptorChain {
                first: DmaSegment::new(wrap, SegmentRole::Single, direction)?,
                wrap: None,
            }),
            _ => Ok(DescriptorChain {
                first: DmaSegment::new(region.linear, SegmentRole::Single, direction)?,
                wrap: None,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.wrap.map_or(0, |w| w.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn segments(&self) -> impl Iterator<Item = &DmaSegment> {
        core::iter::once(&self.first).chain(self.wrap.iter())
    }

    /// Publish CPU writes to every segment before the channel is armed.
    pub fn release<F: DmaFence>(&self, fence: F) {
        for seg in self.segments() {
            fence.release(seg.as_slice_ptr());
        }
    }

    /// Make DMA writes to every segment visible after the channel stopped.
    pub fn acquire<F: DmaFence>(&self, fence: F) {
        for seg in self.segments() {
            fence.acquire(seg.as_slice_ptr());
        }
    }

    /// Bytes moved once the channel has stopped, from the remaining count of
    /// the descriptor it stopped in.
    pub fn bytes_moved(&self, stopped_in_wrap: bool, remaining: usize) -> usize {
        match self.wrap {
            Some(wrap) if stopped_in_wrap => {
                self.first.len() + wrap.len().saturating_sub(remaining)
            }
            _ => self.first.len().saturating_sub(remaining),
        }
    }
}

/// In-memory descriptor the channel fetches for the second segment of a
/// chain.
#[repr(C, align(16))]
pub struct DmaDescriptor {
    pub next: InMemoryRegister<u32>,
    pub address: InMemoryRegister<u32>,
    pub control: InMemoryRegister<u32, DMA_CONTROL::Register>,
    _padding: InMemoryRegister<u32>,
}

impl DmaDescriptor {
    pub const fn new() -> DmaDescriptor {
        DmaDescriptor {
            next: InMemoryRegister::new(0),
            address: InMemoryRegister::new(0),
            control: InMemoryRegister::new(0),
            _padding: InMemoryRegister::new(0),
        }
    }

    /// Fill in the last descriptor of a chain. `address` is the bus address
    /// of `segment`'s first byte.
    pub fn load(&self, address: u32, segment: &DmaSegment) {
        self.next.set(0);
        self.address.set(address);
        self.control.set(segment.control.to_register_bits().get());
    }

    /// The descriptor itself as a region, for cache maintenance.
    pub fn as_region(&self) -> *mut [u32] {
        core::ptr::slice_from_raw_parts_mut(self as *const DmaDescriptor as *mut u32, 4)
    }
}

impl Default for DmaDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DmaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DmaDescriptor {{ next: {:#x}, address: {:#x}, control: {:#x} }}",
            self.next.get(),
            self.address.get(),
            self.control.get()
        )
    }
}
