// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Endpoint descriptors, configurations and the table of open endpoints.

use core::cell::Cell;

use crate::hil::usb::{Direction, TransferType};
use crate::ErrorCode;
use crate::NUM_ENDPOINTS;

/// `bEndpointAddress`: endpoint number in the low nibble, direction in bit 7.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    pub const fn new_const(endpoint: usize, direction: Direction) -> Self {
        EndpointAddress(endpoint as u8 & 0xf | (direction as u8) << 7)
    }

    pub fn from_raw(raw: u8) -> Self {
        EndpointAddress(raw & 0x8f)
    }

    pub fn number(self) -> usize {
        (self.0 & 0xf) as usize
    }

    pub fn direction(self) -> Direction {
        match self.0 & (1 << 7) {
            0 => Direction::Out,
            _ => Direction::In,
        }
    }
}

impl core::fmt::Debug for EndpointAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "EP{}{:?}", self.number(), self.direction())
    }
}

/// What the upper stack asks for when opening an endpoint, normally taken
/// straight from the configuration descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    // Poll for device data every `interval` frames
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Parse a USB endpoint descriptor (`bDescriptorType` 5, 7 bytes).
    pub fn from_bytes(buf: &[u8]) -> Option<EndpointDescriptor> {
        if buf.len() < 7 || (buf[0] as usize) < 7 || buf[1] != 5 {
            return None;
        }
        Some(EndpointDescriptor {
            address: EndpointAddress::from_raw(buf[2]),
            transfer_type: TransferType::from_attributes(buf[3]),
            // Bits 11 and 12 carry the high-bandwidth multiplier.
            max_packet_size: (buf[4] as u16 | (buf[5] as u16) << 8) & 0x7ff,
            interval: buf[6],
        })
    }
}

/// Bank sizes the controller can allocate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointSize {
    Bytes8 = 0,
    Bytes16 = 1,
    Bytes32 = 2,
    Bytes64 = 3,
    Bytes128 = 4,
    Bytes256 = 5,
    Bytes512 = 6,
    Bytes1024 = 7,
}

impl EndpointSize {
    /// Smallest bank size that holds a `max_packet_size` packet.
    pub fn for_max_packet(max_packet_size: u16) -> Option<EndpointSize> {
        let size = match max_packet_size {
            0 => return None,
            1..=8 => EndpointSize::Bytes8,
            9..=16 => EndpointSize::Bytes16,
            17..=32 => EndpointSize::Bytes32,
            33..=64 => EndpointSize::Bytes64,
            65..=128 => EndpointSize::Bytes128,
            129..=256 => EndpointSize::Bytes256,
            257..=512 => EndpointSize::Bytes512,
            513..=1024 => EndpointSize::Bytes1024,
            _ => return None,
        };
        Some(size)
    }

    pub fn bytes(self) -> usize {
        8 << (self as usize)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BankCount {
    Single = 1,
    Double = 2,
    Triple = 3,
}

impl BankCount {
    pub fn count(self) -> usize {
        self as usize
    }
}

/// How an endpoint is programmed into the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub size: EndpointSize,
    pub banks: BankCount,
    pub direction: Direction,
    pub transfer_type: TransferType,
    /// Move data with the endpoint's DMA channel instead of FIFO copies.
    pub use_dma: bool,
    /// Additional transactions per microframe (isochronous only).
    pub transactions: u8,
}

impl EndpointConfig {
    /// Endpoint 0: control, single bank, never DMA.
    pub(crate) fn control(max_packet_size: u16) -> EndpointConfig {
        EndpointConfig {
            size: EndpointSize::for_max_packet(max_packet_size).unwrap_or(EndpointSize::Bytes64),
            banks: BankCount::Single,
            direction: Direction::Out,
            transfer_type: TransferType::Control,
            use_dma: false,
            transactions: 0,
        }
    }

    /// Configuration for a non-zero endpoint, or `INVAL` if the endpoint
    /// cannot take the descriptor.
    pub(crate) fn for_descriptor(
        descriptor: &EndpointDescriptor,
        capabilities: &EndpointCapabilities,
        dual_bank: bool,
    ) -> Result<EndpointConfig, ErrorCode> {
        let transfer_type = descriptor.transfer_type;
        if transfer_type == TransferType::Control {
            return Err(ErrorCode::INVAL);
        }
        if transfer_type == TransferType::Isochronous && !capabilities.isochronous {
            return Err(ErrorCode::INVAL);
        }
        if descriptor.max_packet_size > capabilities.max_packet_size {
            return Err(ErrorCode::INVAL);
        }
        let size = EndpointSize::for_max_packet(descriptor.max_packet_size).ok_or(ErrorCode::INVAL)?;

        let wants_two = matches!(transfer_type, TransferType::Bulk | TransferType::Isochronous);
        let banks = if dual_bank && wants_two && capabilities.max_banks >= 2 {
            BankCount::Double
        } else {
            BankCount::Single
        };

        Ok(EndpointConfig {
            size,
            banks,
            direction: descriptor.address.direction(),
            transfer_type,
            use_dma: capabilities.dma,
            transactions: if transfer_type == TransferType::Isochronous { 1 } else { 0 },
        })
    }

    /// Packet memory taken by all banks of the endpoint.
    pub fn fifo_bytes(&self) -> usize {
        self.size.bytes() * self.banks.count()
    }
}

/// What a hardware endpoint supports, reported by the backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointCapabilities {
    pub max_banks: u8,
    /// The endpoint number has a DMA channel. With both directions open,
    /// the channel stays with the direction opened first.
    pub dma: bool,
    pub isochronous: bool,
    pub max_packet_size: u16,
    /// IN and OUT of this number are separate pipes that can be open at the
    /// same time. Otherwise the number carries one direction at a time.
    pub bidirectional: bool,
}

/// Reference to one direction of an open endpoint.
///
/// Handles are only minted by the driver. Every open bumps the generation of
/// that number and direction, so a handle kept across a `close` or a bus
/// reset no longer matches and is refused with `RESERVE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointHandle {
    number: u8,
    direction: Direction,
    generation: u16,
}

impl EndpointHandle {
    pub fn number(&self) -> usize {
        self.number as usize
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct OpenEndpoint {
    pub(crate) config: EndpointConfig,
    pub(crate) max_packet_size: u16,
}

impl OpenEndpoint {
    pub(crate) fn is_control(&self) -> bool {
        self.config.transfer_type == TransferType::Control
    }
}

/// Open endpoints, one entry per number and direction. The control
/// endpoint fills both entries of its number.
pub(crate) struct EndpointTable {
    entries: [[Cell<Option<OpenEndpoint>>; 2]; NUM_ENDPOINTS],
    generations: [[Cell<u16>; 2]; NUM_ENDPOINTS],
    fifo_used: Cell<usize>,
}

impl EndpointTable {
    pub(crate) fn new() -> EndpointTable {
        EndpointTable {
            entries: core::array::from_fn(|_| [Cell::new(None), Cell::new(None)]),
            generations: core::array::from_fn(|_| [Cell::new(0), Cell::new(0)]),
            fifo_used: Cell::new(0),
        }
    }

    pub(crate) fn get(&self, ep: usize, direction: Direction) -> Option<OpenEndpoint> {
        self.entries
            .get(ep)
            .and_then(|sides| sides[direction.index()].get())
    }

    pub(crate) fn is_open(&self, ep: usize, direction: Direction) -> bool {
        self.get(ep, direction).is_some()
    }

    /// Whether either direction of `ep` is open.
    pub(crate) fn number_in_use(&self, ep: usize) -> bool {
        self.is_open(ep, Direction::Out) || self.is_open(ep, Direction::In)
    }

    /// Resolve a handle to its endpoint, or `RESERVE` if it is out of range,
    /// closed or stale.
    pub(crate) fn lookup(&self, handle: EndpointHandle) -> Result<(usize, OpenEndpoint), ErrorCode> {
        let ep = handle.number();
        let direction = handle.direction();
        let entry = self.get(ep, direction).ok_or(ErrorCode::RESERVE)?;
        if self.generations[ep][direction.index()].get() != handle.generation {
            return Err(ErrorCode::RESERVE);
        }
        Ok((ep, entry))
    }

    /// Handle for `direction` of an open endpoint.
    pub(crate) fn handle(&self, ep: usize, direction: Direction) -> Option<EndpointHandle> {
        self.get(ep, direction)?;
        Some(EndpointHandle {
            number: ep as u8,
            direction,
            generation: self.generations[ep][direction.index()].get(),
        })
    }

    /// Record `ep` as open in the direction of `config` (both, for a
    /// control endpoint) and account for its packet memory. Fails with
    /// `NOMEM`, leaving the table untouched, if the memory is not there.
    pub(crate) fn insert(
        &self,
        ep: usize,
        config: EndpointConfig,
        max_packet_size: u16,
        capacity: usize,
    ) -> Result<(), ErrorCode> {
        if ep >= NUM_ENDPOINTS {
            return Err(ErrorCode::INVAL);
        }
        let needed = config.fifo_bytes();
        let used = self.fifo_used.get();
        if used + needed > capacity {
            return Err(ErrorCode::NOMEM);
        }
        self.fifo_used.set(used + needed);
        let entry = OpenEndpoint {
            config,
            max_packet_size,
        };
        for direction in Self::sides(&config) {
            let generation = &self.generations[ep][direction.index()];
            generation.set(generation.get().wrapping_add(1));
            self.entries[ep][direction.index()].set(Some(entry));
        }
        Ok(())
    }

    /// Forget `direction` of `ep` (both, for a control endpoint) and give
    /// its packet memory back.
    pub(crate) fn remove(&self, ep: usize, direction: Direction) -> Option<OpenEndpoint> {
        let entry = self.entries.get(ep)?[direction.index()].take()?;
        if entry.is_control() {
            self.entries[ep][direction.opposite().index()].set(None);
        }
        self.fifo_used
            .set(self.fifo_used.get().saturating_sub(entry.config.fifo_bytes()));
        Some(entry)
    }

    pub(crate) fn fifo_used(&self) -> usize {
        self.fifo_used.get()
    }

    fn sides(config: &EndpointConfig) -> &'static [Direction] {
        if config.transfer_type == TransferType::Control {
            &[Direction::Out, Direction::In]
        } else {
            match config.direction {
                Direction::Out => &[Direction::Out],
                Direction::In => &[Direction::In],
            }
        }
    }
}
