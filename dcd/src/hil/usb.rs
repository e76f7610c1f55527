// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface to a USB device controller.
//!
//! The upper stack drives the controller through [`UsbController`] and
//! receives everything that happens on the bus through [`Client`]. All
//! `Client` callbacks are made from the controller's interrupt handler.

use crate::endpoint::{EndpointDescriptor, EndpointHandle};
use crate::transfer::TransferSource;
use crate::ErrorCode;

/// USB transfer type, with the `bmAttributes` encoding of an endpoint
/// descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl TransferType {
    /// Decode the low two bits of an endpoint descriptor's `bmAttributes`.
    pub fn from_attributes(attributes: u8) -> TransferType {
        match attributes & 0b11 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// Data direction, seen from the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out = 0,
    /// Device to host
    In = 1,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceSpeed {
    Low,
    Full,
    High,
}

/// Bus conditions reported through [`Client::bus_signal`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusSignal {
    Suspend,
    Resume,
    StartOfFrame,
}

/// How a transfer ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferResult {
    /// All requested bytes were moved.
    Success,
    /// The host ended an OUT transfer early with a short packet.
    ShortPacket,
    /// The transfer was dropped by `close`, a stall, a new SETUP packet, a
    /// bus reset or a disconnect.
    Cancelled,
}

/// Receiver of controller events.
///
/// Every accepted `submit` is answered by exactly one
/// `transfer_complete`, which also hands the transfer's buffer or ring back.
pub trait Client<'a> {
    /// An 8-byte SETUP packet arrived on endpoint 0.
    fn setup_received(&self, setup: [u8; 8]);

    /// A transfer finished. `length` is the number of bytes moved.
    fn transfer_complete(
        &self,
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
        result: TransferResult,
    );

    /// The host reset the bus. All endpoints but 0 are closed.
    fn bus_reset(&self, speed: DeviceSpeed);

    fn bus_signal(&self, signal: BusSignal);

    /// The controller failed in a way that needs a new `init()`.
    fn controller_error(&self, error: ErrorCode);
}

/// Call surface of a USB device controller.
pub trait UsbController<'a> {
    fn set_client(&self, client: &'a dyn Client<'a>);

    /// Bring the controller up in device mode. Fails with `NODEVICE` if the
    /// controller clock never becomes usable.
    fn init(&self) -> Result<(), ErrorCode>;

    /// Attach to the bus (enable the D+/D- pull-up).
    fn connect(&self) -> Result<(), ErrorCode>;

    /// Detach from the bus, cancelling every transfer.
    fn disconnect(&self);

    /// Latch the address from a SET_ADDRESS request and queue its status
    /// stage. The address takes effect once the status stage completes.
    fn set_address(&self, address: u8) -> Result<(), ErrorCode>;

    fn open(&self, descriptor: &EndpointDescriptor) -> Result<EndpointHandle, ErrorCode>;

    /// Disable an endpoint. An active transfer on it is reported as
    /// `Cancelled` before this returns.
    fn close(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode>;

    /// Start moving `length` bytes through `endpoint`. On error the source is
    /// handed back untouched.
    fn submit(
        &self,
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
    ) -> Result<(), (ErrorCode, TransferSource<'a>)>;

    fn stall(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode>;

    /// Clear a stall and reset the data toggle to DATA0.
    fn clear_stall(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode>;

    /// Signal resume upstream. Only valid while the bus is suspended.
    fn remote_wakeup(&self) -> Result<(), ErrorCode>;

    /// Handle for one direction of endpoint 0, valid from the most recent bus
    /// reset on.
    fn control_endpoint(&self, direction: Direction) -> Option<EndpointHandle>;
}
