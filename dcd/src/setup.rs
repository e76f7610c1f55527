// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! SETUP packet layout.
//!
//! The driver reads only the direction and length of a request. Everything
//! else is decoded here for traces and for the upper stack's convenience.

use core::fmt;

use crate::hil::usb::Direction;

/// The data structure sent in a SETUP handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetupData {
    pub request_type: DeviceRequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupData {
    /// Create a `SetupData` structure from a packet received from the wire.
    ///
    /// Returns `None` unless the packet is exactly 8 bytes.
    pub fn get(p: &[u8]) -> Option<Self> {
        if p.len() != 8 {
            return None;
        }
        Some(SetupData {
            request_type: DeviceRequestType(p[0]),
            request_code: p[1],
            value: get_u16(p[2], p[3]),
            index: get_u16(p[4], p[5]),
            length: get_u16(p[6], p[7]),
        })
    }

    /// Direction of the data stage, if the request has one.
    pub fn data_direction(&self) -> Option<Direction> {
        if self.length == 0 {
            None
        } else {
            Some(self.request_type.transfer_direction())
        }
    }

    /// Direction of the status stage: opposite to the data stage, IN when
    /// there is no data stage.
    pub fn status_direction(&self) -> Direction {
        match self.data_direction() {
            Some(direction) => direction.opposite(),
            None => Direction::In,
        }
    }

    /// Whether this is a standard SET_ADDRESS request.
    pub fn is_set_address(&self) -> bool {
        matches!(self.request_type.request_type(), RequestType::Standard)
            && matches!(self.request_type.recipient(), Recipient::Device)
            && self.request_code == 5
    }
}

/// `bmRequestType` field of a SETUP packet.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceRequestType(u8);

impl DeviceRequestType {
    pub fn transfer_direction(self) -> Direction {
        match self.0 & (1 << 7) {
            0 => Direction::Out,
            _ => Direction::In,
        }
    }

    pub fn request_type(self) -> RequestType {
        match (self.0 & (0b11 << 5)) >> 5 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

impl fmt::Debug for DeviceRequestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{{:?}, {:?}, {:?}}}",
            self.transfer_direction(),
            self.request_type(),
            self.recipient()
        )
    }
}

#[derive(Debug)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Debug)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

fn get_u16(b0: u8, b1: u8) -> u16 {
    (b0 as u16) | ((b1 as u16) << 8)
}
