// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USB device controller driver core.
//!
//! This crate holds the backend-independent part of a USB device controller
//! driver: endpoint configuration, transfer sequencing through the FIFO or
//! through DMA descriptor chains, the endpoint 0 control state machine, and
//! bus reset, suspend and wakeup handling. It drives a controller through
//! the [`registers::ControllerRegisters`] trait, implemented per chip, and
//! reports to an upper USB stack through [`hil::usb::Client`].
//!
//! A board creates the chip's register backend, wraps it in a [`Dcd`],
//! registers a client, and calls [`Dcd::handle_interrupt`] from the
//! controller's interrupt service path.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
pub mod debug;

pub mod collections;
pub mod control;
pub mod dma;
pub mod endpoint;
pub mod errorcode;
pub mod event;
pub mod hil;
pub mod registers;
pub mod setup;
pub mod transfer;
pub mod utilities;

mod bus;
mod config;
mod dispatch;
mod engine;

#[cfg(test)]
mod mock;

pub use crate::bus::BusState;
pub use crate::engine::Dcd;
pub use crate::errorcode::ErrorCode;

/// Endpoint numbers the driver can track.
pub const NUM_ENDPOINTS: usize = 10;

/// DMA channels, serving endpoints 1 to 7.
pub const NUM_DMA_CHANNELS: usize = 7;
