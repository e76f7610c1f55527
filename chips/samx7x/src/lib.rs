// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USB device controller backend for the Microchip SAM E70/S70/V70/V71
//! (SAMx7x) USBHS peripheral.
//!
//! A board wires it up like this:
//!
//! ```rust,ignore
//! let usbhs = static_init!(
//!     samx7x::usbhs::Usbhs,
//!     samx7x::usbhs::Usbhs::new(samx7x::usbhs::SpeedConfig::Normal)
//! );
//! let dcd = static_init!(
//!     dcd::Dcd<'static, samx7x::usbhs::Usbhs>,
//!     dcd::Dcd::new(usbhs)
//! );
//! dcd.set_client(stack);
//! dcd.init()?;
//! ```
//!
//! and calls `dcd.handle_interrupt()` from the USBHS interrupt handler.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod cache;
pub mod usbhs;
