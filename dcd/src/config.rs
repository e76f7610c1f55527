// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options of the
//! driver.
//!
//! Options are plain values in a `const` object rather than `#[cfg]` gates,
//! so every code path is type-checked even when the option is off, and the
//! compiler folds the disabled branches away.

/// Compile-time configuration options.
///
/// Boolean options are selected with the cargo feature of the same name on
/// the `dcd` crate.
pub(crate) struct Config {
    /// Print a debug line for every transfer submission, packet and
    /// completion.
    pub(crate) trace_transfers: bool,

    /// Print a debug line for every bus reset, suspend and resume.
    pub(crate) trace_bus: bool,

    /// Enable the start-of-frame interrupt and report it as
    /// `BusSignal::StartOfFrame`.
    ///
    /// Off by default: the interrupt fires every millisecond (every 125us
    /// at high speed) and most stacks have no use for it.
    pub(crate) sof_events: bool,

    /// Give bulk and isochronous endpoints two banks when the hardware
    /// allows it.
    ///
    /// Double buffering lets the CPU refill one bank while the other is on
    /// the wire, at the cost of twice the FIFO memory. Controllers with a
    /// small packet memory may want this off at high speed.
    pub(crate) dual_bank: bool,

    /// Max packet size endpoint 0 is (re)opened with after every bus reset.
    pub(crate) ep0_max_packet_size: u16,

    /// How many times the clock-usable flag is polled before the controller
    /// is declared unresponsive.
    pub(crate) clock_poll_limit: usize,
}

/// A unique instance of `Config` where compile-time configuration options
/// are defined.
pub(crate) const CONFIG: Config = Config {
    trace_transfers: cfg!(feature = "trace_transfers"),
    trace_bus: cfg!(feature = "trace_bus"),
    sof_events: cfg!(feature = "sof_events"),
    dual_bank: !cfg!(feature = "no_dual_bank"),
    ep0_max_packet_size: 64,
    clock_poll_limit: 10_000,
};
