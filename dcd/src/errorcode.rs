// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Standard error enum for driver operations.

use core::fmt;

/// Errors returned by the device-controller driver.
///
/// Every fallible call on the driver returns `Result<_, ErrorCode>`. The
/// numeric values follow the Tock error numbering so they can be passed
/// through a `usize` return register unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 1,
    /// A transfer is already active on this endpoint and direction
    BUSY = 2,
    /// The host already ended the transfer before it could be armed
    ALREADY = 3,
    /// The controller is not initialized, not attached, or not in a state
    /// where the operation makes sense
    OFF = 4,
    /// The handle does not name an open endpoint
    RESERVE = 5,
    /// The endpoint number cannot take the requested direction, type or size
    INVAL = 6,
    /// Transfer length does not fit the supplied buffer or ring
    SIZE = 7,
    /// Operation canceled by a call
    CANCEL = 8,
    /// No FIFO or bank memory left for the endpoint
    NOMEM = 9,
    /// Operation or command is unsupported
    NOSUPPORT = 10,
    /// The controller stopped responding during bring-up
    NODEVICE = 11,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

impl From<ErrorCode> for Result<(), ErrorCode> {
    fn from(ec: ErrorCode) -> Self {
        Err(ec)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorCode::FAIL => "generic failure",
            ErrorCode::BUSY => "transfer already active",
            ErrorCode::ALREADY => "transfer ended by host",
            ErrorCode::OFF => "controller not ready",
            ErrorCode::RESERVE => "endpoint not open",
            ErrorCode::INVAL => "invalid endpoint configuration",
            ErrorCode::SIZE => "length out of range",
            ErrorCode::CANCEL => "canceled",
            ErrorCode::NOMEM => "endpoint memory exhausted",
            ErrorCode::NOSUPPORT => "unsupported",
            ErrorCode::NODEVICE => "controller unresponsive",
        };
        f.write_str(name)
    }
}
