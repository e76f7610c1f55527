// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Debug output for the driver.
//!
//! A board registers an [`IoWrite`] sink once during setup with
//! [`set_debug_writer`]. After that the [`debug!`](crate::debug!) macro
//! formats one line, prefixed with the source location, into the sink.
//! Without a registered sink the macro does nothing, so tracing can be left
//! in interrupt paths.
//!
//! This module also holds the helpers used to print hardware status words in
//! traces.

use core::fmt::{self, Arguments, Write};

use crate::utilities::cells::OptionalCell;

/// Byte sink used for debug output, usually a polled UART or RTT channel.
pub trait IoWrite {
    /// Write `buf` out, returning the number of bytes that were taken.
    fn write(&self, buf: &[u8]) -> usize;
}

struct DebugWriterSlot(OptionalCell<&'static dyn IoWrite>);

// Written once in board setup before the controller interrupt is enabled,
// only read afterwards.
unsafe impl Sync for DebugWriterSlot {}

static DEBUG_WRITER: DebugWriterSlot = DebugWriterSlot(OptionalCell::empty());

/// Register the sink used by `debug!`.
///
/// # Safety
///
/// Must be called before any driver interrupt is enabled, and not
/// concurrently with any use of `debug!`.
pub unsafe fn set_debug_writer(writer: &'static dyn IoWrite) {
    DEBUG_WRITER.0.set(writer);
}

struct DebugWriter {
    sink: &'static dyn IoWrite,
}

impl Write for DebugWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            let written = self.sink.write(bytes);
            if written == 0 {
                return Err(fmt::Error);
            }
            bytes = &bytes[written.min(bytes.len())..];
        }
        Ok(())
    }
}

pub fn begin_debug_fmt(args: Arguments, file_line: &(&'static str, u32)) {
    if let Some(sink) = DEBUG_WRITER.0.get() {
        let mut writer = DebugWriter { sink };
        let (file, line) = *file_line;
        let _ = writer.write_fmt(format_args!("DCD_DEBUG: {}:{}: ", file, line));
        let _ = writer.write_fmt(args);
        let _ = writer.write_str("\r\n");
    }
}

pub fn begin_debug(msg: &str, file_line: &(&'static str, u32)) {
    begin_debug_fmt(format_args!("{}", msg), file_line);
}

/// In-driver debugging tool.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::begin_debug($msg, {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::begin_debug_fmt(format_args!($fmt, $($arg)+), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
}

/// Report a client that broke the driver contract, as observed from
/// interrupt context where there is no caller to return an error to.
macro_rules! client_err {
    [ $( $arg:expr ),+ ] => {
        debug!($( $arg ),+)
    };
}

/// Hex dump of a short byte buffer, used to trace SETUP packets.
pub struct HexBuf<'a>(pub &'a [u8]);

impl fmt::Debug for HexBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, b) in self.0.iter().enumerate() {
            write!(f, "{}{:02x}", if i > 0 { " " } else { "" }, b)?;
        }
        write!(f, "]")
    }
}

macro_rules! debug_flags {
    ( $tyname:ident {$( $flag:ident = $offset:expr; )*} ) => {

        pub struct $tyname(pub u32);

        impl fmt::Debug for $tyname {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let w: u32 = self.0;
                write!(f, "{{")?;
                $(
                    if w & (1 << $offset) != 0 {
                        write!(f, "{} ", stringify!($flag))?;
                    }
                )*
                write!(f, "}}")
            }
        }
    };
}

debug_flags!(DeviceInterruptFlags {
    SUSP = 0;
    MSOF = 1;
    SOF = 2;
    EORST = 3;
    WAKEUP = 4;
    EORSM = 5;
    UPRSM = 6;
    PEP0 = 12;
    PEP1 = 13;
    PEP2 = 14;
    PEP3 = 15;
    PEP4 = 16;
    PEP5 = 17;
    PEP6 = 18;
    PEP7 = 19;
    PEP8 = 20;
    PEP9 = 21;
    DMA1 = 25;
    DMA2 = 26;
    DMA3 = 27;
    DMA4 = 28;
    DMA5 = 29;
    DMA6 = 30;
    DMA7 = 31;
});

/// Endpoint status word with the byte count and control direction decoded.
pub struct EndpointStatusFlags(pub u32);

impl fmt::Debug for EndpointStatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(u32, &str); 8] = [
            (0, "TXIN"),
            (1, "RXOUT"),
            (2, "RXSTP"),
            (3, "NAKOUT"),
            (4, "NAKIN"),
            (5, "OVERF"),
            (6, "STALLED"),
            (7, "SHORTPACKET"),
        ];
        let w: u32 = self.0;
        write!(f, "{{")?;
        for (bit, name) in NAMES {
            if w & (1 << bit) != 0 {
                write!(f, "{} ", name)?;
            }
        }
        write!(f, "NBUSYBK={} ", (w >> 12) & 0x3)?;
        write!(f, "BYCT={} ", (w >> 20) & 0x7ff)?;
        write!(f, "CTRLDIR={}", if w & (1 << 17) != 0 { "IN" } else { "OUT" })?;
        write!(f, "}}")
    }
}
