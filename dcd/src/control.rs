// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Endpoint 0 control transfer sequencing.
//!
//! ```text
//!            SETUP                data submit
//!   Idle ──────────▶ SetupReceived ─────────▶ DataStage(dir)
//!    ▲                   │  status ZLP submit     │ wLength moved, short
//!    │                   ▼                        ▼ packet, or status submit
//!    └──── status done ── StatusStage ◀───────────┘
//!
//!   any state ── stall(ep0) ──▶ Stalled ── SETUP ──▶ SetupReceived
//! ```
//!
//! The data stage is over once `wLength` bytes have moved or a transfer in
//! the data direction ended short. A new SETUP is accepted in every state
//! and aborts whatever control transfer was running.

use core::cell::Cell;

use crate::hil::usb::Direction;
use crate::setup::SetupData;
use crate::utilities::cells::OptionalCell;
use crate::ErrorCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CtrlState {
    Idle,
    SetupReceived,
    DataStage(Direction),
    StatusStage,
    Stalled,
}

pub(crate) struct ControlPipe {
    state: Cell<CtrlState>,
    setup: OptionalCell<SetupData>,
    /// Bytes moved by completed data stage transfers.
    data_moved: Cell<usize>,
    pending_address: OptionalCell<u8>,
}

impl ControlPipe {
    pub(crate) fn new() -> ControlPipe {
        ControlPipe {
            state: Cell::new(CtrlState::Idle),
            setup: OptionalCell::empty(),
            data_moved: Cell::new(0),
            pending_address: OptionalCell::empty(),
        }
    }

    pub(crate) fn state(&self) -> CtrlState {
        self.state.get()
    }

    /// Latch a new SETUP packet, dropping any address waiting on the
    /// previous request's status stage.
    pub(crate) fn setup_received(&self, setup: SetupData) {
        self.setup.set(setup);
        self.data_moved.set(0);
        self.pending_address.clear();
        self.state.set(CtrlState::SetupReceived);
    }

    /// Direction of the status stage for the latched request.
    pub(crate) fn status_direction(&self) -> Direction {
        self.setup
            .map_or(Direction::In, |setup| setup.status_direction())
    }

    /// Check an endpoint 0 submit against the protocol and move to the stage
    /// it starts.
    pub(crate) fn check_submit(&self, direction: Direction, length: usize) -> Result<(), ErrorCode> {
        let setup = self.setup.get().ok_or(ErrorCode::INVAL)?;
        let is_data = setup.data_direction() == Some(direction);
        let is_status = direction == setup.status_direction() && length == 0;

        let next = match self.state.get() {
            CtrlState::SetupReceived if is_data => CtrlState::DataStage(direction),
            CtrlState::DataStage(latched) if latched == direction => CtrlState::DataStage(latched),
            CtrlState::SetupReceived | CtrlState::DataStage(_) | CtrlState::StatusStage
                if is_status =>
            {
                CtrlState::StatusStage
            }
            _ => return Err(ErrorCode::INVAL),
        };
        if is_data && self.data_moved.get() + length > setup.length as usize {
            // More than the host asked for.
            return Err(ErrorCode::SIZE);
        }
        self.state.set(next);
        Ok(())
    }

    /// Record the end of an endpoint 0 transfer that moved `length` bytes,
    /// `short` if it ended on a short or zero-length packet. Returns whether
    /// it finished the status stage.
    pub(crate) fn transfer_completed(&self, direction: Direction, length: usize, short: bool) -> bool {
        match self.state.get() {
            CtrlState::DataStage(data) if data == direction => {
                let moved = self.data_moved.get() + length;
                self.data_moved.set(moved);
                let expected = self.setup.map_or(0, |setup| setup.length as usize);
                if short || moved >= expected {
                    self.state.set(CtrlState::StatusStage);
                }
                false
            }
            CtrlState::StatusStage if direction == self.status_direction() => {
                self.state.set(CtrlState::Idle);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn stall(&self) {
        self.pending_address.clear();
        self.state.set(CtrlState::Stalled);
    }

    pub(crate) fn reset(&self) {
        self.state.set(CtrlState::Idle);
        self.setup.clear();
        self.data_moved.set(0);
        self.pending_address.clear();
    }

    pub(crate) fn set_pending_address(&self, address: u8) {
        self.pending_address.set(address);
    }

    pub(crate) fn take_pending_address(&self) -> Option<u8> {
        self.pending_address.take()
    }
}
