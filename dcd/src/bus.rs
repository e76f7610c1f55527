// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Bus reset, suspend and wakeup handling.
//!
//! The controller's registers are only defined while its clock runs, so
//! every handler here ungates the clock first. Suspend gates it again unless
//! a DMA transfer still needs it.

use crate::config::CONFIG;
use crate::endpoint::EndpointConfig;
use crate::engine::Dcd;
use crate::hil::usb::{BusSignal, Direction};
use crate::registers::{
    all_device_interrupts, ControllerRegisters, DEVICE_INTERRUPT, ENDPOINT_INTERRUPT,
};
use crate::ErrorCode;

/// Unfreeze attempts before the controller is declared unresponsive.
const CLOCK_ATTEMPTS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Reset,
    Active,
    Suspended,
}

impl<R: ControllerRegisters> Dcd<'_, R> {
    /// Unfreeze the controller clock and wait for it to become usable, a
    /// bounded number of times.
    pub(crate) fn ungate_clock(&self) -> Result<(), ErrorCode> {
        let registers = self.registers;
        for _ in 0..CLOCK_ATTEMPTS {
            registers.unfreeze_clock();
            for _ in 0..CONFIG.clock_poll_limit {
                if registers.clock_usable() {
                    return Ok(());
                }
            }
        }
        Err(ErrorCode::NODEVICE)
    }

    /// Ungate the clock from interrupt context. On failure the controller is
    /// shut down and reported to the client; only `init()` brings it back.
    fn ungate_or_fail(&self) -> bool {
        match self.ungate_clock() {
            Ok(()) => true,
            Err(error) => {
                self.registers
                    .disable_device_interrupts(all_device_interrupts());
                self.abandon_all();
                self.control.reset();
                self.bus.set(BusState::Disconnected);
                self.initialized.set(false);
                self.emitter.controller_error(error);
                false
            }
        }
    }

    pub(crate) fn handle_reset(&self) {
        let registers = self.registers;
        self.bus.set(BusState::Reset);
        if !self.ungate_or_fail() {
            return;
        }

        // Everything that was open is gone, endpoint 0 included. Transfers
        // are reported as cancelled before the reset itself.
        self.shut_all_endpoints();
        self.control.reset();
        registers.clear_address();

        let ep0 = EndpointConfig::control(CONFIG.ep0_max_packet_size);
        if let Err(error) = self.configure_endpoint(0, ep0, CONFIG.ep0_max_packet_size) {
            client_err!("endpoint 0 could not be configured: {}", error);
            registers.disable_device_interrupts(all_device_interrupts());
            self.bus.set(BusState::Disconnected);
            self.initialized.set(false);
            self.emitter.controller_error(error);
            return;
        }
        registers.enable_endpoint_interrupts(0, ENDPOINT_INTERRUPT::RXSTP::SET);

        registers.acknowledge_device_interrupts(
            DEVICE_INTERRUPT::EORST::SET
                + DEVICE_INTERRUPT::WAKEUP::SET
                + DEVICE_INTERRUPT::SUSP::SET,
        );
        registers.disable_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);
        registers.enable_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);

        self.bus.set(BusState::Active);
        self.emitter.bus_reset(registers.speed());
    }

    pub(crate) fn handle_suspend(&self) {
        let registers = self.registers;
        if !self.ungate_or_fail() {
            return;
        }
        registers.acknowledge_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);
        registers.disable_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);
        registers.acknowledge_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);
        registers.enable_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);

        // FIFO transfers keep their progress in their slots; a DMA channel
        // needs the clock to finish.
        if !self.dma_in_flight() {
            registers.freeze_clock();
        } else if CONFIG.trace_bus {
            debug!("suspend with DMA in flight, clock left running");
        }

        self.bus.set(BusState::Suspended);
        self.emitter.bus_signal(BusSignal::Suspend);
    }

    pub(crate) fn handle_wakeup(&self) {
        let registers = self.registers;
        if !self.ungate_or_fail() {
            return;
        }
        registers.acknowledge_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);
        registers.disable_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);
        registers.acknowledge_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);
        registers.enable_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);

        if self.bus.get() == BusState::Suspended {
            self.bus.set(if self.endpoints.is_open(0, Direction::Out) {
                BusState::Active
            } else {
                BusState::Disconnected
            });
            self.emitter.bus_signal(BusSignal::Resume);
        }
    }

    pub(crate) fn handle_sof(&self) {
        self.registers
            .acknowledge_device_interrupts(DEVICE_INTERRUPT::SOF::SET);
        if CONFIG.sof_events {
            self.emitter.bus_signal(BusSignal::StartOfFrame);
        } else {
            self.registers
                .disable_device_interrupts(DEVICE_INTERRUPT::SOF::SET);
        }
    }

    /// Whether the last handler left the controller usable.
    pub(crate) fn controller_alive(&self) -> bool {
        self.initialized.get()
    }
}
