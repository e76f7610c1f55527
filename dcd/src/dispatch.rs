// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interrupt decoding.
//!
//! The device status is read once per call and masked with the enabled
//! sources. Reset and wakeup run first so that a reset seen together with a
//! stale endpoint interrupt closes the endpoint before the endpoint is looked
//! at. Reset wins over wakeup, and wakeup over suspend.
//! Endpoints follow in ascending order, SETUP before OUT before IN within an
//! endpoint, then DMA channels. Suspend comes last: it gates the clock, and
//! endpoint registers are not readable after that. Every branch acknowledges
//! only the flags it handled.

use crate::config::CONFIG;
use crate::control::CtrlState;
use crate::debug::{DeviceInterruptFlags, EndpointStatusFlags};
use crate::engine::Dcd;
use crate::hil::usb::Direction;
use crate::registers::{
    all_endpoint_interrupts, ControllerRegisters, DeviceInterrupts, EndpointInterrupts,
    DEVICE_INTERRUPT, ENDPOINT_INTERRUPT,
};
use crate::setup::SetupData;
use crate::{NUM_DMA_CHANNELS, NUM_ENDPOINTS};

impl<R: ControllerRegisters> Dcd<'_, R> {
    /// Service the controller interrupt.
    pub fn handle_interrupt(&self) {
        let registers = self.registers;
        let irqs = DeviceInterrupts::new(
            registers.device_interrupts().get() & registers.device_interrupts_enabled().get(),
        );
        if CONFIG.trace_bus {
            debug!("irq {:?}", DeviceInterruptFlags(irqs.get()));
        }

        // Each of these acknowledges the flags the others react to, so only
        // the first one pending in the snapshot runs.
        let suspend = if irqs.is_set(DEVICE_INTERRUPT::EORST) {
            self.handle_reset();
            false
        } else if irqs.is_set(DEVICE_INTERRUPT::WAKEUP) {
            self.handle_wakeup();
            false
        } else {
            irqs.is_set(DEVICE_INTERRUPT::SUSP)
        };
        if irqs.is_set(DEVICE_INTERRUPT::SOF) {
            self.handle_sof();
        }
        if !self.controller_alive() {
            return;
        }

        if registers.clock_usable() {
            self.handle_transfers(irqs);
        } else if CONFIG.trace_bus {
            debug!("clock gated, endpoint events left pending");
        }

        if suspend {
            self.handle_suspend();
        }
    }

    fn handle_transfers(&self, irqs: DeviceInterrupts) {
        let endpoints = irqs.read(DEVICE_INTERRUPT::PEP);
        let count = core::cmp::min(self.registers.endpoint_count(), NUM_ENDPOINTS);
        for ep in 0..count {
            if endpoints & (1 << ep) != 0 {
                self.handle_endpoint(ep);
            }
        }

        let channels = irqs.read(DEVICE_INTERRUPT::DMA);
        for channel in 0..NUM_DMA_CHANNELS {
            if channels & (1 << channel) != 0 {
                self.dma_complete(channel + 1);
            }
        }
    }

    /// Pending and enabled endpoint interrupt sources of `ep`.
    fn endpoint_events(&self, ep: usize) -> EndpointInterrupts {
        let registers = self.registers;
        let status = registers.endpoint_status(ep);
        if CONFIG.trace_transfers {
            debug!("EP{} {:?}", ep, EndpointStatusFlags(status.get()));
        }
        EndpointInterrupts::new(
            status.get() & registers.endpoint_interrupts_enabled(ep).get() & 0xff,
        )
    }

    fn handle_endpoint(&self, ep: usize) {
        if !self.endpoints.number_in_use(ep) {
            // Leftover from an endpoint that was closed or reset.
            self.registers
                .disable_endpoint_interrupts(ep, all_endpoint_interrupts());
            return;
        }

        let mut events = self.endpoint_events(ep);
        if ep == 0 && events.is_set(ENDPOINT_INTERRUPT::RXSTP) {
            self.handle_setup();
            // The client may have queued the data stage from the setup
            // callback, which changes what is pending.
            events = self.endpoint_events(0);
            events.modify(ENDPOINT_INTERRUPT::RXSTP::CLEAR);
        }
        if events.is_set(ENDPOINT_INTERRUPT::RXOUT) {
            self.continue_out(ep);
        }
        if events.is_set(ENDPOINT_INTERRUPT::TXIN) {
            self.continue_in(ep);
        }
    }

    fn handle_setup(&self) {
        let registers = self.registers;
        let count = registers.read_byte_count(0);
        if count != 8 {
            registers.acknowledge_endpoint_interrupts(0, ENDPOINT_INTERRUPT::RXSTP::SET);
            client_err!("SETUP with {} bytes dropped", count);
            return;
        }
        let mut packet = [0u8; 8];
        registers.read_fifo(0, 0, &mut packet);
        registers.acknowledge_endpoint_interrupts(0, ENDPOINT_INTERRUPT::RXSTP::SET);
        let Some(setup) = SetupData::get(&packet) else {
            return;
        };

        // A new SETUP ends whatever control transfer was running.
        self.cancel(0, Direction::In);
        self.cancel(0, Direction::Out);
        if self.control.state() == CtrlState::Stalled {
            registers.clear_stall(0, Direction::Out);
        }
        self.control.setup_received(setup);
        self.emitter.setup_received(packet);
    }
}
