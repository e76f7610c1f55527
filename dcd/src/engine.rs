// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Endpoint engine: opening and closing endpoints, and starting,
//! continuing and finishing transfers.
//!
//! Every transfer lives in the slot for its endpoint and direction from
//! `submit` until exactly one `transfer_complete` is emitted for it. Slots
//! are written by `submit` (only when idle) and by the interrupt handler
//! (only when active), so the two never race.
//!
//! IN transfers through the FIFO are split into max-packet-size packets: the
//! first one is written by `submit`, the rest each time the controller
//! reports a free bank. OUT transfers arm the receive interrupt and copy
//! packets as they land until the length is reached or the host sends a
//! short packet. Endpoints whose hardware has a DMA channel move the whole
//! transfer with one descriptor chain instead.

use core::cell::Cell;
use core::cmp;

use crate::bus::BusState;
use crate::config::CONFIG;
use crate::control::{ControlPipe, CtrlState};
use crate::dma::{DescriptorChain, DmaDescriptor};
use crate::endpoint::{EndpointConfig, EndpointDescriptor, EndpointHandle, EndpointTable};
use crate::event::Emitter;
use crate::hil::usb::{Client, Direction, TransferResult, UsbController};
use crate::registers::{
    all_device_interrupts, all_endpoint_interrupts, direction_interrupts, dma_interrupt,
    endpoint_interrupt, ControllerRegisters, DEVICE_INTERRUPT, DMA_STATUS, ENDPOINT_INTERRUPT,
};
use crate::transfer::{TransferMode, TransferSlot, TransferSource};
use crate::ErrorCode;
use crate::{NUM_DMA_CHANNELS, NUM_ENDPOINTS};

/// USB device controller driver, generic over the controller backend.
pub struct Dcd<'a, R: ControllerRegisters> {
    pub(crate) registers: &'a R,
    pub(crate) endpoints: EndpointTable,
    pub(crate) transfers: [[TransferSlot<'a>; 2]; NUM_ENDPOINTS],
    pub(crate) descriptors: [DmaDescriptor; NUM_DMA_CHANNELS],
    pub(crate) control: ControlPipe,
    pub(crate) bus: Cell<BusState>,
    pub(crate) initialized: Cell<bool>,
    pub(crate) emitter: Emitter<'a>,
}

impl<'a, R: ControllerRegisters> Dcd<'a, R> {
    pub fn new(registers: &'a R) -> Dcd<'a, R> {
        Dcd {
            registers,
            endpoints: EndpointTable::new(),
            transfers: core::array::from_fn(|_| [TransferSlot::new(), TransferSlot::new()]),
            descriptors: core::array::from_fn(|_| DmaDescriptor::new()),
            control: ControlPipe::new(),
            bus: Cell::new(BusState::Disconnected),
            initialized: Cell::new(false),
            emitter: Emitter::new(),
        }
    }

    /// `(queued_len, total_len)` of the transfer active on `endpoint`.
    pub fn transfer_progress(&self, endpoint: EndpointHandle) -> Option<(usize, usize)> {
        let (ep, _) = self.endpoints.lookup(endpoint).ok()?;
        self.slot(ep, endpoint.direction()).progress()
    }

    pub fn bus_state(&self) -> BusState {
        self.bus.get()
    }

    pub fn control_state(&self) -> CtrlState {
        self.control.state()
    }

    /// Whether either direction of endpoint `number` is open.
    pub fn endpoint_is_open(&self, number: usize) -> bool {
        self.endpoints.number_in_use(number)
    }

    pub(crate) fn slot(&self, ep: usize, direction: Direction) -> &TransferSlot<'a> {
        &self.transfers[ep][direction.index()]
    }

    pub(crate) fn dma_in_flight(&self) -> bool {
        self.transfers
            .iter()
            .flatten()
            .any(|slot| matches!(slot.mode(), TransferMode::Dma(_)))
    }

    fn check_initialized(&self) -> Result<(), ErrorCode> {
        if self.initialized.get() {
            Ok(())
        } else {
            Err(ErrorCode::OFF)
        }
    }

    /// Record `ep` in the table and program it. On failure nothing stays
    /// allocated.
    pub(crate) fn configure_endpoint(
        &self,
        ep: usize,
        config: EndpointConfig,
        max_packet_size: u16,
    ) -> Result<(), ErrorCode> {
        let registers = self.registers;
        self.endpoints
            .insert(ep, config, max_packet_size, registers.fifo_capacity())?;

        let direction = config.direction;
        registers.endpoint_reset(ep, direction);
        if !registers.endpoint_configure(ep, &config) {
            registers.endpoint_disable(ep, direction);
            self.endpoints.remove(ep, direction);
            return Err(ErrorCode::NOMEM);
        }
        // New endpoints start at DATA0 and not halted.
        registers.reset_data_toggle(ep, direction);
        registers.clear_stall(ep, direction);
        registers.enable_device_interrupts(endpoint_interrupt(ep));
        Ok(())
    }

    /// Disable `direction` of `ep` and forget it, cancelling its transfer
    /// first. Closing the control endpoint closes both directions.
    pub(crate) fn shut_endpoint(&self, ep: usize, direction: Direction) {
        let registers = self.registers;
        let Some(entry) = self.endpoints.get(ep, direction) else {
            return;
        };
        if entry.is_control() {
            registers.disable_endpoint_interrupts(ep, all_endpoint_interrupts());
            self.cancel(ep, Direction::Out);
            self.cancel(ep, Direction::In);
        } else {
            registers.disable_endpoint_interrupts(ep, direction_interrupts(direction));
            self.cancel(ep, direction);
        }
        registers.endpoint_disable(ep, direction);
        self.endpoints.remove(ep, direction);
        if !self.endpoints.number_in_use(ep) {
            registers.disable_device_interrupts(endpoint_interrupt(ep));
        }
    }

    /// Shut every open endpoint, endpoint 0 included.
    pub(crate) fn shut_all_endpoints(&self) {
        for ep in 0..NUM_ENDPOINTS {
            for direction in [Direction::Out, Direction::In] {
                if self.endpoints.is_open(ep, direction) {
                    self.shut_endpoint(ep, direction);
                }
            }
        }
    }

    /// Stop the transfer on `ep`/`direction`, if any, and report it as
    /// cancelled.
    pub(crate) fn cancel(&self, ep: usize, direction: Direction) {
        let slot = self.slot(ep, direction);
        match slot.mode() {
            TransferMode::Idle => return,
            TransferMode::Dma(_) => {
                self.registers.dma_stop(ep);
                self.registers.disable_device_interrupts(dma_interrupt(ep));
            }
            TransferMode::Fifo => match direction {
                Direction::In => self
                    .registers
                    .disable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::TXIN::SET),
                Direction::Out => self.registers.disarm_rx(ep),
            },
        }
        self.finalize(ep, direction, TransferResult::Cancelled);
    }

    /// Cancel every transfer without touching the controller, for when its
    /// registers can no longer be trusted.
    pub(crate) fn abandon_all(&self) {
        for ep in 0..NUM_ENDPOINTS {
            for direction in [Direction::Out, Direction::In] {
                if self.slot(ep, direction).is_active() {
                    self.finalize(ep, direction, TransferResult::Cancelled);
                }
            }
            for direction in [Direction::Out, Direction::In] {
                self.endpoints.remove(ep, direction);
            }
        }
    }

    /// Clear the slot and emit its single completion event. For endpoint 0
    /// this also steps the control state machine, and applies a pending
    /// address once the status stage has been reported.
    pub(crate) fn finalize(&self, ep: usize, direction: Direction, result: TransferResult) {
        let Some((source, length)) = self.slot(ep, direction).finish() else {
            return;
        };
        let Some(handle) = self.endpoints.handle(ep, direction) else {
            client_err!("EP{} {:?} completed while closed", ep, direction);
            return;
        };

        let status_done = ep == 0
            && result != TransferResult::Cancelled
            && self.control.transfer_completed(
                direction,
                length,
                self.ends_short(direction, length, result),
            );

        self.emitter.transfer_complete(handle, source, length, result);

        if status_done {
            if let Some(address) = self.control.take_pending_address() {
                if CONFIG.trace_bus {
                    debug!("address {} active", address);
                }
                self.registers.set_address(address);
            }
        }
    }

    /// Whether an endpoint 0 transfer of `length` bytes ended on a short or
    /// zero-length packet.
    fn ends_short(&self, direction: Direction, length: usize, result: TransferResult) -> bool {
        let max_packet_size = self
            .endpoints
            .get(0, direction)
            .map_or(CONFIG.ep0_max_packet_size, |entry| entry.max_packet_size);
        result == TransferResult::ShortPacket
            || length == 0
            || length % cmp::max(max_packet_size as usize, 1) != 0
    }

    /// Queue the next packet of an IN transfer and send it.
    fn send_in_packet(&self, ep: usize, max_packet_size: usize) {
        let registers = self.registers;
        let slot = self.slot(ep, Direction::In);
        let queued = slot.queued_len();
        let n = cmp::min(slot.remaining(), max_packet_size);
        slot.with_source(|source| match source {
            TransferSource::Buffer(buf) => registers.write_fifo(ep, 0, &buf[queued..queued + n]),
            TransferSource::Ring(ring) => {
                ring.read_with(n, |offset, bytes| registers.write_fifo(ep, offset, bytes));
                ring.advance_read(n);
            }
        });
        slot.advance(n);
        if CONFIG.trace_transfers {
            debug!("EP{} IN packet {} bytes, {} left", ep, n, slot.remaining());
        }
        registers.acknowledge_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::TXIN::SET);
        registers.release_bank(ep);
    }

    /// A bank of `ep` is free for IN data.
    pub(crate) fn continue_in(&self, ep: usize) {
        let slot = self.slot(ep, Direction::In);
        if slot.mode() != TransferMode::Fifo {
            self.registers
                .disable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::TXIN::SET);
            return;
        }
        let Some(entry) = self.endpoints.get(ep, Direction::In) else {
            return;
        };
        if slot.remaining() == 0 {
            // The last packet left the bank.
            self.registers
                .disable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::TXIN::SET);
            self.finalize(ep, Direction::In, TransferResult::Success);
        } else {
            self.send_in_packet(ep, entry.max_packet_size as usize);
        }
    }

    /// An OUT packet landed in a bank of `ep`.
    pub(crate) fn continue_out(&self, ep: usize) {
        let registers = self.registers;
        let slot = self.slot(ep, Direction::Out);
        if slot.mode() != TransferMode::Fifo {
            // Leave the packet in the bank; the host is NAKed until a
            // transfer is submitted.
            registers.disarm_rx(ep);
            return;
        }
        let Some(entry) = self.endpoints.get(ep, Direction::Out) else {
            return;
        };

        let count = registers.read_byte_count(ep);
        let queued = slot.queued_len();
        let n = cmp::min(count, slot.remaining());
        if n < count {
            client_err!("EP{} OUT: {} bytes past the end of the transfer dropped", ep, count - n);
        }
        slot.with_source(|source| match source {
            TransferSource::Buffer(buf) => registers.read_fifo(ep, 0, &mut buf[queued..queued + n]),
            TransferSource::Ring(ring) => {
                ring.write_with(n, |offset, bytes| registers.read_fifo(ep, offset, bytes));
                ring.advance_write(n);
            }
        });
        slot.advance(n);
        registers.acknowledge_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::RXOUT::SET);
        registers.release_bank(ep);

        if CONFIG.trace_transfers {
            debug!("EP{} OUT packet {} bytes, {} left", ep, count, slot.remaining());
        }

        let short = count < entry.max_packet_size as usize;
        if short || slot.remaining() == 0 {
            registers.disarm_rx(ep);
            let result = if slot.remaining() == 0 {
                TransferResult::Success
            } else {
                TransferResult::ShortPacket
            };
            self.finalize(ep, Direction::Out, result);
        }
    }

    /// The DMA channel serving `ep` raised its interrupt.
    pub(crate) fn dma_complete(&self, ep: usize) {
        let registers = self.registers;
        let status = registers.dma_status(ep);
        if status.is_set(DMA_STATUS::CHANN_ENB) {
            // Still running; the end-of-transfer flag is only final once the
            // channel has disabled itself.
            return;
        }
        registers.disable_device_interrupts(dma_interrupt(ep));

        // The channel serves whichever direction started it.
        let Some((direction, chain)) = [Direction::Out, Direction::In]
            .into_iter()
            .find_map(|direction| match self.slot(ep, direction).mode() {
                TransferMode::Dma(chain) => Some((direction, chain)),
                _ => None,
            })
        else {
            return;
        };
        let slot = self.slot(ep, direction);

        let stopped_in_wrap = chain.wrap.is_some() && registers.dma_next_descriptor(ep) == 0;
        let remaining = status.read(DMA_STATUS::BUFF_COUNT) as usize;
        let moved = chain.bytes_moved(stopped_in_wrap, remaining);
        if direction == Direction::Out {
            chain.acquire(registers.fence());
        }
        slot.with_source(|source| {
            if let TransferSource::Ring(ring) = source {
                match direction {
                    Direction::In => ring.advance_read(moved),
                    Direction::Out => ring.advance_write(moved),
                }
            }
        });
        slot.advance(moved);
        if CONFIG.trace_transfers {
            debug!("EP{} DMA done, {} bytes", ep, moved);
        }

        let result = if slot.remaining() == 0 {
            TransferResult::Success
        } else {
            TransferResult::ShortPacket
        };
        self.finalize(ep, direction, result);
    }

    fn start_dma(
        &self,
        ep: usize,
        direction: Direction,
        source: TransferSource<'a>,
        length: usize,
    ) -> Result<(), (ErrorCode, TransferSource<'a>)> {
        let registers = self.registers;
        let Some(descriptor) = ep.checked_sub(1).and_then(|ch| self.descriptors.get(ch)) else {
            return Err((ErrorCode::NOSUPPORT, source));
        };
        if direction == Direction::Out
            && registers.dma_status(ep).is_set(DMA_STATUS::END_TR_ST)
        {
            // A zero-length packet ended the transfer before it was armed.
            return Err((ErrorCode::ALREADY, source));
        }

        let mut source = source;
        let chain = source
            .region(length, direction == Direction::In)
            .ok_or(ErrorCode::SIZE)
            .and_then(|region| DescriptorChain::build(direction, &region));
        let chain = match chain {
            Ok(chain) => chain,
            Err(error) => return Err((error, source)),
        };
        self.slot(ep, direction)
            .start(source, length, TransferMode::Dma(chain));

        chain.release(registers.fence());
        registers.dma_start(ep, &chain, descriptor);
        registers.enable_device_interrupts(dma_interrupt(ep));
        if CONFIG.trace_transfers {
            debug!(
                "EP{} {:?} DMA {} bytes in {} segment(s)",
                ep,
                direction,
                length,
                if chain.wrap.is_some() { 2 } else { 1 }
            );
        }
        Ok(())
    }

    fn start_fifo(
        &self,
        ep: usize,
        direction: Direction,
        max_packet_size: u16,
        source: TransferSource<'a>,
        length: usize,
    ) {
        self.slot(ep, direction)
            .start(source, length, TransferMode::Fifo);
        match direction {
            Direction::Out => self.registers.arm_rx(ep),
            Direction::In => {
                self.send_in_packet(ep, max_packet_size as usize);
                self.registers.arm_tx(ep);
            }
        }
    }
}

impl<'a, R: ControllerRegisters> UsbController<'a> for Dcd<'a, R> {
    fn set_client(&self, client: &'a dyn Client<'a>) {
        self.emitter.set_client(client);
    }

    fn init(&self) -> Result<(), ErrorCode> {
        let registers = self.registers;
        registers.enable();
        if let Err(error) = self.ungate_clock() {
            registers.disable();
            return Err(error);
        }
        registers.disable_device_interrupts(all_device_interrupts());
        registers.acknowledge_device_interrupts(all_device_interrupts());

        self.abandon_all();
        self.control.reset();
        self.bus.set(BusState::Disconnected);
        self.initialized.set(true);
        Ok(())
    }

    fn connect(&self) -> Result<(), ErrorCode> {
        self.check_initialized()?;
        let registers = self.registers;
        let mut irqs = DEVICE_INTERRUPT::EORST::SET
            + DEVICE_INTERRUPT::SUSP::SET
            + DEVICE_INTERRUPT::WAKEUP::SET;
        if CONFIG.sof_events {
            irqs += DEVICE_INTERRUPT::SOF::SET;
        }
        registers.enable_device_interrupts(irqs);
        registers.acknowledge_device_interrupts(
            DEVICE_INTERRUPT::EORST::SET + DEVICE_INTERRUPT::SOF::SET + DEVICE_INTERRUPT::WAKEUP::SET,
        );
        // Start out suspended so that the first bus activity raises a wakeup.
        registers.raise_device_interrupts(DEVICE_INTERRUPT::SUSP::SET);
        registers.acknowledge_device_interrupts(DEVICE_INTERRUPT::WAKEUP::SET);
        registers.attach();
        registers.freeze_clock();
        Ok(())
    }

    fn disconnect(&self) {
        let registers = self.registers;
        registers.unfreeze_clock();
        self.shut_all_endpoints();
        registers.acknowledge_device_interrupts(all_device_interrupts());
        registers.disable_device_interrupts(all_device_interrupts());
        registers.detach();
        registers.clear_address();
        self.control.reset();
        self.bus.set(BusState::Disconnected);
    }

    fn set_address(&self, address: u8) -> Result<(), ErrorCode> {
        self.check_initialized()?;
        let handle = self.endpoints.handle(0, Direction::In).ok_or(ErrorCode::OFF)?;
        self.control.set_pending_address(address & 0x7f);
        // The status stage is still answered at the old address.
        self.submit(handle, TransferSource::Buffer(&mut []), 0)
            .map_err(|(error, _)| {
                self.control.take_pending_address();
                error
            })
    }

    fn open(&self, descriptor: &EndpointDescriptor) -> Result<EndpointHandle, ErrorCode> {
        self.check_initialized()?;
        if !self.endpoints.number_in_use(0) {
            // Endpoint 0 comes up with the first bus reset.
            return Err(ErrorCode::OFF);
        }
        let ep = descriptor.address.number();
        let direction = descriptor.address.direction();
        let count = cmp::min(self.registers.endpoint_count(), NUM_ENDPOINTS);
        if ep == 0 || ep >= count || self.endpoints.is_open(ep, direction) {
            return Err(ErrorCode::INVAL);
        }
        let capabilities = self.registers.endpoint_capabilities(ep);
        let other = self.endpoints.get(ep, direction.opposite());
        if other.is_some() && !capabilities.bidirectional {
            return Err(ErrorCode::INVAL);
        }
        let mut config =
            EndpointConfig::for_descriptor(descriptor, &capabilities, CONFIG.dual_bank)?;
        if other.is_some_and(|other| other.config.use_dma) {
            // One channel per number, already taken by the other direction.
            config.use_dma = false;
        }
        self.configure_endpoint(ep, config, descriptor.max_packet_size)?;
        if CONFIG.trace_transfers {
            debug!("EP{} open: {:?}", ep, config);
        }
        self.endpoints
            .handle(ep, config.direction)
            .ok_or(ErrorCode::FAIL)
    }

    fn close(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode> {
        let (ep, _) = self.endpoints.lookup(endpoint)?;
        if ep == 0 {
            return Err(ErrorCode::INVAL);
        }
        self.shut_endpoint(ep, endpoint.direction());
        Ok(())
    }

    fn submit(
        &self,
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
    ) -> Result<(), (ErrorCode, TransferSource<'a>)> {
        if let Err(error) = self.check_initialized() {
            return Err((error, source));
        }
        let (ep, entry) = match self.endpoints.lookup(endpoint) {
            Ok(found) => found,
            Err(error) => return Err((error, source)),
        };
        let direction = endpoint.direction();
        if self.slot(ep, direction).is_active() {
            return Err((ErrorCode::BUSY, source));
        }
        if !source.fits(length, direction == Direction::In) {
            return Err((ErrorCode::SIZE, source));
        }
        if ep == 0 {
            if let Err(error) = self.control.check_submit(direction, length) {
                return Err((error, source));
            }
        }
        if CONFIG.trace_transfers {
            debug!("EP{} {:?} submit {} bytes", ep, direction, length);
        }

        if entry.config.use_dma && length > 0 {
            self.start_dma(ep, direction, source, length)
        } else {
            self.start_fifo(ep, direction, entry.max_packet_size, source, length);
            Ok(())
        }
    }

    fn stall(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode> {
        self.check_initialized()?;
        let (ep, _) = self.endpoints.lookup(endpoint)?;
        self.registers.set_stall(ep, endpoint.direction());
        if ep == 0 {
            self.control.stall();
            self.cancel(0, Direction::In);
            self.cancel(0, Direction::Out);
        }
        Ok(())
    }

    fn clear_stall(&self, endpoint: EndpointHandle) -> Result<(), ErrorCode> {
        self.check_initialized()?;
        let (ep, _) = self.endpoints.lookup(endpoint)?;
        self.registers.clear_stall(ep, endpoint.direction());
        self.registers.reset_data_toggle(ep, endpoint.direction());
        if ep == 0 && self.control.state() == CtrlState::Stalled {
            self.control.reset();
        }
        Ok(())
    }

    fn remote_wakeup(&self) -> Result<(), ErrorCode> {
        self.check_initialized()?;
        if self.bus.get() != BusState::Suspended {
            return Err(ErrorCode::OFF);
        }
        self.ungate_clock()?;
        self.registers.remote_wakeup();
        Ok(())
    }

    fn control_endpoint(&self, direction: Direction) -> Option<EndpointHandle> {
        self.endpoints.handle(0, direction)
    }
}
