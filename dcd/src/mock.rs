// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Software model of a device controller for driver tests.
//!
//! The model keeps just enough state to play the host side: it queues OUT
//! and SETUP packets, holds written IN banks until the host takes them, and
//! runs DMA chains to completion on request. Endpoint interrupt lines are
//! derived from that state the way the hardware derives them, so the driver
//! sees `TXIN` while a bank is free and `RXOUT` while a packet waits.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::vec::Vec;

use tock_registers::fields::FieldValue;
use tock_registers::interfaces::Readable;

use crate::dma::{DescriptorChain, DmaDescriptor};
use crate::endpoint::{EndpointCapabilities, EndpointConfig};
use crate::hil::usb::{DeviceSpeed, Direction, TransferType};
use crate::registers::{
    direction_interrupts, ControllerRegisters, DeviceInterrupts, DmaStatus, EndpointInterrupts,
    EndpointStatus, DEVICE_INTERRUPT, DMA_STATUS, ENDPOINT_INTERRUPT, ENDPOINT_STATUS,
};
use crate::utilities::dma_fence::DmaFence;
use crate::{NUM_DMA_CHANNELS, NUM_ENDPOINTS};

std::thread_local! {
    static RELEASES: Cell<usize> = const { Cell::new(0) };
    static ACQUIRES: Cell<usize> = const { Cell::new(0) };
}

/// Counts cache maintenance calls instead of doing any.
#[derive(Copy, Clone)]
pub(crate) struct MockFence;

unsafe impl DmaFence for MockFence {
    fn release<T>(self, _buf: *mut [T]) {
        RELEASES.with(|c| c.set(c.get() + 1));
    }

    fn acquire<T>(self, _buf: *mut [T]) {
        ACQUIRES.with(|c| c.set(c.get() + 1));
    }
}

impl MockFence {
    /// `(release, acquire)` calls made on this thread so far.
    pub(crate) fn counts() -> (usize, usize) {
        (RELEASES.with(Cell::get), ACQUIRES.with(Cell::get))
    }
}

/// One endpoint number. Like a controller with separate IN and OUT pipes,
/// each direction is configured and stalled on its own.
#[derive(Default)]
struct MockEndpoint {
    config: [Cell<Option<EndpointConfig>>; 2],
    irqs_enabled: Cell<u32>,
    stalled: [Cell<bool>; 2],
    toggle_resets: Cell<usize>,
    releases: Cell<usize>,
    setup: RefCell<Option<Vec<u8>>>,
    out_queue: RefCell<VecDeque<Vec<u8>>>,
    staging: RefCell<Vec<u8>>,
    busy: RefCell<VecDeque<Vec<u8>>>,
}

#[derive(Default)]
struct MockDma {
    chain: Cell<Option<DescriptorChain>>,
    status: Cell<u32>,
    next: Cell<u32>,
    pending: Cell<bool>,
    descriptor_control: Cell<u32>,
    stops: Cell<usize>,
}

pub(crate) struct MockController {
    enabled: Cell<bool>,
    frozen: Cell<bool>,
    /// Endpoint register accesses made while the clock was frozen.
    frozen_accesses: Cell<usize>,
    clock_dead: Cell<bool>,
    attached: Cell<bool>,
    speed: Cell<DeviceSpeed>,
    address: Cell<Option<u8>>,
    wakeups: Cell<usize>,
    device_pending: Cell<u32>,
    device_enabled: Cell<u32>,
    fifo_capacity: Cell<usize>,
    fail_configure: Cell<bool>,
    dma_endpoints: Cell<u32>,
    endpoints: [MockEndpoint; NUM_ENDPOINTS],
    dma: [MockDma; NUM_DMA_CHANNELS],
}

impl MockController {
    pub(crate) fn new() -> MockController {
        MockController {
            enabled: Cell::new(false),
            frozen: Cell::new(true),
            frozen_accesses: Cell::new(0),
            clock_dead: Cell::new(false),
            attached: Cell::new(false),
            speed: Cell::new(DeviceSpeed::Full),
            address: Cell::new(None),
            wakeups: Cell::new(0),
            device_pending: Cell::new(0),
            device_enabled: Cell::new(0),
            fifo_capacity: Cell::new(4096),
            fail_configure: Cell::new(false),
            dma_endpoints: Cell::new(0),
            endpoints: Default::default(),
            dma: Default::default(),
        }
    }

    // Test controls

    pub(crate) fn set_clock_dead(&self, dead: bool) {
        self.clock_dead.set(dead);
    }

    pub(crate) fn set_fifo_capacity(&self, bytes: usize) {
        self.fifo_capacity.set(bytes);
    }

    pub(crate) fn set_fail_configure(&self, fail: bool) {
        self.fail_configure.set(fail);
    }

    /// Give endpoint `ep` a DMA channel.
    pub(crate) fn enable_dma(&self, ep: usize) {
        self.dma_endpoints.set(self.dma_endpoints.get() | 1 << ep);
    }

    /// Flag a bus event.
    pub(crate) fn raise(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.device_pending.set(self.device_pending.get() | irqs.value);
    }

    /// Host sends a SETUP packet to endpoint 0.
    pub(crate) fn host_setup(&self, packet: &[u8]) {
        *self.endpoints[0].setup.borrow_mut() = Some(packet.to_vec());
    }

    /// Host sends an OUT packet.
    pub(crate) fn host_out(&self, ep: usize, packet: &[u8]) {
        self.endpoints[ep]
            .out_queue
            .borrow_mut()
            .push_back(packet.to_vec());
    }

    /// Host reads the oldest filled IN bank.
    pub(crate) fn host_in(&self, ep: usize) -> Option<Vec<u8>> {
        self.endpoints[ep].busy.borrow_mut().pop_front()
    }

    /// Host ends an OUT transfer with a zero-length packet before any DMA
    /// is armed.
    pub(crate) fn host_zlp_before_dma(&self, ep: usize) {
        let dma = &self.dma[ep - 1];
        dma.status
            .set(dma.status.get() | DMA_STATUS::END_TR_ST::SET.value);
    }

    /// Run the armed IN chain of `ep` to its end and return what it read.
    pub(crate) fn complete_dma_in(&self, ep: usize) -> Vec<u8> {
        let dma = &self.dma[ep - 1];
        let mut data = Vec::new();
        if let Some(chain) = dma.chain.take() {
            for seg in core::iter::once(chain.first).chain(chain.wrap) {
                let bytes = unsafe { core::slice::from_raw_parts(seg.ptr, seg.len()) };
                data.extend_from_slice(bytes);
            }
        }
        dma.next.set(0);
        dma.status.set(DMA_STATUS::END_BF_ST::SET.value);
        dma.pending.set(true);
        data
    }

    /// Run the armed OUT chain of `ep` with `data` from the host. A run
    /// shorter than the chain ends it with a short packet.
    pub(crate) fn complete_dma_out(&self, ep: usize, data: &[u8]) {
        let dma = &self.dma[ep - 1];
        let Some(chain) = dma.chain.take() else {
            return;
        };
        let mut offset = 0;
        for seg in core::iter::once(chain.first).chain(chain.wrap) {
            let n = core::cmp::min(seg.len(), data.len() - offset);
            unsafe { core::ptr::copy_nonoverlapping(data[offset..].as_ptr(), seg.ptr, n) };
            offset += n;
        }

        let first = chain.first.len();
        let (next, remaining) = match chain.wrap {
            Some(wrap) if offset >= first => (0, wrap.len() - (offset - first)),
            Some(_) => (1, first - offset),
            None => (0, first - offset),
        };
        let mut status = DMA_STATUS::BUFF_COUNT.val(remaining as u32).value;
        if offset < chain.len() {
            status |= DMA_STATUS::END_TR_ST::SET.value;
        } else {
            status |= DMA_STATUS::END_BF_ST::SET.value;
        }
        dma.next.set(next);
        dma.status.set(status);
        dma.pending.set(true);
    }

    // Observations

    pub(crate) fn clock_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub(crate) fn frozen_accesses(&self) -> usize {
        self.frozen_accesses.get()
    }

    /// Count an endpoint register access. Those read back garbage while
    /// the clock is frozen.
    fn touch_endpoint(&self) {
        if self.frozen.get() {
            self.frozen_accesses.set(self.frozen_accesses.get() + 1);
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub(crate) fn wakeups(&self) -> usize {
        self.wakeups.get()
    }

    /// Whether either direction of `ep` is stalled.
    pub(crate) fn is_stalled(&self, ep: usize) -> bool {
        self.endpoints[ep].stalled.iter().any(Cell::get)
    }

    pub(crate) fn toggle_resets(&self, ep: usize) -> usize {
        self.endpoints[ep].toggle_resets.get()
    }

    /// Configuration of whichever direction of `ep` is programmed, OUT
    /// first.
    pub(crate) fn endpoint_config(&self, ep: usize) -> Option<EndpointConfig> {
        let config = &self.endpoints[ep].config;
        config[0].get().or(config[1].get())
    }

    pub(crate) fn rx_armed(&self, ep: usize) -> bool {
        self.endpoints[ep].irqs_enabled.get() & ENDPOINT_INTERRUPT::RXOUT::SET.value != 0
    }

    pub(crate) fn dma_chain(&self, ep: usize) -> Option<DescriptorChain> {
        self.dma[ep - 1].chain.get()
    }

    pub(crate) fn dma_descriptor_control(&self, ep: usize) -> u32 {
        self.dma[ep - 1].descriptor_control.get()
    }

    pub(crate) fn dma_stops(&self, ep: usize) -> usize {
        self.dma[ep - 1].stops.get()
    }

    pub(crate) fn device_interrupt_enabled(
        &self,
        irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>,
    ) -> bool {
        self.device_enabled.get() & irqs.value == irqs.value
    }

    /// Direction slots an operation on `direction` of `ep` touches: both
    /// for the control endpoint.
    fn sides(&self, ep: usize, direction: Direction) -> &'static [usize] {
        let control = self.endpoints[ep]
            .config
            .iter()
            .any(|c| c.get().map_or(false, |c| c.transfer_type == TransferType::Control));
        match (control, direction) {
            (true, _) => &[0, 1],
            (false, Direction::Out) => &[0],
            (false, Direction::In) => &[1],
        }
    }

    fn status_bits(&self, ep: usize) -> u32 {
        let endpoint = &self.endpoints[ep];
        let receives = endpoint.config[Direction::Out.index()].get().is_some();
        let sender = endpoint.config[Direction::In.index()].get();
        if !receives && sender.is_none() {
            return 0;
        }
        let mut bits = 0;
        if let Some(config) = sender {
            if endpoint.busy.borrow().len() < config.banks.count() {
                bits |= ENDPOINT_STATUS::TXIN::SET.value;
            }
        }
        let count = if let Some(setup) = &*endpoint.setup.borrow() {
            bits |= ENDPOINT_STATUS::RXSTP::SET.value;
            setup.len()
        } else if let Some(packet) = endpoint.out_queue.borrow().front().filter(|_| receives) {
            bits |= ENDPOINT_STATUS::RXOUT::SET.value;
            packet.len()
        } else {
            0
        };
        if endpoint.stalled.iter().any(Cell::get) {
            bits |= ENDPOINT_STATUS::STALLED::SET.value;
        }
        bits | ENDPOINT_STATUS::BYCT.val(count as u32).value
    }
}

impl ControllerRegisters for MockController {
    type Fence = MockFence;

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn freeze_clock(&self) {
        self.frozen.set(true);
    }

    fn unfreeze_clock(&self) {
        self.frozen.set(false);
    }

    fn clock_usable(&self) -> bool {
        self.enabled.get() && !self.frozen.get() && !self.clock_dead.get()
    }

    fn attach(&self) {
        self.attached.set(true);
    }

    fn detach(&self) {
        self.attached.set(false);
    }

    fn speed(&self) -> DeviceSpeed {
        self.speed.get()
    }

    fn set_address(&self, address: u8) {
        self.address.set(Some(address));
    }

    fn clear_address(&self) {
        self.address.set(None);
    }

    fn address(&self) -> Option<u8> {
        self.address.get()
    }

    fn remote_wakeup(&self) {
        self.wakeups.set(self.wakeups.get() + 1);
    }

    fn device_interrupts(&self) -> DeviceInterrupts {
        let mut bits = self.device_pending.get();
        for ep in 0..NUM_ENDPOINTS {
            if self.status_bits(ep) & self.endpoints[ep].irqs_enabled.get() & 0xff != 0 {
                bits |= 1 << (12 + ep);
            }
        }
        for (channel, dma) in self.dma.iter().enumerate() {
            if dma.pending.get() {
                bits |= 1 << (25 + channel);
            }
        }
        DeviceInterrupts::new(bits)
    }

    fn device_interrupts_enabled(&self) -> DeviceInterrupts {
        DeviceInterrupts::new(self.device_enabled.get())
    }

    fn enable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.device_enabled.set(self.device_enabled.get() | irqs.value);
    }

    fn disable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.device_enabled.set(self.device_enabled.get() & !irqs.value);
    }

    fn acknowledge_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.device_pending.set(self.device_pending.get() & !irqs.value);
    }

    fn raise_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.raise(irqs);
    }

    fn endpoint_count(&self) -> usize {
        NUM_ENDPOINTS
    }

    fn endpoint_capabilities(&self, ep: usize) -> EndpointCapabilities {
        EndpointCapabilities {
            max_banks: if ep == 0 { 1 } else { 2 },
            dma: self.dma_endpoints.get() & 1 << ep != 0,
            isochronous: ep != 0,
            max_packet_size: if ep == 0 { 64 } else { 1024 },
            bidirectional: ep != 0,
        }
    }

    fn fifo_capacity(&self) -> usize {
        self.fifo_capacity.get()
    }

    fn endpoint_reset(&self, ep: usize, direction: Direction) {
        let endpoint = &self.endpoints[ep];
        if direction == Direction::In || self.sides(ep, direction).len() == 2 {
            endpoint.staging.borrow_mut().clear();
            endpoint.busy.borrow_mut().clear();
        }
    }

    fn endpoint_configure(&self, ep: usize, config: &EndpointConfig) -> bool {
        if self.fail_configure.get() {
            return false;
        }
        let endpoint = &self.endpoints[ep];
        if config.transfer_type == TransferType::Control {
            endpoint.config.iter().for_each(|c| c.set(Some(*config)));
        } else {
            endpoint.config[config.direction.index()].set(Some(*config));
        }
        true
    }

    fn endpoint_disable(&self, ep: usize, direction: Direction) {
        let endpoint = &self.endpoints[ep];
        let sides = self.sides(ep, direction);
        if sides.len() == 2 {
            endpoint.irqs_enabled.set(0);
        }
        for &side in sides {
            endpoint.config[side].set(None);
            endpoint.stalled[side].set(false);
            if side == Direction::In.index() {
                endpoint.staging.borrow_mut().clear();
                endpoint.busy.borrow_mut().clear();
                self.disable_endpoint_interrupts(ep, direction_interrupts(Direction::In));
            } else {
                endpoint.out_queue.borrow_mut().clear();
                self.disable_endpoint_interrupts(ep, direction_interrupts(Direction::Out));
            }
        }
    }

    fn endpoint_status(&self, ep: usize) -> EndpointStatus {
        self.touch_endpoint();
        EndpointStatus::new(self.status_bits(ep))
    }

    fn endpoint_interrupts_enabled(&self, ep: usize) -> EndpointInterrupts {
        EndpointInterrupts::new(self.endpoints[ep].irqs_enabled.get())
    }

    fn enable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        let enabled = &self.endpoints[ep].irqs_enabled;
        enabled.set(enabled.get() | irqs.value);
    }

    fn disable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        let enabled = &self.endpoints[ep].irqs_enabled;
        enabled.set(enabled.get() & !irqs.value);
    }

    fn acknowledge_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        self.touch_endpoint();
        let endpoint = &self.endpoints[ep];
        if irqs.value & ENDPOINT_INTERRUPT::TXIN::SET.value != 0 {
            let packet = core::mem::take(&mut *endpoint.staging.borrow_mut());
            endpoint.busy.borrow_mut().push_back(packet);
        }
        if irqs.value & ENDPOINT_INTERRUPT::RXOUT::SET.value != 0 {
            endpoint.out_queue.borrow_mut().pop_front();
        }
        if irqs.value & ENDPOINT_INTERRUPT::RXSTP::SET.value != 0 {
            endpoint.setup.borrow_mut().take();
        }
    }

    fn release_bank(&self, ep: usize) {
        self.touch_endpoint();
        let releases = &self.endpoints[ep].releases;
        releases.set(releases.get() + 1);
    }

    fn reset_data_toggle(&self, ep: usize, _direction: Direction) {
        let resets = &self.endpoints[ep].toggle_resets;
        resets.set(resets.get() + 1);
    }

    fn set_stall(&self, ep: usize, direction: Direction) {
        for &side in self.sides(ep, direction) {
            self.endpoints[ep].stalled[side].set(true);
        }
    }

    fn clear_stall(&self, ep: usize, direction: Direction) {
        for &side in self.sides(ep, direction) {
            self.endpoints[ep].stalled[side].set(false);
        }
    }

    fn read_fifo(&self, ep: usize, offset: usize, buf: &mut [u8]) {
        self.touch_endpoint();
        let endpoint = &self.endpoints[ep];
        let setup = endpoint.setup.borrow();
        let queue = endpoint.out_queue.borrow();
        let Some(packet) = (*setup).as_ref().or(queue.front()) else {
            return;
        };
        let src = packet.get(offset..).unwrap_or(&[]);
        let n = core::cmp::min(src.len(), buf.len());
        buf[..n].copy_from_slice(&src[..n]);
    }

    fn write_fifo(&self, ep: usize, offset: usize, buf: &[u8]) {
        self.touch_endpoint();
        let mut staging = self.endpoints[ep].staging.borrow_mut();
        if staging.len() < offset + buf.len() {
            staging.resize(offset + buf.len(), 0);
        }
        staging[offset..offset + buf.len()].copy_from_slice(buf);
    }

    fn dma_status(&self, ep: usize) -> DmaStatus {
        let dma = &self.dma[ep - 1];
        dma.pending.set(false);
        DmaStatus::new(dma.status.get())
    }

    fn dma_next_descriptor(&self, ep: usize) -> u32 {
        self.dma[ep - 1].next.get()
    }

    fn dma_start(&self, ep: usize, chain: &DescriptorChain, descriptor: &DmaDescriptor) {
        let dma = &self.dma[ep - 1];
        match chain.wrap {
            Some(wrap) => {
                descriptor.load(wrap.ptr as usize as u32, &wrap);
                dma.descriptor_control.set(descriptor.control.get());
                dma.next.set(1);
            }
            None => dma.next.set(0),
        }
        dma.chain.set(Some(*chain));
        dma.status.set(DMA_STATUS::CHANN_ENB::SET.value | DMA_STATUS::CHANN_ACT::SET.value);
    }

    fn dma_stop(&self, ep: usize) {
        let dma = &self.dma[ep - 1];
        dma.chain.set(None);
        dma.status.set(0);
        dma.pending.set(false);
        dma.stops.set(dma.stops.get() + 1);
    }

    fn fence(&self) -> MockFence {
        MockFence
    }
}
