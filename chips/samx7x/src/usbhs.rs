// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USBHS device controller registers.
//!
//! The device interrupt, endpoint status and DMA words of the USBHS share
//! their layout with the driver core's, so most of this file is passing
//! words through. Endpoint configuration, the control register and the
//! FIFO windows are specific to this part.
//!
//! Endpoint `n` has a 32 KiB FIFO window at `0xA0100000 + n * 0x8000` that
//! reads or writes the current bank sequentially. DMA channel `n` serves
//! endpoint `n`, for `n` in `1..=7`.

use dcd::dma::{DescriptorChain, DmaDescriptor};
use dcd::endpoint::{EndpointCapabilities, EndpointConfig};
use dcd::hil::usb::{DeviceSpeed, Direction, TransferType};
use dcd::registers::{
    ControllerRegisters, DeviceInterrupts, DmaStatus, EndpointInterrupts, EndpointStatus,
    DEVICE_INTERRUPT, DMA_CONTROL, DMA_STATUS, ENDPOINT_INTERRUPT, ENDPOINT_STATUS,
};
use dcd::utilities::dma_fence::DmaFence;
use dcd::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use dcd::utilities::registers::{
    register_bitfields, register_structs, FieldValue, LocalRegisterCopy, ReadOnly, ReadWrite,
    WriteOnly,
};
use dcd::utilities::StaticRef;

use crate::cache::CortexM7Fence;

/// Number of endpoints, including endpoint 0.
pub const EP_MAX: usize = 10;

/// Number of DMA channels. Channel `n` serves endpoint `n`.
pub const DMA_CHANNELS: usize = 7;

/// Endpoints whose DMA channel the driver uses.
const DMA_ENDPOINTS: core::ops::RangeInclusive<usize> = 1..=6;

/// Dual-port RAM shared by all endpoint banks.
pub const DPRAM_SIZE: usize = 4096;

const FIFO_BASE: usize = 0xA010_0000;
const FIFO_WINDOW: usize = 0x8000;

register_structs! {
    DmaChannelRegisters {
        (0x00 => nxtdsc: ReadWrite<u32>),
        (0x04 => address: ReadWrite<u32>),
        (0x08 => control: ReadWrite<u32, DMA_CONTROL::Register>),
        (0x0c => status: ReadWrite<u32, DMA_STATUS::Register>),
        (0x10 => @END),
    }
}

register_structs! {
    UsbhsRegisters {
        (0x000 => devctrl: ReadWrite<u32, DEVCTRL::Register>),
        (0x004 => devisr: ReadOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x008 => devicr: WriteOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x00c => devifr: WriteOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x010 => devimr: ReadOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x014 => devidr: WriteOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x018 => devier: WriteOnly<u32, DEVICE_INTERRUPT::Register>),
        (0x01c => devept: ReadWrite<u32, DEVEPT::Register>),
        (0x020 => devfnum: ReadOnly<u32, DEVFNUM::Register>),
        (0x024 => _reserved0),
        (0x100 => deveptcfg: [ReadWrite<u32, DEVEPTCFG::Register>; EP_MAX]),
        (0x128 => _reserved1),
        (0x130 => deveptisr: [ReadOnly<u32, ENDPOINT_STATUS::Register>; EP_MAX]),
        (0x158 => _reserved2),
        (0x160 => devepticr: [WriteOnly<u32, ENDPOINT_INTERRUPT::Register>; EP_MAX]),
        (0x188 => _reserved3),
        (0x1c0 => deveptimr: [ReadOnly<u32, DEVEPTCTRL::Register>; EP_MAX]),
        (0x1e8 => _reserved4),
        (0x1f0 => deveptier: [WriteOnly<u32, DEVEPTCTRL::Register>; EP_MAX]),
        (0x218 => _reserved5),
        (0x220 => deveptidr: [WriteOnly<u32, DEVEPTCTRL::Register>; EP_MAX]),
        (0x248 => _reserved6),
        (0x310 => devdma: [DmaChannelRegisters; DMA_CHANNELS]),
        (0x380 => _reserved7),
        (0x800 => ctrl: ReadWrite<u32, CTRL::Register>),
        (0x804 => sr: ReadOnly<u32, SR::Register>),
        (0x808 => @END),
    }
}

register_bitfields![u32,
    DEVCTRL [
        /// USB address
        UADD OFFSET(0) NUMBITS(7) [],
        /// Address enable
        ADDEN OFFSET(7) NUMBITS(1) [],
        DETACH OFFSET(8) NUMBITS(1) [],
        /// Remote wakeup
        RMWKUP OFFSET(9) NUMBITS(1) [],
        SPDCONF OFFSET(10) NUMBITS(2) [
            Normal = 0,
            LowPower = 1,
            HighSpeed = 2,
            ForcedFs = 3
        ],
        /// Low-speed mode force
        LS OFFSET(12) NUMBITS(1) []
    ],

    DEVEPT [
        /// One enable bit per endpoint
        EPEN OFFSET(0) NUMBITS(10) [],
        /// One reset bit per endpoint
        EPRST OFFSET(16) NUMBITS(10) []
    ],

    DEVFNUM [
        MFNUM OFFSET(0) NUMBITS(3) [],
        FNUM OFFSET(3) NUMBITS(11) [],
        FNCERR OFFSET(15) NUMBITS(1) []
    ],

    DEVEPTCFG [
        ALLOC OFFSET(1) NUMBITS(1) [],
        EPBK OFFSET(2) NUMBITS(2) [
            Single = 0,
            Double = 1,
            Triple = 2
        ],
        EPSIZE OFFSET(4) NUMBITS(3) [],
        EPDIR OFFSET(8) NUMBITS(1) [
            Out = 0,
            In = 1
        ],
        /// Automatic bank switch
        AUTOSW OFFSET(9) NUMBITS(1) [],
        EPTYPE OFFSET(11) NUMBITS(2) [
            Control = 0,
            Isochronous = 1,
            Bulk = 2,
            Interrupt = 3
        ],
        /// Additional transactions per microframe
        NBTRANS OFFSET(13) NUMBITS(2) []
    ],

    /// Endpoint interrupt mask, and the set/clear registers that change it.
    /// The low byte lines up with `ENDPOINT_INTERRUPT`.
    DEVEPTCTRL [
        TXIN OFFSET(0) NUMBITS(1) [],
        RXOUT OFFSET(1) NUMBITS(1) [],
        RXSTP OFFSET(2) NUMBITS(1) [],
        NAKOUT OFFSET(3) NUMBITS(1) [],
        NAKIN OFFSET(4) NUMBITS(1) [],
        OVERF OFFSET(5) NUMBITS(1) [],
        STALLED OFFSET(6) NUMBITS(1) [],
        SHORTPACKET OFFSET(7) NUMBITS(1) [],
        NBUSYBK OFFSET(12) NUMBITS(1) [],
        KILLBK OFFSET(13) NUMBITS(1) [],
        FIFOCON OFFSET(14) NUMBITS(1) [],
        EPDISHDMA OFFSET(16) NUMBITS(1) [],
        NYETDIS OFFSET(17) NUMBITS(1) [],
        /// Reset data toggle
        RSTDT OFFSET(18) NUMBITS(1) [],
        /// STALL request
        STALLRQ OFFSET(19) NUMBITS(1) []
    ],

    CTRL [
        /// VBUS hardware control disable
        VBUSHWC OFFSET(8) NUMBITS(1) [],
        /// Freeze USB clock
        FRZCLK OFFSET(14) NUMBITS(1) [],
        /// USBHS enable
        USBE OFFSET(15) NUMBITS(1) [],
        UID OFFSET(24) NUMBITS(1) [],
        UIMOD OFFSET(25) NUMBITS(1) [
            Host = 0,
            Device = 1
        ]
    ],

    SR [
        SPEED OFFSET(12) NUMBITS(2) [
            FullSpeed = 0,
            HighSpeed = 1,
            LowSpeed = 2
        ],
        /// UTMI clock usable
        CLKUSABLE OFFSET(14) NUMBITS(1) []
    ]
];

const USBHS_BASE: StaticRef<UsbhsRegisters> =
    unsafe { StaticRef::new(0x4003_8000 as *const UsbhsRegisters) };

/// Configuration register value for `config`.
fn endpoint_config_value(config: &EndpointConfig) -> FieldValue<u32, DEVEPTCFG::Register> {
    let banks = match config.banks.count() {
        1 => DEVEPTCFG::EPBK::Single,
        2 => DEVEPTCFG::EPBK::Double,
        _ => DEVEPTCFG::EPBK::Triple,
    };
    let direction = match (config.transfer_type, config.direction) {
        (TransferType::Control, _) | (_, Direction::Out) => DEVEPTCFG::EPDIR::Out,
        (_, Direction::In) => DEVEPTCFG::EPDIR::In,
    };
    let autosw = if config.use_dma {
        DEVEPTCFG::AUTOSW::SET
    } else {
        DEVEPTCFG::AUTOSW::CLEAR
    };
    DEVEPTCFG::ALLOC::SET
        + banks
        + DEVEPTCFG::EPSIZE.val(config.size as u32)
        + direction
        + autosw
        + DEVEPTCFG::EPTYPE.val(config.transfer_type as u32)
        + DEVEPTCFG::NBTRANS.val(config.transactions as u32)
}

fn speed(sr: LocalRegisterCopy<u32, SR::Register>) -> DeviceSpeed {
    match sr.read_as_enum(SR::SPEED) {
        Some(SR::SPEED::Value::HighSpeed) => DeviceSpeed::High,
        Some(SR::SPEED::Value::LowSpeed) => DeviceSpeed::Low,
        _ => DeviceSpeed::Full,
    }
}

/// Link speeds the device offers during the reset handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpeedConfig {
    /// High speed if the host supports it, else full speed.
    Normal,
    /// Full speed only.
    FullSpeed,
    /// High speed test mode.
    ForcedHighSpeed,
}

pub struct Usbhs {
    registers: StaticRef<UsbhsRegisters>,
    fifo_base: usize,
    speed: SpeedConfig,
}

impl Usbhs {
    pub const fn new(speed: SpeedConfig) -> Usbhs {
        Usbhs {
            registers: USBHS_BASE,
            fifo_base: FIFO_BASE,
            speed,
        }
    }

    /// # Safety
    ///
    /// `registers` must point to a USBHS register block and `fifo_base` to
    /// its FIFO windows, both valid for the `'static` lifetime.
    #[cfg(test)]
    unsafe fn with_base(registers: *const UsbhsRegisters, fifo_base: usize) -> Usbhs {
        Usbhs {
            registers: StaticRef::new(registers),
            fifo_base,
            speed: SpeedConfig::Normal,
        }
    }

    /// Current frame number, and microframe at high speed.
    pub fn frame_number(&self) -> (u16, u8) {
        let fnum = self.registers.devfnum.extract();
        (
            fnum.read(DEVFNUM::FNUM) as u16,
            fnum.read(DEVFNUM::MFNUM) as u8,
        )
    }

    fn fifo(&self, ep: usize) -> *mut u8 {
        (self.fifo_base + ep * FIFO_WINDOW) as *mut u8
    }

    fn channel(&self, ep: usize) -> &DmaChannelRegisters {
        &self.registers.devdma[ep - 1]
    }
}

impl ControllerRegisters for Usbhs {
    type Fence = CortexM7Fence;

    fn enable(&self) {
        self.registers.ctrl.write(
            CTRL::UIMOD::Device + CTRL::USBE::SET + CTRL::FRZCLK::SET + CTRL::VBUSHWC::SET,
        );
        let spdconf = match self.speed {
            SpeedConfig::Normal => DEVCTRL::SPDCONF::Normal,
            SpeedConfig::FullSpeed => DEVCTRL::SPDCONF::ForcedFs,
            SpeedConfig::ForcedHighSpeed => DEVCTRL::SPDCONF::HighSpeed,
        };
        self.registers
            .devctrl
            .modify(spdconf + DEVCTRL::LS::CLEAR);
    }

    fn disable(&self) {
        self.registers.ctrl.modify(CTRL::USBE::CLEAR);
    }

    fn freeze_clock(&self) {
        self.registers.ctrl.modify(CTRL::FRZCLK::SET);
    }

    fn unfreeze_clock(&self) {
        self.registers.ctrl.modify(CTRL::FRZCLK::CLEAR);
    }

    fn clock_usable(&self) -> bool {
        self.registers.sr.is_set(SR::CLKUSABLE)
    }

    fn attach(&self) {
        self.registers.devctrl.modify(DEVCTRL::DETACH::CLEAR);
    }

    fn detach(&self) {
        self.registers.devctrl.modify(DEVCTRL::DETACH::SET);
    }

    fn speed(&self) -> DeviceSpeed {
        speed(self.registers.sr.extract())
    }

    fn set_address(&self, address: u8) {
        // UADD must hold the address before ADDEN is set.
        self.registers
            .devctrl
            .modify(DEVCTRL::UADD.val(address as u32) + DEVCTRL::ADDEN::CLEAR);
        self.registers.devctrl.modify(DEVCTRL::ADDEN::SET);
    }

    fn clear_address(&self) {
        self.registers
            .devctrl
            .modify(DEVCTRL::UADD.val(0) + DEVCTRL::ADDEN::CLEAR);
    }

    fn address(&self) -> Option<u8> {
        let devctrl = self.registers.devctrl.extract();
        if devctrl.is_set(DEVCTRL::ADDEN) {
            Some(devctrl.read(DEVCTRL::UADD) as u8)
        } else {
            None
        }
    }

    fn remote_wakeup(&self) {
        self.registers.devctrl.modify(DEVCTRL::RMWKUP::SET);
    }

    fn device_interrupts(&self) -> DeviceInterrupts {
        self.registers.devisr.extract()
    }

    fn device_interrupts_enabled(&self) -> DeviceInterrupts {
        self.registers.devimr.extract()
    }

    fn enable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.registers.devier.write(irqs);
    }

    fn disable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.registers.devidr.write(irqs);
    }

    fn acknowledge_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.registers.devicr.write(irqs);
    }

    fn raise_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>) {
        self.registers.devifr.write(irqs);
    }

    fn endpoint_count(&self) -> usize {
        EP_MAX
    }

    fn endpoint_capabilities(&self, ep: usize) -> EndpointCapabilities {
        if ep == 0 {
            EndpointCapabilities {
                max_banks: 1,
                dma: false,
                isochronous: false,
                max_packet_size: 64,
                bidirectional: false,
            }
        } else {
            EndpointCapabilities {
                max_banks: 3,
                dma: DMA_ENDPOINTS.contains(&ep),
                isochronous: true,
                max_packet_size: 1024,
                bidirectional: false,
            }
        }
    }

    fn fifo_capacity(&self) -> usize {
        DPRAM_SIZE
    }

    fn endpoint_reset(&self, ep: usize, _direction: Direction) {
        let bit = 1 << ep;
        let resets = self.registers.devept.read(DEVEPT::EPRST);
        self.registers.devept.modify(DEVEPT::EPRST.val(resets | bit));
        self.registers.devept.modify(DEVEPT::EPRST.val(resets & !bit));
    }

    fn endpoint_configure(&self, ep: usize, config: &EndpointConfig) -> bool {
        let enabled = self.registers.devept.read(DEVEPT::EPEN);
        self.registers
            .devept
            .modify(DEVEPT::EPEN.val(enabled | 1 << ep));
        self.registers.deveptcfg[ep].write(endpoint_config_value(config));
        self.registers.deveptisr[ep].is_set(ENDPOINT_STATUS::CFGOK)
    }

    fn endpoint_disable(&self, ep: usize, _direction: Direction) {
        self.registers.deveptidr[ep].set(u32::MAX);
        let enabled = self.registers.devept.read(DEVEPT::EPEN);
        self.registers
            .devept
            .modify(DEVEPT::EPEN.val(enabled & !(1 << ep)));
        self.registers.deveptcfg[ep].modify(DEVEPTCFG::ALLOC::CLEAR);
    }

    fn endpoint_status(&self, ep: usize) -> EndpointStatus {
        self.registers.deveptisr[ep].extract()
    }

    fn endpoint_interrupts_enabled(&self, ep: usize) -> EndpointInterrupts {
        EndpointInterrupts::new(self.registers.deveptimr[ep].get() & 0xff)
    }

    fn enable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        self.registers.deveptier[ep].set(irqs.value);
    }

    fn disable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        self.registers.deveptidr[ep].set(irqs.value);
    }

    fn acknowledge_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    ) {
        self.registers.devepticr[ep].write(irqs);
    }

    fn release_bank(&self, ep: usize) {
        // The control endpoint switches banks on the flag acknowledge alone.
        if ep != 0 {
            self.registers.deveptidr[ep].write(DEVEPTCTRL::FIFOCON::SET);
        }
    }

    fn reset_data_toggle(&self, ep: usize, _direction: Direction) {
        self.registers.deveptier[ep].write(DEVEPTCTRL::RSTDT::SET);
    }

    fn set_stall(&self, ep: usize, _direction: Direction) {
        self.registers.deveptier[ep].write(DEVEPTCTRL::STALLRQ::SET);
    }

    fn clear_stall(&self, ep: usize, _direction: Direction) {
        self.registers.deveptidr[ep].write(DEVEPTCTRL::STALLRQ::SET);
    }

    fn read_fifo(&self, ep: usize, offset: usize, buf: &mut [u8]) {
        let fifo = self.fifo(ep);
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: the window is FIFO_WINDOW bytes and a bank is at most
            // 1024 bytes, so `offset + i` stays inside it.
            *byte = unsafe { core::ptr::read_volatile(fifo.add(offset + i)) };
        }
    }

    fn write_fifo(&self, ep: usize, offset: usize, buf: &[u8]) {
        let fifo = self.fifo(ep);
        for (i, byte) in buf.iter().enumerate() {
            // SAFETY: as in `read_fifo`.
            unsafe { core::ptr::write_volatile(fifo.add(offset + i), *byte) };
        }
    }

    fn dma_status(&self, ep: usize) -> DmaStatus {
        // Reading the status clears its end-of-transfer flags.
        self.channel(ep).status.extract()
    }

    fn dma_next_descriptor(&self, ep: usize) -> u32 {
        self.channel(ep).nxtdsc.get()
    }

    fn dma_start(&self, ep: usize, chain: &DescriptorChain, descriptor: &DmaDescriptor) {
        let channel = self.channel(ep);
        match chain.wrap {
            Some(wrap) => {
                descriptor.load(wrap.ptr as usize as u32, &wrap);
                self.fence().release(descriptor.as_region());
                channel
                    .nxtdsc
                    .set(descriptor as *const DmaDescriptor as usize as u32);
            }
            None => channel.nxtdsc.set(0),
        }
        channel.address.set(chain.first.ptr as usize as u32);
        channel.control.set(chain.first.control.to_register_bits().get());
    }

    fn dma_stop(&self, ep: usize) {
        let channel = self.channel(ep);
        channel.control.write(DMA_CONTROL::CHANN_ENB::CLEAR);
        channel.nxtdsc.set(0);
    }

    fn fence(&self) -> CortexM7Fence {
        CortexM7Fence
    }
}
