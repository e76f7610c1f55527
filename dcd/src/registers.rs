// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Boundary between the driver core and a concrete controller.
//!
//! The core never touches memory-mapped I/O. Everything it needs from the
//! hardware goes through [`ControllerRegisters`], one method per logical
//! action, so all volatile access and raw-pointer handling stays in the
//! backend crate. Status and enable words cross the boundary as
//! `LocalRegisterCopy` values with the layouts below. A backend whose
//! hardware uses a different layout translates once, in its implementation
//! of the trait.

use tock_registers::fields::FieldValue;
use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::dma::{DescriptorChain, DmaDescriptor};
use crate::endpoint::{EndpointCapabilities, EndpointConfig};
use crate::hil::usb::{DeviceSpeed, Direction};
use crate::utilities::dma_fence::DmaFence;

register_bitfields![u32,
    /// Device-level interrupt status, enable and acknowledge word.
    pub DEVICE_INTERRUPT [
        /// Bus suspended
        SUSP OFFSET(0) NUMBITS(1) [],
        /// Micro start of frame (high speed only)
        MSOF OFFSET(1) NUMBITS(1) [],
        /// Start of frame
        SOF OFFSET(2) NUMBITS(1) [],
        /// End of bus reset
        EORST OFFSET(3) NUMBITS(1) [],
        /// Wakeup from suspend
        WAKEUP OFFSET(4) NUMBITS(1) [],
        /// End of resume signaling
        EORSM OFFSET(5) NUMBITS(1) [],
        /// Upstream resume sent
        UPRSM OFFSET(6) NUMBITS(1) [],
        /// One bit per endpoint with a pending endpoint interrupt
        PEP OFFSET(12) NUMBITS(10) [],
        /// One bit per DMA channel, channel 1 at bit 25
        DMA OFFSET(25) NUMBITS(7) []
    ],

    /// Per-endpoint status word.
    pub ENDPOINT_STATUS [
        TXIN OFFSET(0) NUMBITS(1) [],
        RXOUT OFFSET(1) NUMBITS(1) [],
        RXSTP OFFSET(2) NUMBITS(1) [],
        NAKOUT OFFSET(3) NUMBITS(1) [],
        NAKIN OFFSET(4) NUMBITS(1) [],
        OVERF OFFSET(5) NUMBITS(1) [],
        STALLED OFFSET(6) NUMBITS(1) [],
        SHORTPACKET OFFSET(7) NUMBITS(1) [],
        DTSEQ OFFSET(8) NUMBITS(2) [],
        NBUSYBK OFFSET(12) NUMBITS(2) [],
        CURRBK OFFSET(14) NUMBITS(2) [],
        RWALL OFFSET(16) NUMBITS(1) [],
        CTRLDIR OFFSET(17) NUMBITS(1) [
            Out = 0,
            In = 1
        ],
        CFGOK OFFSET(18) NUMBITS(1) [],
        BYCT OFFSET(20) NUMBITS(11) []
    ],

    /// Per-endpoint interrupt enable and acknowledge word. Bit positions
    /// match `ENDPOINT_STATUS`.
    pub ENDPOINT_INTERRUPT [
        TXIN OFFSET(0) NUMBITS(1) [],
        RXOUT OFFSET(1) NUMBITS(1) [],
        RXSTP OFFSET(2) NUMBITS(1) [],
        NAKOUT OFFSET(3) NUMBITS(1) [],
        NAKIN OFFSET(4) NUMBITS(1) [],
        OVERF OFFSET(5) NUMBITS(1) [],
        STALLED OFFSET(6) NUMBITS(1) [],
        SHORTPACKET OFFSET(7) NUMBITS(1) []
    ],

    /// DMA channel control word, also the third word of a DMA descriptor.
    pub DMA_CONTROL [
        CHANN_ENB OFFSET(0) NUMBITS(1) [],
        LDNXT_DSC OFFSET(1) NUMBITS(1) [],
        END_TR_EN OFFSET(2) NUMBITS(1) [],
        END_B_EN OFFSET(3) NUMBITS(1) [],
        END_TR_IT OFFSET(4) NUMBITS(1) [],
        END_BUFFIT OFFSET(5) NUMBITS(1) [],
        DESC_LD_IT OFFSET(6) NUMBITS(1) [],
        BURST_LCK OFFSET(7) NUMBITS(1) [],
        BUFF_LENGTH OFFSET(16) NUMBITS(16) []
    ],

    /// DMA channel status word.
    pub DMA_STATUS [
        CHANN_ENB OFFSET(0) NUMBITS(1) [],
        CHANN_ACT OFFSET(1) NUMBITS(1) [],
        END_TR_ST OFFSET(4) NUMBITS(1) [],
        END_BF_ST OFFSET(5) NUMBITS(1) [],
        DESC_LDST OFFSET(6) NUMBITS(1) [],
        /// Bytes left in the buffer of the descriptor being processed
        BUFF_COUNT OFFSET(16) NUMBITS(16) []
    ]
];

pub type DeviceInterrupts = LocalRegisterCopy<u32, DEVICE_INTERRUPT::Register>;
pub type EndpointStatus = LocalRegisterCopy<u32, ENDPOINT_STATUS::Register>;
pub type EndpointInterrupts = LocalRegisterCopy<u32, ENDPOINT_INTERRUPT::Register>;
pub type DmaStatus = LocalRegisterCopy<u32, DMA_STATUS::Register>;

/// `DEVICE_INTERRUPT` bit for endpoint `ep`'s interrupt line.
pub fn endpoint_interrupt(ep: usize) -> FieldValue<u32, DEVICE_INTERRUPT::Register> {
    DEVICE_INTERRUPT::PEP.val(1 << ep)
}

/// `DEVICE_INTERRUPT` bit for the DMA channel serving endpoint `ep`.
///
/// Channel `n` serves endpoint `n`; endpoint 0 has no channel.
pub fn dma_interrupt(ep: usize) -> FieldValue<u32, DEVICE_INTERRUPT::Register> {
    DEVICE_INTERRUPT::DMA.val(1 << (ep - 1))
}

/// Every device interrupt source.
pub fn all_device_interrupts() -> FieldValue<u32, DEVICE_INTERRUPT::Register> {
    FieldValue::<u32, DEVICE_INTERRUPT::Register>::new(u32::MAX, 0, u32::MAX)
}

/// Every endpoint interrupt source.
pub fn all_endpoint_interrupts() -> FieldValue<u32, ENDPOINT_INTERRUPT::Register> {
    FieldValue::<u32, ENDPOINT_INTERRUPT::Register>::new(0xff, 0, 0xff)
}

/// Endpoint interrupt sources that belong to one direction of an endpoint.
pub fn direction_interrupts(direction: Direction) -> FieldValue<u32, ENDPOINT_INTERRUPT::Register> {
    match direction {
        Direction::In => ENDPOINT_INTERRUPT::TXIN::SET + ENDPOINT_INTERRUPT::NAKIN::SET,
        Direction::Out => {
            ENDPOINT_INTERRUPT::RXOUT::SET
                + ENDPOINT_INTERRUPT::NAKOUT::SET
                + ENDPOINT_INTERRUPT::OVERF::SET
                + ENDPOINT_INTERRUPT::SHORTPACKET::SET
        }
    }
}

/// Register-level operations the driver core needs from a USB device
/// controller.
///
/// Endpoint arguments are endpoint numbers already checked against
/// `endpoint_count()`. Operations on one side of an endpoint also take its
/// direction. A backend whose numbers carry one direction at a time may
/// ignore it, and every backend applies them to both sides of a control
/// endpoint.
pub trait ControllerRegisters {
    type Fence: DmaFence;

    // Controller

    /// Enable the controller in device mode, clock still frozen.
    fn enable(&self);
    fn disable(&self);
    fn freeze_clock(&self);
    fn unfreeze_clock(&self);
    fn clock_usable(&self) -> bool;
    /// Connect the pull-up so the host sees the device.
    fn attach(&self);
    fn detach(&self);
    /// Link speed negotiated during the last bus reset.
    fn speed(&self) -> DeviceSpeed;
    /// Load `address` into the address register and enable it.
    fn set_address(&self, address: u8);
    fn clear_address(&self);
    /// Address the device currently answers to, if one is enabled.
    fn address(&self) -> Option<u8>;
    /// Start upstream resume signaling.
    fn remote_wakeup(&self);

    // Device interrupts

    fn device_interrupts(&self) -> DeviceInterrupts;
    fn device_interrupts_enabled(&self) -> DeviceInterrupts;
    fn enable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>);
    fn disable_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>);
    fn acknowledge_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>);
    /// Set pending bus interrupt flags from software.
    fn raise_device_interrupts(&self, irqs: FieldValue<u32, DEVICE_INTERRUPT::Register>);

    // Endpoints

    fn endpoint_count(&self) -> usize;
    fn endpoint_capabilities(&self, ep: usize) -> EndpointCapabilities;
    /// Bytes of packet memory shared by all endpoint banks.
    fn fifo_capacity(&self) -> usize;
    /// Reset the endpoint's banks and state machine.
    fn endpoint_reset(&self, ep: usize, direction: Direction);
    /// Program and enable the endpoint in `config.direction`. Returns
    /// whether the controller accepted the bank allocation.
    fn endpoint_configure(&self, ep: usize, config: &EndpointConfig) -> bool;
    /// Disable the endpoint, its interrupts, and free its banks.
    fn endpoint_disable(&self, ep: usize, direction: Direction);
    fn endpoint_status(&self, ep: usize) -> EndpointStatus;
    fn endpoint_interrupts_enabled(&self, ep: usize) -> EndpointInterrupts;
    fn enable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    );
    fn disable_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    );
    /// Clear endpoint status flags. Acknowledging `TXIN` sends the bank
    /// that was just written.
    fn acknowledge_endpoint_interrupts(
        &self,
        ep: usize,
        irqs: FieldValue<u32, ENDPOINT_INTERRUPT::Register>,
    );
    /// Hand the current bank back to the controller.
    fn release_bank(&self, ep: usize);
    fn reset_data_toggle(&self, ep: usize, direction: Direction);
    fn set_stall(&self, ep: usize, direction: Direction);
    fn clear_stall(&self, ep: usize, direction: Direction);
    /// Copy bytes out of the current bank, starting `offset` bytes in.
    fn read_fifo(&self, ep: usize, offset: usize, buf: &mut [u8]);
    /// Copy bytes into the current bank, starting `offset` bytes in.
    fn write_fifo(&self, ep: usize, offset: usize, buf: &[u8]);

    // DMA

    fn dma_status(&self, ep: usize) -> DmaStatus;
    /// Value of the channel's next-descriptor register. Reads zero once the
    /// last descriptor of a chain has been loaded.
    fn dma_next_descriptor(&self, ep: usize) -> u32;
    /// Arm the channel serving `ep` with `chain`. If the chain has a wrap
    /// segment it is written into `descriptor`, which the channel loads
    /// when the first segment ends.
    fn dma_start(&self, ep: usize, chain: &DescriptorChain, descriptor: &DmaDescriptor);
    fn dma_stop(&self, ep: usize);

    /// Cache maintenance for buffers handed to the DMA engine.
    fn fence(&self) -> Self::Fence;

    // Provided

    /// Let the endpoint raise an interrupt when an OUT packet lands.
    fn arm_rx(&self, ep: usize) {
        self.enable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::RXOUT::SET);
    }

    fn disarm_rx(&self, ep: usize) {
        self.disable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::RXOUT::SET);
    }

    /// Let the endpoint raise an interrupt when a bank is free to write.
    fn arm_tx(&self, ep: usize) {
        self.enable_endpoint_interrupts(ep, ENDPOINT_INTERRUPT::TXIN::SET);
    }

    /// Bytes in the bank that raised the last OUT or SETUP interrupt.
    fn read_byte_count(&self, ep: usize) -> usize {
        self.endpoint_status(ep).read(ENDPOINT_STATUS::BYCT) as usize
    }
}
