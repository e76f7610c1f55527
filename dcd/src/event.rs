// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Outbound events.
//!
//! [`Emitter`] is the one place the driver hands results to the upper stack.
//! A stack that wants to consume events from a task rather than from
//! interrupt context registers an [`EventQueue`] as its client and drains it
//! with [`EventQueue::pop`].

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::CONFIG;
use crate::debug::HexBuf;
use crate::endpoint::EndpointHandle;
use crate::hil::usb::{BusSignal, Client, DeviceSpeed, TransferResult};
use crate::transfer::TransferSource;
use crate::utilities::cells::OptionalCell;
use crate::ErrorCode;

pub(crate) struct Emitter<'a> {
    client: OptionalCell<&'a dyn Client<'a>>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new() -> Emitter<'a> {
        Emitter {
            client: OptionalCell::empty(),
        }
    }

    pub(crate) fn set_client(&self, client: &'a dyn Client<'a>) {
        self.client.set(client);
    }

    pub(crate) fn setup_received(&self, setup: [u8; 8]) {
        if CONFIG.trace_transfers {
            debug!("SETUP {:?}", HexBuf(&setup));
        }
        self.client.map(|client| client.setup_received(setup));
    }

    pub(crate) fn transfer_complete(
        &self,
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
        result: TransferResult,
    ) {
        if CONFIG.trace_transfers {
            debug!(
                "EP{} {:?} complete: {} bytes, {:?}",
                endpoint.number(),
                endpoint.direction(),
                length,
                result
            );
        }
        self.client.map_or_else(
            || client_err!("transfer complete with no client"),
            |client| client.transfer_complete(endpoint, source, length, result),
        );
    }

    pub(crate) fn bus_reset(&self, speed: DeviceSpeed) {
        if CONFIG.trace_bus {
            debug!("bus reset, {:?} speed", speed);
        }
        self.client.map(|client| client.bus_reset(speed));
    }

    pub(crate) fn bus_signal(&self, signal: BusSignal) {
        if CONFIG.trace_bus && signal != BusSignal::StartOfFrame {
            debug!("bus {:?}", signal);
        }
        self.client.map(|client| client.bus_signal(signal));
    }

    pub(crate) fn controller_error(&self, error: ErrorCode) {
        debug!("controller error: {}", error);
        self.client.map(|client| client.controller_error(error));
    }
}

/// One emitted event, as stored by [`EventQueue`].
#[derive(Debug)]
pub enum Event<'a> {
    Setup([u8; 8]),
    TransferComplete {
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
        result: TransferResult,
    },
    BusReset(DeviceSpeed),
    BusSignal(BusSignal),
    ControllerError(ErrorCode),
}

/// Fixed-size queue of events, filled from interrupt context and drained by
/// a task.
///
/// The driver is the only producer and the draining task the only consumer.
/// `tail` is only stored by `push` and `head` only by `pop`, each published
/// with release ordering after the slot it covers was written or emptied,
/// so an interrupt arriving in the middle of `pop` cannot lose or duplicate
/// an event. Both indices count modulo `2 * N` to tell a full queue from an
/// empty one.
///
/// When the queue is full new events are dropped and counted. A dropped
/// `TransferComplete` also drops its buffer, so `N` should cover every
/// transfer the stack can have outstanding plus the bus events between two
/// drains.
pub struct EventQueue<'a, const N: usize> {
    events: [Cell<Option<Event<'a>>>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicUsize,
}

// Each slot is owned by exactly one side at a time, as decided by the
// indices.
unsafe impl<'a, const N: usize> Sync for EventQueue<'a, N> where Event<'a>: Send {}

impl<'a, const N: usize> EventQueue<'a, N> {
    pub fn new() -> EventQueue<'a, N> {
        EventQueue {
            events: core::array::from_fn(|_| Cell::new(None)),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    fn next(index: usize) -> usize {
        (index + 1) % (2 * N)
    }

    fn distance(head: usize, tail: usize) -> usize {
        (tail + 2 * N - head) % (2 * N)
    }

    fn push(&self, event: Event<'a>) {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if Self::distance(head, tail) == N {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.events[tail % N].set(Some(event));
        self.tail.store(Self::next(tail), Ordering::Release);
    }

    /// Oldest event not yet taken.
    pub fn pop(&self) -> Option<Event<'a>> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let event = self.events[head % N].take();
        self.head.store(Self::next(head), Ordering::Release);
        event
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        Self::distance(head, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events lost because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for EventQueue<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> Client<'a> for EventQueue<'a, N> {
    fn setup_received(&self, setup: [u8; 8]) {
        self.push(Event::Setup(setup));
    }

    fn transfer_complete(
        &self,
        endpoint: EndpointHandle,
        source: TransferSource<'a>,
        length: usize,
        result: TransferResult,
    ) {
        self.push(Event::TransferComplete {
            endpoint,
            source,
            length,
            result,
        });
    }

    fn bus_reset(&self, speed: DeviceSpeed) {
        self.push(Event::BusReset(speed));
    }

    fn bus_signal(&self, signal: BusSignal) {
        self.push(Event::BusSignal(signal));
    }

    fn controller_error(&self, error: ErrorCode) {
        self.push(Event::ControllerError(error));
    }
}
