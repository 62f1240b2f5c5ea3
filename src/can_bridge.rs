//! CAN driver contract consumed by the TDMA core: poll the local CAN bus
//! into the radio-bound queue, and drain the CAN-bound queue onto the local
//! bus.
//!
//! Adapted from `can_queue.rs`'s `Control`/`Tx` split in the firmware this
//! crate is based on: same FDCAN interrupt set and the same "preserve the
//! pending frame FDCAN handed back on `WouldBlock`" pattern, but pushing
//! into/popping from a [`BridgeQueue`] of [`CanRecord`]s instead of an RTIC
//! channel and a priority `BinaryHeap` — the queue's own overwrite-oldest
//! policy already provides the buffering a CAN bridge needs, so there is no
//! separate retransmit-priority structure here.

use embedded_can::nb::Can;
use embedded_can::Frame;
use fdcan::config::FrameTransmissionConfig::ClassicCanOnly;
use fdcan::config::InterruptLine;
use fdcan::interrupt::{Interrupt, Interrupts};
use fdcan::{self, Fifo0, NormalOperationMode, ReceiveOverrun};
use fdcan::config::{NominalBitTiming, StandardFilterSlot};
use fdcan::filter::StandardFilter;

use crate::bridge_queue::BridgeQueue;
use crate::can_record::CanRecord;

/// Owns the FDCAN peripheral split halves and bridges them to the software
/// queues. `tx_queue` carries records toward the radio (local CAN -> peer);
/// `rx_queue` carries records arriving from the radio, destined for the
/// local bus.
pub struct CanBridge<I: fdcan::Instance, const QT: usize, const QR: usize> {
    control: fdcan::FdCanControl<I, NormalOperationMode>,
    hw_rx: fdcan::Rx<I, NormalOperationMode, Fifo0>,
    hw_tx: fdcan::Tx<I, NormalOperationMode>,
}

impl<I: fdcan::Instance, const QT: usize, const QR: usize> CanBridge<I, QT, QR> {
    pub fn init(mut can: fdcan::FdCan<I, fdcan::ConfigMode>, bit_timings: &can_bit_timings::CanBitTiming) -> Self {
        defmt::debug!(
            "CAN prescaler {} bs1 {} bs2 {} sjw {}",
            bit_timings.prescaler,
            bit_timings.bs1,
            bit_timings.bs2,
            bit_timings.sjw
        );
        let btr = NominalBitTiming {
            prescaler: bit_timings.prescaler.try_into().unwrap(),
            seg1: bit_timings.bs1.try_into().unwrap(),
            seg2: bit_timings.bs2.try_into().unwrap(),
            sync_jump_width: bit_timings.sjw.try_into().unwrap(),
        };
        can.set_nominal_bit_timing(btr);
        can.set_standard_filter(StandardFilterSlot::_0, StandardFilter::accept_all_into_fifo0());
        can.set_frame_transmit(ClassicCanOnly);
        can.enable_interrupt_line(InterruptLine::_1, true);
        can.enable_interrupts(Interrupts::RX_FIFO0_NEW_MSG | Interrupts::ERR_PASSIVE | Interrupts::BUS_OFF);

        let (control, hw_tx, hw_rx, _hw_rx1) = can.into_normal().split();
        Self { control, hw_rx, hw_tx }
    }

    /// Call from the FDCAN interrupt task.
    pub fn on_irq(&mut self, tx_queue: &BridgeQueue<QT>) {
        if self.control.has_interrupt(Interrupt::RxFifo0NewMsg) {
            self.control.clear_interrupt(Interrupt::RxFifo0NewMsg);
            self.poll_rx(tx_queue);
        }
        if self.control.has_interrupt(Interrupt::ErrPassive) {
            self.control.clear_interrupt(Interrupt::ErrPassive);
            defmt::error!("CAN peripheral in Error Passive");
        }
        if self.control.has_interrupt(Interrupt::BusOff) {
            self.control.clear_interrupt(Interrupt::BusOff);
            defmt::error!("CAN peripheral in Bus Off");
        }
    }

    /// Non-blocking: pull any frame waiting in the hardware RX FIFO and push
    /// it onto `tx_queue` (the queue carrying traffic toward the radio).
    fn poll_rx(&mut self, tx_queue: &BridgeQueue<QT>) {
        let frame = match self.hw_rx.receive_frame() {
            Ok(ReceiveOverrun::NoOverrun(frame)) => frame,
            Ok(ReceiveOverrun::Overrun(frame)) => {
                defmt::warn!("CAN RX overrun reported");
                frame
            }
            Err(_) => return, // RX IRQ fired with nothing to read
        };
        let rec = CanRecord::new(frame.id(), frame.data()).unwrap_or(CanRecord::EMPTY);
        tx_queue.push(rec);
    }

    /// Drain `rx_queue` (records that arrived over the radio) onto the local
    /// bus, while the hardware TX mailboxes have room. Call from the main
    /// loop at the same cadence as the TDMA tick.
    pub fn drain_tx(&mut self, rx_queue: &BridgeQueue<QR>) {
        while let Some(rec) = rx_queue.try_pop() {
            match self.hw_tx.transmit(&rec) {
                Ok(_preempted) => {}
                Err(nb::Error::WouldBlock) => {
                    // No free mailbox; bridge queues don't hold a frame back
                    // for manual retry, so log and move on.
                    defmt::warn!("CAN TX mailboxes full, dropping record id={:#x}", rec.id());
                    break;
                }
                Err(nb::Error::Other(_)) => {
                    defmt::error!("CAN TX error for record id={:#x}", rec.id());
                }
            }
        }
    }
}
