//! Read-only diagnostics snapshot assembled from the core's counters, and
//! logged at a slow rate by the firmware wiring (mirroring the `log_info`
//! task of the firmware this crate was adapted from).

use crate::bridge_queue::BridgeQueue;
use crate::config::Role;
use crate::radio::{RadioDriver, RadioTransport};
use crate::tdma::TdmaScheduler;

#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct Diagnostics {
    pub role: Role,
    pub synced: bool,
    pub frame_seq: u16,
    pub clock_offset_us: i32,
    pub tx_queue_len: usize,
    pub tx_queue_overwrites: u32,
    pub rx_queue_len: usize,
    pub rx_queue_overwrites: u32,
    pub radio_tx_timeouts: u32,
    pub radio_crc_errors: u32,
}

impl Diagnostics {
    pub fn snapshot<const QT: usize, const QR: usize, D: RadioDriver>(
        scheduler: &TdmaScheduler,
        tx_queue: &BridgeQueue<QT>,
        rx_queue: &BridgeQueue<QR>,
        transport: &RadioTransport<D>,
    ) -> Self {
        Self {
            role: scheduler.role(),
            synced: scheduler.synced(),
            frame_seq: scheduler.frame_seq(),
            clock_offset_us: scheduler.clock_offset_us(),
            tx_queue_len: tx_queue.len(),
            tx_queue_overwrites: tx_queue.overwrites(),
            rx_queue_len: rx_queue.len(),
            rx_queue_overwrites: rx_queue.overwrites(),
            radio_tx_timeouts: transport.tx_timeouts(),
            radio_crc_errors: transport.crc_errors(),
        }
    }

    pub fn log(&self) {
        defmt::info!(
            "tdma: role={} synced={} frame_seq={} offset_us={} tx(len={} ovw={}) rx(len={} ovw={}) radio(timeouts={} crc_err={})",
            self.role,
            self.synced,
            self.frame_seq,
            self.clock_offset_us,
            self.tx_queue_len,
            self.tx_queue_overwrites,
            self.rx_queue_len,
            self.rx_queue_overwrites,
            self.radio_tx_timeouts,
            self.radio_crc_errors,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can_record::CanRecord;
    use crate::config::FrameProfile;
    use crate::radio::IrqStatus;

    #[derive(Default)]
    struct NullDriver;

    impl RadioDriver for NullDriver {
        type Error = ();
        fn start_rx(&mut self) -> Result<(), ()> { Ok(()) }
        fn start_tx(&mut self, _buf: &[u8]) -> Result<(), ()> { Ok(()) }
        fn idle(&mut self) -> Result<(), ()> { Ok(()) }
        fn irq_status(&mut self) -> IrqStatus { IrqStatus::default() }
        fn read_packet(&mut self, _buf: &mut [u8]) -> Result<usize, ()> { Ok(0) }
        fn time_on_air_us(&self, _len: usize) -> u32 { 0 }
    }

    #[test]
    fn snapshot_reflects_queue_and_scheduler_state() {
        let profile = FrameProfile::default_100ms();
        let sched = TdmaScheduler::new(Role::Master, profile, 0);
        let tx: BridgeQueue<4> = BridgeQueue::new();
        let rx: BridgeQueue<4> = BridgeQueue::new();
        tx.push(CanRecord::new_std(1, &[]).unwrap());
        let transport = RadioTransport::new(NullDriver);

        let snap = Diagnostics::snapshot(&sched, &tx, &rx, &transport);
        assert_eq!(snap.role, Role::Master);
        assert!(snap.synced);
        assert_eq!(snap.tx_queue_len, 1);
        assert_eq!(snap.rx_queue_len, 0);
    }
}
