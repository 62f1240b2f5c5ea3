//! TDMA frame/slot state machine: drives the radio per slot, disciplines a
//! Follower's frame clock from Master DOWNLINK beacons, and packs/unpacks
//! payloads to and from the bridge queues.
//!
//! Ported from the `tdmaUpdate`/`tdmaEnterSlot`/`processHeader`/`tdmaProcessRx`
//! functions of the implementation this crate replaces; the elapsed/rollover
//! arithmetic, the GUARD-is-a-no-op slot transition, and the
//! `epoch_us - (rx_time_us - (g + d/2))` sync estimate all follow that
//! source directly.

use byteorder::{ByteOrder, LittleEndian};

use crate::bridge_queue::BridgeQueue;
use crate::can_record::{self, CanRecord};
use crate::config::{FrameProfile, Role, Slot};
use crate::radio::{RadioDriver, RadioTransport};

/// `slot_id(1) ++ frame_seq(2) ++ epoch_us(4) ++ num_records(1)`.
const HEADER_LEN: usize = 8;

struct TdmaHeader {
    slot_id: u8,
    frame_seq: u16,
    epoch_us: u32,
    num_records: u8,
}

impl TdmaHeader {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.slot_id;
        LittleEndian::write_u16(&mut buf[1..3], self.frame_seq);
        LittleEndian::write_u32(&mut buf[3..7], self.epoch_us);
        buf[7] = self.num_records;
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            slot_id: buf[0],
            frame_seq: LittleEndian::read_u16(&buf[1..3]),
            epoch_us: LittleEndian::read_u32(&buf[3..7]),
            num_records: buf[7],
        }
    }
}

fn slot_id_known(id: u8) -> bool {
    id == Slot::Guard as u8 || id == Slot::Downlink as u8 || id == Slot::Uplink as u8
}

/// Process-wide TDMA scheduler. One instance exists per node; `update` and
/// `process_rx` are expected to both run from the same main-loop context, so
/// no internal locking is needed.
pub struct TdmaScheduler {
    role: Role,
    profile: FrameProfile,
    current_slot: Slot,
    frame_seq: u16,
    frame_start_us: u32,
    clock_offset_us: i32,
    last_sync_us: u32,
    synced: bool,
}

impl TdmaScheduler {
    pub fn new(role: Role, profile: FrameProfile, now_us: u32) -> Self {
        let (frame_start_us, synced) = match role {
            Role::Master => (now_us, true),
            Role::Follower => (0, false),
        };
        defmt::info!("tdma: init role={}", role);
        Self {
            role,
            profile,
            current_slot: Slot::Guard,
            frame_seq: 0,
            frame_start_us,
            clock_offset_us: 0,
            last_sync_us: now_us,
            synced,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn synced(&self) -> bool {
        self.synced
    }

    pub fn frame_seq(&self) -> u16 {
        self.frame_seq
    }

    pub fn clock_offset_us(&self) -> i32 {
        self.clock_offset_us
    }

    pub fn current_slot(&self) -> Slot {
        self.current_slot
    }

    fn now_shared(&self, now_us: u32) -> i64 {
        now_us as i64 + self.clock_offset_us as i64
    }

    /// `max(0, now_shared - frame_start_us)`, in wide signed arithmetic so a
    /// Follower whose frame clock was just nudged ahead of `now_us` by a
    /// fresh sync never sees this come out negative-but-wrapped-huge.
    fn elapsed(&self, now_us: u32) -> u32 {
        (self.now_shared(now_us) - self.frame_start_us as i64).max(0) as u32
    }

    /// Advance the frame/slot state machine. Must be called at a cadence at
    /// or below the guard width. Drives radio mode changes via `transport`
    /// and consumes queued CAN records from `tx_queue` when entering a slot
    /// that transmits.
    pub fn update<const QT: usize, D: RadioDriver>(
        &mut self,
        now_us: u32,
        transport: &mut RadioTransport<D>,
        tx_queue: &BridgeQueue<QT>,
    ) {
        if self.role == Role::Follower && self.synced {
            let since_sync = now_us.wrapping_sub(self.last_sync_us);
            let timeout = self.profile.frame_us().saturating_mul(self.profile.sync_timeout_frames());
            if since_sync >= timeout {
                defmt::warn!("tdma: sync lost, no DOWNLINK for {} us", since_sync);
                self.synced = false;
                self.clock_offset_us = 0;
                self.frame_start_us = now_us;
                if transport.start_rx().is_err() {
                    defmt::error!("tdma: start_rx after sync loss failed");
                }
            }
        }

        let mut elapsed = self.elapsed(now_us);
        let mut frames_advanced: u32 = 0;
        while elapsed >= self.profile.frame_us() {
            self.frame_start_us = self.frame_start_us.wrapping_add(self.profile.frame_us());
            self.frame_seq = self.frame_seq.wrapping_add(1);
            elapsed = self.elapsed(now_us);
            frames_advanced += 1;
        }
        if frames_advanced > 1 {
            defmt::warn!("tdma: missed {} frame(s), catching up", frames_advanced - 1);
        }

        // A rollover always lands `elapsed` back inside the leading GUARD
        // window, so the lookup below re-enters GUARD on its own; no
        // separate transition is needed here.
        let slot = self.profile.slot_for(elapsed);
        if slot != self.current_slot {
            self.enter_slot(slot, now_us, transport, tx_queue);
        }
    }

    fn enter_slot<const QT: usize, D: RadioDriver>(
        &mut self,
        slot: Slot,
        now_us: u32,
        transport: &mut RadioTransport<D>,
        tx_queue: &BridgeQueue<QT>,
    ) {
        self.current_slot = slot;
        defmt::debug!("tdma: enter slot {} frame_seq={}", slot, self.frame_seq);

        match (self.role, slot) {
            (_, Slot::Guard) => {
                // Both radios are already in the mode the next slot needs:
                // the Master finishes its DOWNLINK TX into RX on TX_DONE,
                // the Follower is already listening. Changing modes here
                // would waste the guard.
            }
            (Role::Master, Slot::Downlink) => {
                let mut buf = [0u8; crate::config::MAX_PAYLOAD_LEN];
                let len = self.build_payload(&mut buf, true, tx_queue);
                if let Err(_e) = transport.transmit(&buf[..len], now_us) {
                    defmt::warn!("tdma: DOWNLINK transmit skipped, radio busy");
                }
            }
            (Role::Master, Slot::Uplink) => {
                if transport.start_rx().is_err() {
                    defmt::error!("tdma: start_rx for UPLINK failed");
                }
            }
            (Role::Follower, Slot::Downlink) => {
                if transport.start_rx().is_err() {
                    defmt::error!("tdma: start_rx for DOWNLINK failed");
                }
            }
            (Role::Follower, Slot::Uplink) => {
                if self.synced && !tx_queue.is_empty() {
                    let mut buf = [0u8; crate::config::MAX_PAYLOAD_LEN];
                    let len = self.build_payload(&mut buf, false, tx_queue);
                    if let Err(_e) = transport.transmit(&buf[..len], now_us) {
                        defmt::warn!("tdma: UPLINK transmit skipped, radio busy");
                    }
                }
            }
        }
    }

    fn build_payload<const QT: usize>(
        &self,
        buf: &mut [u8],
        with_header: bool,
        tx_queue: &BridgeQueue<QT>,
    ) -> usize {
        let (max_records, payload_budget) = self.profile.records_budget(self.role);
        let budget = payload_budget.min(buf.len());

        let mut offset = if with_header { HEADER_LEN } else { 0 };
        let mut packed: u8 = 0;
        while packed < max_records && offset + can_record::WIRE_LEN <= budget {
            let Some(rec) = tx_queue.try_pop() else { break };
            offset += rec.write_to(&mut buf[offset..offset + can_record::WIRE_LEN]);
            packed += 1;
        }

        if with_header {
            let hdr = TdmaHeader {
                slot_id: Slot::Downlink as u8,
                frame_seq: self.frame_seq,
                epoch_us: self.frame_start_us,
                num_records: packed,
            };
            hdr.write_to(&mut buf[..HEADER_LEN]);
        }

        offset
    }

    /// Parse a received packet and push any CAN records it carries onto
    /// `rx_queue`. For a Follower receiving a DOWNLINK, this is also where
    /// the frame clock is disciplined.
    pub fn process_rx<const QR: usize>(&mut self, buf: &[u8], rx_time_us: u32, rx_queue: &BridgeQueue<QR>) {
        match self.role {
            Role::Master => self.extract_records(buf, 0, rx_queue),
            Role::Follower => {
                if buf.len() < HEADER_LEN {
                    defmt::warn!("tdma: DOWNLINK packet too short ({} bytes)", buf.len());
                    return;
                }
                let hdr = TdmaHeader::read_from(buf);
                if !slot_id_known(hdr.slot_id) {
                    defmt::warn!("tdma: unknown slot_id {} in header, dropping", hdr.slot_id);
                    return;
                }
                if hdr.slot_id == Slot::Downlink as u8 {
                    self.sync_from_header(&hdr, rx_time_us);
                }
                self.extract_records(buf, HEADER_LEN, rx_queue);
            }
        }
    }

    fn sync_from_header(&mut self, hdr: &TdmaHeader, rx_time_us: u32) {
        let downlink_bias = self.profile.guard_us() + self.profile.downlink_us() / 2;
        let rx_est = if rx_time_us > downlink_bias {
            rx_time_us - downlink_bias
        } else {
            rx_time_us
        };

        let offset = hdr.epoch_us as i64 - rx_est as i64;
        self.clock_offset_us = offset as i32;
        self.frame_seq = hdr.frame_seq;
        self.frame_start_us = hdr.epoch_us;
        self.synced = true;
        self.last_sync_us = rx_time_us;

        defmt::info!(
            "tdma: synced frame_seq={} offset_us={}",
            self.frame_seq,
            self.clock_offset_us
        );
    }

    fn extract_records<const QR: usize>(&self, buf: &[u8], start: usize, rx_queue: &BridgeQueue<QR>) {
        let mut offset = start;
        while offset + can_record::WIRE_LEN <= buf.len() {
            match CanRecord::read_from(&buf[offset..]) {
                Some((rec, used)) => {
                    rx_queue.push(rec);
                    offset += used;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{IrqStatus, RadioDriver};

    #[derive(Default)]
    struct NullDriver;

    impl RadioDriver for NullDriver {
        type Error = ();
        fn start_rx(&mut self) -> Result<(), ()> { Ok(()) }
        fn start_tx(&mut self, _buf: &[u8]) -> Result<(), ()> { Ok(()) }
        fn idle(&mut self) -> Result<(), ()> { Ok(()) }
        fn irq_status(&mut self) -> IrqStatus { IrqStatus::default() }
        fn read_packet(&mut self, _buf: &mut [u8]) -> Result<usize, ()> { Ok(0) }
        fn time_on_air_us(&self, _len: usize) -> u32 { 1_000 }
    }

    fn profile() -> FrameProfile {
        FrameProfile::new(10_000, 60_000, 20_000, 2, 34, 16, 208, 10).unwrap()
    }

    #[test]
    fn cold_follower_sync_with_no_skew() {
        let mut sched = TdmaScheduler::new(Role::Follower, profile(), 0);
        let rx: BridgeQueue<32> = BridgeQueue::new();
        let hdr = TdmaHeader {
            slot_id: Slot::Downlink as u8,
            frame_seq: 42,
            epoch_us: 1_000_000,
            num_records: 0,
        };
        let mut buf = [0u8; HEADER_LEN];
        hdr.write_to(&mut buf);

        sched.process_rx(&buf, 1_040_000, &rx);

        assert_eq!(sched.clock_offset_us(), 0);
        assert!(sched.synced());
        assert_eq!(sched.frame_seq(), 42);
    }

    #[test]
    fn sync_with_skew_computes_signed_offset() {
        let mut sched = TdmaScheduler::new(Role::Follower, profile(), 0);
        let rx: BridgeQueue<32> = BridgeQueue::new();
        let hdr = TdmaHeader {
            slot_id: Slot::Downlink as u8,
            frame_seq: 42,
            epoch_us: 1_000_000,
            num_records: 0,
        };
        let mut buf = [0u8; HEADER_LEN];
        hdr.write_to(&mut buf);

        sched.process_rx(&buf, 1_050_000, &rx);

        assert_eq!(sched.clock_offset_us(), -10_000);
    }

    #[test]
    fn sync_timeout_drops_follower_to_unsynced() {
        let mut sched = TdmaScheduler::new(Role::Follower, profile(), 0);
        let tx: BridgeQueue<32> = BridgeQueue::new();
        let rx: BridgeQueue<32> = BridgeQueue::new();
        let mut transport = RadioTransport::new(NullDriver);

        let hdr = TdmaHeader {
            slot_id: Slot::Downlink as u8,
            frame_seq: 1,
            epoch_us: 0,
            num_records: 0,
        };
        let mut buf = [0u8; HEADER_LEN];
        hdr.write_to(&mut buf);
        sched.process_rx(&buf, 0, &rx);
        assert!(sched.synced());

        // 10 * F = 10 * 100_000 = 1_000_000 us
        sched.update(1_000_001, &mut transport, &tx);
        assert!(!sched.synced());
    }

    #[test]
    fn uplink_without_sync_does_not_transmit_or_drain_queue() {
        let mut sched = TdmaScheduler::new(Role::Follower, profile(), 0);
        let tx: BridgeQueue<32> = BridgeQueue::new();
        tx.push(CanRecord::new_std(1, &[]).unwrap());
        let mut transport = RadioTransport::new(NullDriver);

        // Drive straight into the UPLINK window without ever syncing.
        sched.update(80_000, &mut transport, &tx);

        assert_eq!(sched.current_slot(), Slot::Uplink);
        assert_eq!(tx.len(), 1); // nothing was drained
    }

    #[test]
    fn master_downlink_then_follower_unpacks_records_in_order() {
        // Master budget of {2, 34} only fits 2 records per DOWNLINK; widen it
        // here so all 3 queued records go out in one packet.
        let roomy = FrameProfile::new(10_000, 60_000, 20_000, 8, 34 + 5 * 13, 16, 208, 10).unwrap();
        let mut master = TdmaScheduler::new(Role::Master, roomy, 0);
        let master_tx: BridgeQueue<32> = BridgeQueue::new();
        master_tx.push(CanRecord::new_std(0xA, &[1]).unwrap());
        master_tx.push(CanRecord::new_std(0xB, &[2]).unwrap());
        master_tx.push(CanRecord::new_std(0xC, &[3]).unwrap());

        let mut buf = [0u8; crate::config::MAX_PAYLOAD_LEN];
        let len = master.build_payload(&mut buf, true, &master_tx);

        let mut follower = TdmaScheduler::new(Role::Follower, profile(), 0);
        let follower_rx: BridgeQueue<32> = BridgeQueue::new();
        follower.process_rx(&buf[..len], 1_000, &follower_rx);

        let ids: std::vec::Vec<u32> = core::iter::from_fn(|| follower_rx.try_pop().map(|r| r.id()))
            .collect();
        assert_eq!(ids, std::vec![0xA, 0xB, 0xC]);
    }
}
