//! Frame geometry, link roles and per-role record/payload budgets,
//! configured once at startup and never mutated afterward.

/// Which side of the link this node plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Role {
    /// Defines the frame clock; always synced, offset always zero.
    Master,
    /// Disciplines its frame clock to the Master's DOWNLINK beacons.
    Follower,
}

/// Which window of the frame is currently active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Slot {
    Guard,
    Downlink,
    Uplink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ConfigError {
    /// One of `guard_us`/`downlink_us`/`uplink_us` was zero.
    ZeroWindow,
    /// A payload budget exceeds the wire limit for an 8-byte header plus
    /// as many 13-byte records as fit in a maximum-size radio packet.
    PayloadBudgetTooLarge,
}

/// Wire limit: an 8-byte header plus as many 13-byte records as fit.
pub const MAX_PAYLOAD_LEN: usize = 208;

#[derive(Clone, Copy, Debug)]
struct SlotWindow {
    slot: Slot,
    start_us: u32,
    end_us: u32,
}

/// Frame geometry and per-role record/payload budgets for one TDMA link.
///
/// `GUARD(g) DOWNLINK(d) GUARD(g) UPLINK(u)`, cycling every `F = 2g + d + u`
/// microseconds.
#[derive(Clone, Copy, Debug)]
pub struct FrameProfile {
    frame_us: u32,
    guard_us: u32,
    downlink_us: u32,
    master_max_records: u8,
    master_payload_budget: usize,
    follower_max_records: u8,
    follower_payload_budget: usize,
    sync_timeout_frames: u32,
    windows: [SlotWindow; 4],
}

impl FrameProfile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guard_us: u32,
        downlink_us: u32,
        uplink_us: u32,
        master_max_records: u8,
        master_payload_budget: usize,
        follower_max_records: u8,
        follower_payload_budget: usize,
        sync_timeout_frames: u32,
    ) -> Result<Self, ConfigError> {
        if guard_us == 0 || downlink_us == 0 || uplink_us == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if master_payload_budget > MAX_PAYLOAD_LEN || follower_payload_budget > MAX_PAYLOAD_LEN {
            return Err(ConfigError::PayloadBudgetTooLarge);
        }

        let frame_us = guard_us
            .wrapping_add(downlink_us)
            .wrapping_add(guard_us)
            .wrapping_add(uplink_us);

        let windows = [
            SlotWindow { slot: Slot::Guard, start_us: 0, end_us: guard_us },
            SlotWindow { slot: Slot::Downlink, start_us: guard_us, end_us: guard_us + downlink_us },
            SlotWindow {
                slot: Slot::Guard,
                start_us: guard_us + downlink_us,
                end_us: guard_us + downlink_us + guard_us,
            },
            SlotWindow {
                slot: Slot::Uplink,
                start_us: guard_us + downlink_us + guard_us,
                end_us: frame_us,
            },
        ];

        Ok(Self {
            frame_us,
            guard_us,
            downlink_us,
            master_max_records,
            master_payload_budget,
            follower_max_records,
            follower_payload_budget,
            sync_timeout_frames,
            windows,
        })
    }

    /// The default 100 ms profile: 10 ms guards, 60 ms DOWNLINK, 20 ms UPLINK.
    pub fn default_100ms() -> Self {
        Self::new(10_000, 60_000, 20_000, 2, 34, 16, 208, 10)
            .expect("default profile parameters are valid")
    }

    pub fn frame_us(&self) -> u32 {
        self.frame_us
    }

    pub fn guard_us(&self) -> u32 {
        self.guard_us
    }

    pub fn downlink_us(&self) -> u32 {
        self.downlink_us
    }

    pub fn sync_timeout_frames(&self) -> u32 {
        self.sync_timeout_frames
    }

    pub(crate) fn records_budget(&self, role: Role) -> (u8, usize) {
        match role {
            Role::Master => (self.master_max_records, self.master_payload_budget),
            Role::Follower => (self.follower_max_records, self.follower_payload_budget),
        }
    }

    pub(crate) fn slot_for(&self, elapsed_us: u32) -> Slot {
        for w in &self.windows {
            if elapsed_us >= w.start_us && elapsed_us < w.end_us {
                return w.slot;
            }
        }
        // elapsed_us is always reduced mod frame_us before this is called;
        // the windows tile [0, frame_us) exactly, so this is unreachable in
        // practice. Fall back to GUARD rather than panicking on a tick.
        Slot::Guard
    }
}
