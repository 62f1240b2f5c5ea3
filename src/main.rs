#![no_main]
#![no_std]

use tdma_bridge as _; // panic handler, global logger, memory layout

use tdma_bridge::bridge_queue;
use tdma_bridge::radio;

/// Number of queued CAN records in each direction. Sized well above the
/// per-frame budget so a burst on the local bus survives a full TDMA frame
/// before the overwrite-oldest policy engages.
const QUEUE_DEPTH: usize = 64;

static TX_QUEUE: bridge_queue::BridgeQueue<QUEUE_DEPTH> = bridge_queue::BridgeQueue::new();
static RX_QUEUE: bridge_queue::BridgeQueue<QUEUE_DEPTH> = bridge_queue::BridgeQueue::new();

/// Placeholder for the physical packet radio (SX1280/FLRC class transceiver
/// or similar). SPI wiring, DIO pin binding and modulation configuration are
/// an integration task left to whoever ports this firmware onto a board;
/// swap this out for a real driver implementing [`radio::RadioDriver`].
pub struct StubRadio;

impl radio::RadioDriver for StubRadio {
    type Error = ();

    fn start_rx(&mut self) -> Result<(), ()> {
        todo!("bind a concrete radio driver's start_rx")
    }

    fn start_tx(&mut self, _buf: &[u8]) -> Result<(), ()> {
        todo!("bind a concrete radio driver's start_tx")
    }

    fn idle(&mut self) -> Result<(), ()> {
        todo!("bind a concrete radio driver's idle")
    }

    fn irq_status(&mut self) -> radio::IrqStatus {
        todo!("bind a concrete radio driver's irq_status")
    }

    fn read_packet(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        todo!("bind a concrete radio driver's read_packet")
    }

    fn time_on_air_us(&self, _len: usize) -> u32 {
        todo!("bind a concrete radio driver's time_on_air_us")
    }
}

#[rtic::app(
    device = stm32g4xx_hal::stm32,
    dispatchers = [USBWAKEUP, COMP1_2_3, COMP4_5_6, COMP7]
)]
mod app {
    use fugit::ExtU32;
    use fugit::RateExtU32;
    use rtic::Mutex;
    use rtic_monotonics::Monotonic;

    use tdma_bridge::can_bridge::CanBridge;
    use tdma_bridge::config::FrameProfile;
    use tdma_bridge::diagnostics::Diagnostics;
    use tdma_bridge::every::Every;
    use tdma_bridge::hardware::{self, Mono};
    use tdma_bridge::radio::RadioTransport;
    use tdma_bridge::tdma::TdmaScheduler;

    use crate::{StubRadio, RX_QUEUE, TX_QUEUE};

    #[shared]
    struct Shared {
        transport: RadioTransport<StubRadio>,
        scheduler: TdmaScheduler,
        can_bridge: CanBridge<hardware::PCAN, { crate::QUEUE_DEPTH }, { crate::QUEUE_DEPTH }>,
    }

    #[local]
    struct Local {}

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        defmt::info!("init");

        let hardware::Board { pcan_config, can_timing_500kbps, role_strap } =
            hardware::init(cx.core, cx.device);

        let role = hardware::read_role(&role_strap);
        defmt::info!("tdma role: {}", role);

        let can_bridge = CanBridge::init(pcan_config, &can_timing_500kbps);
        let mut transport = RadioTransport::new(StubRadio);
        if transport.start_rx().is_err() {
            defmt::error!("radio init: start_rx failed");
        }

        let now_us = Mono::now().duration_since_epoch().to_micros();
        let scheduler = TdmaScheduler::new(role, FrameProfile::default_100ms(), now_us);

        tdma_tick::spawn().unwrap();
        log_info::spawn().unwrap();

        (Shared { transport, scheduler, can_bridge }, Local {})
    }

    /// Drives the frame/slot state machine, drains radio-bound CAN records
    /// into an outgoing packet at slot boundaries, and drains packets
    /// received from the radio back onto the local bus. Cadence must be at
    /// or below the profile's guard width (1ms is comfortably below the
    /// default 10ms guard).
    #[task(shared = [transport, scheduler, can_bridge], priority = 4)]
    async fn tdma_tick(mut cx: tdma_tick::Context) {
        let mut tick = Every::new(1_000.Hz());
        loop {
            tick.next().await;
            let now_us = Mono::now().duration_since_epoch().to_micros();

            cx.shared.can_bridge.lock(|can_bridge| can_bridge.drain_tx(&RX_QUEUE));

            cx.shared.transport.lock(|transport| {
                cx.shared.scheduler.lock(|scheduler| {
                    scheduler.update(now_us, transport, &TX_QUEUE);

                    let mut buf = [0u8; tdma_bridge::config::MAX_PAYLOAD_LEN];
                    if let Some((len, rx_time_us)) = transport.poll_irq(&mut buf) {
                        scheduler.process_rx(&buf[..len], rx_time_us, &RX_QUEUE);
                    }
                });
            });
        }
    }

    // FDCAN_INTR0_IT and FDCAN_INTR1_IT are swapped, until stm32g4 crate
    // updates to include https://github.com/stm32-rs/stm32-rs/pull/996
    #[task(binds = FDCAN1_INTR1_IT, shared = [can_bridge], priority = 6)]
    fn can_irq(mut cx: can_irq::Context) {
        cx.shared.can_bridge.lock(|can_bridge| can_bridge.on_irq(&TX_QUEUE));
    }

    #[task(shared = [transport, scheduler], priority = 0)]
    async fn log_info(mut cx: log_info::Context) {
        loop {
            Mono::delay(2.secs()).await;

            cx.shared.transport.lock(|transport| {
                cx.shared.scheduler.lock(|scheduler| {
                    Diagnostics::snapshot(scheduler, &TX_QUEUE, &RX_QUEUE, transport).log();
                });
            });
        }
    }
}
