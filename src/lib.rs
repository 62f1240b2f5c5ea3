#![cfg_attr(not(test), no_std)]

#[cfg(not(test))]
use defmt_brtt as _; // global logger
#[cfg(not(test))]
use panic_probe as _;
#[cfg(not(test))]
use stm32g4xx_hal as _; // memory layout

pub mod bridge_queue;
pub mod can_record;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod radio;
pub mod tdma;

#[cfg(not(test))]
pub mod can_bridge;
#[cfg(not(test))]
pub mod every;
#[cfg(not(test))]
pub mod hardware;

// Common type aliases for fugit Duration/Instant/Rate, based on the
// firmware's 1ms tick period. Only meaningful once `hardware::Mono` exists.
#[cfg(not(test))]
pub(crate) type Duration = fugit::Duration<u32, 1, 1000>;
#[cfg(not(test))]
pub(crate) type Instant = fugit::Instant<u32, 1, 1000>;
#[cfg(not(test))]
pub(crate) type Rate = fugit::Rate<u32, 1, 1000>;

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[cfg(not(test))]
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

#[cfg(not(test))]
static COUNT: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);
#[cfg(not(test))]
defmt::timestamp!("{=usize}", {
    // NOTE(no-CAS) `timestamps` runs with interrupts disabled
    let n = COUNT.load(core::sync::atomic::Ordering::Relaxed);
    COUNT.store(n + 1, core::sync::atomic::Ordering::Relaxed);
    n
});

/// Terminates the application and makes `probe-rs` exit with exit-code = 0
#[cfg(not(test))]
pub fn exit() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}
