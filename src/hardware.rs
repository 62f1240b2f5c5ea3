//! Board-level bring-up: clocks, the FDCAN peripheral and the role-strap
//! pin. Concrete radio wiring (SPI, DIO pins, reset/busy lines) is left to
//! the integrator, since the radio driver itself is outside this crate's
//! scope.

use fdcan::ConfigMode;
use fdcan::FdCan;
use fugit::RateExtU32;
use hal::gpio::gpioa;
use hal::gpio::Floating;
use hal::gpio::Input;
use stm32g4xx_hal as hal;
use stm32g4xx_hal::can::CanExt;
use stm32g4xx_hal::gpio::GpioExt;
use stm32g4xx_hal::gpio::Speed;
use stm32g4xx_hal::pwr::PwrExt;
use stm32g4xx_hal::rcc;
use stm32g4xx_hal::rcc::{PllConfig, RccExt};
use stm32g4xx_hal::stm32;

use crate::config::Role;

pub type PCAN = hal::can::Can<hal::stm32::FDCAN1>;

/// Sampled once at boot to pick which [`Role`] this binary image plays, so
/// the same firmware runs on either node of the link.
pub type RoleStrapInput = gpioa::PA0<Input<Floating>>;

pub struct Board {
    pub pcan_config: FdCan<PCAN, ConfigMode>,
    pub can_timing_500kbps: can_bit_timings::CanBitTiming,
    pub role_strap: RoleStrapInput,
}

pub const MONOTONIC_FREQUENCY: u32 = 1_000;
rtic_monotonics::systick_monotonic!(Mono, MONOTONIC_FREQUENCY);

pub fn init(core: cortex_m::Peripherals, dp: stm32::Peripherals) -> Board {
    defmt::info!("hardware init");

    let rcc = dp.RCC.constrain();

    let pll_config = PllConfig {
        mux: rcc::PllSrc::HSE(24_u32.MHz()),
        n: rcc::PllNMul::MUL_32,
        m: rcc::PllMDiv::DIV_3,
        r: Some(rcc::PllRDiv::DIV_2), // sysclock = 24MHz*32/3/2 = 128MHz
        q: None,
        p: None,
    };
    let clock_config = rcc::Config::default()
        .pll_cfg(pll_config)
        .clock_src(rcc::SysClockSrc::PLL)
        .ahb_psc(rcc::Prescaler::NotDivided)
        .apb1_psc(rcc::Prescaler::Div2)
        .apb2_psc(rcc::Prescaler::Div2);

    let pwr = dp.PWR.constrain().freeze();
    let mut rcc = rcc.freeze(clock_config, pwr);

    Mono::start(core.SYST, rcc.clocks.sys_clk.to_Hz());

    unsafe {
        let flash = &(*stm32::FLASH::ptr());
        flash.acr.modify(|_, w| w.latency().bits(0b1000)); // 8 wait states at 128MHz
    }

    let gpioa = dp.GPIOA.split(&mut rcc);

    assert!(rcc.clocks.apb1_clk.to_MHz() == 64); // can_timings! requires a literal
    let can_timing_500kbps = can_bit_timings::can_timings!(64.mhz(), 500.khz());

    let pcan_config = {
        let rx = gpioa.pa11.into_alternate().set_speed(Speed::VeryHigh);
        let tx = gpioa.pa12.into_alternate().set_speed(Speed::VeryHigh);
        dp.FDCAN1.fdcan(tx, rx, &rcc)
    };

    let role_strap = gpioa.pa0.into_floating_input();

    Board { pcan_config, can_timing_500kbps, role_strap }
}

/// Read the role-strap pin. A static strap is valid only at power-on, so
/// this is a single unfiltered read with no debounce.
pub fn read_role(pin: &RoleStrapInput) -> Role {
    use embedded_hal::digital::v2::InputPin;
    if pin.is_high().unwrap_or(false) {
        Role::Master
    } else {
        Role::Follower
    }
}
