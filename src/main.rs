// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loopback firmware for RP2040 boards.
//!
//! Brings up the clocks, hands the USB controller to the protocol engine in
//! `usb_loopback::rp2040`, and then spins servicing the loopback device
//! forever. No interrupts; everything happens from the main loop.
//!
//! The LED is lit while the host has the device configured.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use usb_loopback::rp2040::{ActivityPins, Rp2040Bus};
use usb_loopback::LoopbackDevice;

// GPIO numbers of pins used here, other than USB. The engine raises the
// activity pins while it handles the matching event, so that you can watch
// the event flow on a logic analyzer.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        const LED_PIN: u8 = 25; // configured
        const SETUP_PIN: u8 = 0; // SETUP request being handled
        const BUFF_PIN: u8 = 1; // activity on a buffer
        const RESET_PIN: u8 = 2; // bus reset!
    } else if #[cfg(feature = "target-feather")] {
        const LED_PIN: u8 = 13; // configured
        const SETUP_PIN: u8 = 0;
        const BUFF_PIN: u8 = 1;
        const RESET_PIN: u8 = 2;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

// The second-stage bootloader goes in the first 256 bytes of flash, where
// the boot ROM looks for it. `memory.x` places the section.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-feather")] {
        // GigaDevice flash on the Adafruit board.
        #[link_section = ".boot_loader"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GD25Q64CS;
    } else {
        // Winbond W25Q080 on the Pi Pico.
        #[link_section = ".boot_loader"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    }
}

#[entry]
fn main() -> ! {
    // Running from ROSC at 6-ish MHz with every pin tristated.
    let Some(p) = rp2040_pac::Peripherals::take() else {
        panic!();
    };

    pins_init(&p);
    clocks_init(&p);

    let mut bus = Rp2040Bus::new(
        p.USBCTRL_REGS,
        p.USBCTRL_DPRAM,
        &p.RESETS,
        Some(ActivityPins {
            setup: SETUP_PIN,
            buffer: BUFF_PIN,
            reset: RESET_PIN,
        }),
    );
    bus.connect();

    let mut device = LoopbackDevice::new();
    loop {
        device.service(&mut bus);

        if device.is_configured() {
            p.SIO.gpio_out_set.write(|w| unsafe { w.bits(1 << LED_PIN) });
        } else {
            p.SIO.gpio_out_clr.write(|w| unsafe { w.bits(1 << LED_PIN) });
        }
    }
}

/// Hands the LED and activity pins to SIO as outputs.
fn pins_init(p: &rp2040_pac::Peripherals) {
    p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit());
    while !p.RESETS.reset_done.read().io_bank0().bit() {}

    for pin in [LED_PIN, SETUP_PIN, BUFF_PIN, RESET_PIN] {
        p.IO_BANK0.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().sio());
        p.SIO.gpio_oe_set.write(|w| unsafe { w.bits(1 << pin) });
    }
}

/// Moves the system onto the 12MHz crystal, runs the CPU from PLL_SYS at
/// 132MHz and the USB controller from PLL_USB at 48MHz.
fn clocks_init(p: &rp2040_pac::Peripherals) {
    p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
    while !p.XOSC.status.read().stable().bit() {}
    // clk_ref, and with it clk_sys, switches glitchlessly.
    p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
    p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

    // VCO 1584MHz / (6 * 2) = 132MHz
    p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !p.RESETS.reset_done.read().pll_sys().bit() {}
    pll_init(&p.PLL_SYS, 132, 6, 2);
    p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    p.CLOCKS.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
    while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}
    p.CLOCKS.clk_peri_ctrl.write(|w| w.auxsrc().clk_sys().enable().set_bit());

    // VCO 1200MHz / (5 * 5) = 48MHz
    p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !p.RESETS.reset_done.read().pll_usb().bit() {}
    pll_init(&p.PLL_USB, 100, 5, 5);
    p.CLOCKS.clk_usb_ctrl.write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());
}

/// Locks a PLL (already out of reset) to `12MHz * fbdiv` and enables its
/// output through the two post dividers.
fn pll_init(pll: &rp2040_pac::pll_sys::RegisterBlock, fbdiv: u16, postdiv1: u8, postdiv2: u8) {
    pll.cs.write(|w| unsafe { w.refdiv().bits(1) });
    pll.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(fbdiv) });
    pll.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !pll.cs.read().lock().bit() {}

    pll.prim.write(|w| unsafe { w.postdiv1().bits(postdiv1).postdiv2().bits(postdiv2) });
    pll.pwr.modify(|_, w| w.postdivpd().clear_bit());
}
