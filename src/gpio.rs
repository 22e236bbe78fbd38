// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPIO controller: 32-pin direction/output/input latches plus packed
//! per-pin configuration words, and the write-through bridge to the LED bus.

use std::cell::RefCell;
use std::rc::Rc;

use tock_registers::interfaces::{Readable, ReadWriteable};
use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::led::LedMatrix;
use crate::mmio::{guest_error, Device};

register_bitfields![u32,
    /// Packed per-pin configuration word (PIN_CNF\[n\]).
    PinConfig [
        DIR OFFSET(0) NUMBITS(1) [
            Input = 0,
            Output = 1
        ],
        INPUT OFFSET(1) NUMBITS(1) [
            Connect = 0,
            Disconnect = 1
        ],
        PULL OFFSET(2) NUMBITS(2) [
            Disabled = 0,
            Pulldown = 1,
            Pullup = 3
        ],
        DRIVE OFFSET(8) NUMBITS(3) [
            S0S1 = 0,
            H0S1 = 1,
            S0H1 = 2,
            H0H1 = 3,
            D0S1 = 4,
            D0H1 = 5,
            S0D1 = 6,
            H0D1 = 7
        ],
        SENSE OFFSET(16) NUMBITS(2) [
            Disabled = 0,
            High = 2,
            Low = 3
        ]
    ]
];

const OUT: u32 = 0x504;
const OUTSET: u32 = 0x508;
const OUTCLR: u32 = 0x50C;
const IN: u32 = 0x510;
const DIR: u32 = 0x514;
const DIRSET: u32 = 0x518;
const DIRCLR: u32 = 0x51C;
const PIN_CNF0: u32 = 0x700;
/// Offset of the last valid `PIN_CNF[31]`, i.e. the inclusive upper bound of
/// the 32-entry register block (not one-past-the-end).
const PIN_CNF_END: u32 = PIN_CNF0 + 4 * 31;

/// Bits of an output-register write that, if set, are forwarded to the LED
/// matrix's row/column decoder.
const LED_BUS_MASK: u32 = 0x0000_FFF0;

/// The 32-pin GPIO peripheral at physical base `0x5000_0000`.
pub struct Gpio {
    dir: u32,
    out: u32,
    in_latch: u32,
    pin_cnf: [LocalRegisterCopy<u32, PinConfig::Register>; 32],
    led_bus: Option<Rc<RefCell<LedMatrix>>>,
}

impl Gpio {
    pub fn new() -> Self {
        Self {
            dir: 0,
            out: 0,
            in_latch: 0,
            pin_cnf: [LocalRegisterCopy::new(0); 32],
            led_bus: None,
        }
    }

    /// Connects the GPIO→LED write-through bridge. Without a bridge
    /// installed, output writes still update `out`/`dir` state but never
    /// reach a LED matrix (a host may instead rely solely on the
    /// address-mapped back door at `0x4002_0000`).
    pub fn connect_led_bus(&mut self, led: Rc<RefCell<LedMatrix>>) {
        self.led_bus = Some(led);
    }

    /// Test/host hook: set the input latch bits a firmware read of `IN`
    /// observes. Not part of the documented MMIO surface.
    pub fn set_input_latch(&mut self, value: u32) {
        self.in_latch = value;
    }

    fn sync_pin_dir(&mut self) {
        for (i, pin) in self.pin_cnf.iter_mut().enumerate() {
            let bit = (self.dir >> i) & 1;
            pin.modify(if bit == 1 {
                PinConfig::DIR::Output
            } else {
                PinConfig::DIR::Input
            });
        }
    }

    fn forward_to_led_bus(&mut self) {
        if self.out & LED_BUS_MASK != 0 {
            if let Some(bus) = &self.led_bus {
                bus.borrow_mut().handle_bus_write(self.out & LED_BUS_MASK);
            }
        }
        self.out = 0;
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Gpio {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            OUT => self.out,
            OUTSET | OUTCLR => self.out,
            IN => self.in_latch,
            DIR | DIRSET | DIRCLR => self.dir,
            PIN_CNF0..=PIN_CNF_END if (offset - PIN_CNF0) % 4 == 0 => {
                let n = ((offset - PIN_CNF0) / 4) as usize;
                self.pin_cnf[n].get()
            }
            _ => {
                guest_error("gpio", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            OUT => {
                self.out = value & self.dir;
                self.forward_to_led_bus();
            }
            OUTSET => {
                self.out |= value & self.dir;
                self.forward_to_led_bus();
            }
            OUTCLR => {
                self.out &= !value & self.dir;
                self.forward_to_led_bus();
            }
            IN => guest_error("gpio", offset, true),
            DIR => {
                self.dir = value;
                self.sync_pin_dir();
            }
            DIRSET => {
                self.dir |= value;
                self.sync_pin_dir();
            }
            DIRCLR => {
                self.dir &= !value;
                self.sync_pin_dir();
            }
            PIN_CNF0..=PIN_CNF_END if (offset - PIN_CNF0) % 4 == 0 => {
                let n = ((offset - PIN_CNF0) / 4) as usize;
                self.pin_cnf[n].set(value);
                if self.pin_cnf[n].read(PinConfig::DIR) == 1 {
                    self.dir |= 1 << n;
                }
            }
            _ => guest_error("gpio", offset, true),
        }
    }

    fn reset(&mut self) {
        self.dir = 0;
        self.out = 0;
        self.in_latch = 0;
        for pin in &mut self.pin_cnf {
            pin.set(0);
        }
    }
}

/// A snapshot of GPIO state, version-tagged per the per-device persisted
/// state layout: version 1, minimum version 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpioState {
    pub version: u32,
    pub dir: u32,
    pub out: u32,
    pub in_latch: u32,
    pub pin_cnf: [u32; 32],
}

impl Gpio {
    pub fn snapshot(&self) -> GpioState {
        let mut pin_cnf = [0u32; 32];
        for (i, pin) in self.pin_cnf.iter().enumerate() {
            pin_cnf[i] = pin.get();
        }
        GpioState {
            version: 1,
            dir: self.dir,
            out: self.out,
            in_latch: self.in_latch,
            pin_cnf,
        }
    }

    pub fn restore(&mut self, state: GpioState) {
        self.dir = state.dir;
        self.out = state.out;
        self.in_latch = state.in_latch;
        for (i, word) in state.pin_cnf.iter().enumerate() {
            self.pin_cnf[i].set(*word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_field_tracks_aggregated_mask() {
        let mut gpio = Gpio::new();
        gpio.write(DIRSET, 4, 0b101);
        assert_eq!(gpio.pin_cnf[0].read(PinConfig::DIR), 1);
        assert_eq!(gpio.pin_cnf[1].read(PinConfig::DIR), 0);
        assert_eq!(gpio.pin_cnf[2].read(PinConfig::DIR), 1);

        gpio.write(DIRCLR, 4, 0b100);
        assert_eq!(gpio.pin_cnf[2].read(PinConfig::DIR), 0);
        assert_eq!(gpio.read(DIR, 4), 0b001);
    }

    #[test]
    fn out_writes_are_masked_by_dir_and_latch_resets() {
        let mut gpio = Gpio::new();
        gpio.write(DIR, 4, 0xFFFF_FFFF);
        gpio.write(OUT, 4, 0x0000_2000);
        // forwarded then cleared
        assert_eq!(gpio.read(OUT, 4), 0);

        gpio.write(DIR, 4, 0x0000_0F0F);
        gpio.write(OUTSET, 4, 0x0000_00FF);
        assert_eq!(gpio.out_before_forward_for_test(), 0);
    }

    impl Gpio {
        fn out_before_forward_for_test(&self) -> u32 {
            self.out
        }
    }

    #[test]
    fn pin_cnf_write_only_sets_dir_bit_never_clears_it() {
        let mut gpio = Gpio::new();
        gpio.write(DIRSET, 4, 1 << 3);
        gpio.write(PIN_CNF0 + 4 * 3, 4, PinConfig::DIR::Input.value);
        // PIN_CNF write only ORs in the output bit; it never clears dir.
        assert_eq!((gpio.dir >> 3) & 1, 1);

        gpio.write(PIN_CNF0 + 4 * 5, 4, PinConfig::DIR::Output.value);
        assert_eq!((gpio.dir >> 5) & 1, 1);
    }

    #[test]
    fn unmapped_offset_reads_zero() {
        let mut gpio = Gpio::new();
        assert_eq!(gpio.read(0x000, 4), 0);
    }
}
