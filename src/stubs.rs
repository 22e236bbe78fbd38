// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Register-backed stub devices: NVMC, FICR, CLOCK/POWER/MPU, RNG, and the
//! blanket "unimplemented" region used for every other peripheral slot in
//! the physical memory map.

use crate::collaborators::RngSource;
use crate::mmio::{guest_error, unimplemented, Device};

/// Non-volatile memory controller. Firmware probes `READY` before erasing or
/// writing flash; this model never actually mutates flash contents, so
/// `READY` is always 1 and the erase registers are accepted no-ops.
pub struct Nvmc {
    ready: u32,
    config: u32,
}

const NVMC_READY: u32 = 0x400;
const NVMC_CONFIG: u32 = 0x504;
const NVMC_ERASEPAGE: u32 = 0x508;
const NVMC_ERASEALL: u32 = 0x50C;
const NVMC_ERASEUICR: u32 = 0x514;

impl Nvmc {
    pub fn new() -> Self {
        Self {
            ready: 1,
            config: 0,
        }
    }
}

impl Default for Nvmc {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Nvmc {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            NVMC_READY => self.ready,
            NVMC_CONFIG => self.config,
            _ => {
                guest_error("nvmc", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            NVMC_CONFIG => self.config = value,
            NVMC_ERASEPAGE | NVMC_ERASEALL | NVMC_ERASEUICR => {
                unimplemented("nvmc", "ERASE*", true)
            }
            _ => guest_error("nvmc", offset, true),
        }
    }

    fn reset(&mut self) {
        self.ready = 1;
        self.config = 0;
    }
}

/// Factory information configuration registers. Only the two size
/// properties firmware is observed to probe are modeled.
pub struct Ficr {
    codepagesize: u32,
    codesize: u32,
}

const FICR_CODEPAGESIZE: u32 = 0x010;
const FICR_CODESIZE: u32 = 0x014;

impl Ficr {
    pub fn new(codepagesize: u32, codesize: u32) -> Self {
        Self {
            codepagesize,
            codesize,
        }
    }
}

impl Default for Ficr {
    fn default() -> Self {
        Self::new(4096, 64)
    }
}

impl Device for Ficr {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            FICR_CODEPAGESIZE => self.codepagesize,
            FICR_CODESIZE => self.codesize,
            _ => {
                guest_error("ficr", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            FICR_CODEPAGESIZE => self.codepagesize = value,
            FICR_CODESIZE => self.codesize = value,
            _ => guest_error("ficr", offset, true),
        }
    }

    fn reset(&mut self) {
        self.codepagesize = 4096;
        self.codesize = 64;
    }
}

/// CLOCK/POWER/MPU region. Firmware toggles HF/LF clock start/stop and
/// polls the matching "started" flag; `RAMON` and `LFCLKSRC` are accepted
/// but otherwise inert.
pub struct ClockPowerMpu {
    hfclk_started: bool,
    lfclk_started: bool,
    ramon: u32,
    lfclksrc: u32,
}

const HFCLKSTART: u32 = 0x000;
const HFCLKSTOP: u32 = 0x004;
const LFCLKSTART: u32 = 0x008;
const LFCLKSTOP: u32 = 0x00C;
const HFCLKSTARTED: u32 = 0x100;
const LFCLKSTARTED: u32 = 0x104;
const RAMON: u32 = 0x524;
const LFCLKSRC: u32 = 0x518;

impl ClockPowerMpu {
    pub fn new() -> Self {
        Self {
            hfclk_started: false,
            lfclk_started: false,
            ramon: 0,
            lfclksrc: 0,
        }
    }
}

impl Default for ClockPowerMpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for ClockPowerMpu {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            HFCLKSTARTED => self.hfclk_started as u32,
            LFCLKSTARTED => self.lfclk_started as u32,
            RAMON => self.ramon,
            LFCLKSRC => self.lfclksrc,
            _ => {
                guest_error("clock_power_mpu", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            HFCLKSTART => self.hfclk_started = true,
            HFCLKSTOP => self.hfclk_started = false,
            LFCLKSTART => self.lfclk_started = true,
            LFCLKSTOP => self.lfclk_started = false,
            RAMON => self.ramon = value & 0x0003_0003,
            LFCLKSRC => self.lfclksrc = value,
            _ => guest_error("clock_power_mpu", offset, true),
        }
    }

    fn reset(&mut self) {
        self.hfclk_started = false;
        self.lfclk_started = false;
        self.ramon = 0;
        self.lfclksrc = 0;
    }
}

/// Random number generator, backed by an external [`RngSource`].
pub struct Rng {
    started: bool,
    source: Box<dyn RngSource>,
}

const RNG_START: u32 = 0x000;
const RNG_STOP: u32 = 0x004;
const RNG_VALRDY: u32 = 0x100;
const RNG_VALUE: u32 = 0x508;

impl Rng {
    pub fn new(source: Box<dyn RngSource>) -> Self {
        Self {
            started: false,
            source,
        }
    }
}

impl Device for Rng {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            RNG_VALUE => self.source.next_byte() as u32,
            RNG_VALRDY => self.started as u32,
            _ => {
                guest_error("rng", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, _value: u32) {
        match offset {
            RNG_START => self.started = true,
            RNG_STOP => self.started = false,
            _ => guest_error("rng", offset, true),
        }
    }

    fn reset(&mut self) {
        self.started = false;
    }
}

/// Blanket stub for every peripheral slot the memory map reserves but this
/// model does not emulate (radio, UART, SPI/TWI, ADC, RTC, TEMP, ECB,
/// AAR/CCM, WDT, QDEC, LPCOMP, SWI, PPI, UICR, GPIOTE): every offset reads 0
/// and drops writes, both logged at the unimplemented level.
pub struct Unimplemented {
    name: &'static str,
    size: u32,
}

impl Unimplemented {
    pub fn new(name: &'static str, size: u32) -> Self {
        Self { name, size }
    }
}

impl Device for Unimplemented {
    fn size(&self) -> u32 {
        self.size
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        unimplemented(self.name, &format!("{offset:#06x}"), false);
        0
    }

    fn write(&mut self, offset: u32, _size: u32, _value: u32) {
        unimplemented(self.name, &format!("{offset:#06x}"), true);
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(u8);
    impl RngSource for FixedRng {
        fn next_byte(&mut self) -> u8 {
            self.0 = self.0.wrapping_add(1);
            self.0
        }
    }

    #[test]
    fn nvmc_ready_defaults_to_one_and_erase_is_a_noop() {
        let mut nvmc = Nvmc::new();
        assert_eq!(nvmc.read(NVMC_READY, 4), 1);
        nvmc.write(NVMC_ERASEALL, 4, 1);
        assert_eq!(nvmc.read(NVMC_READY, 4), 1);
    }

    #[test]
    fn ficr_defaults_match_documented_values() {
        let mut ficr = Ficr::default();
        assert_eq!(ficr.read(FICR_CODEPAGESIZE, 4), 4096);
        assert_eq!(ficr.read(FICR_CODESIZE, 4), 64);
    }

    #[test]
    fn s6_rng_reads_independent_bytes_once_started() {
        let mut rng = Rng::new(Box::new(FixedRng(0)));
        rng.write(RNG_START, 4, 1);
        assert_eq!(rng.read(RNG_VALRDY, 4), 1);
        let a = rng.read(RNG_VALUE, 4);
        let b = rng.read(RNG_VALUE, 4);
        assert_ne!(a, b);
    }

    #[test]
    fn unimplemented_stub_reads_zero() {
        let mut dev = Unimplemented::new("radio", 0x1000);
        assert_eq!(dev.read(0x100, 4), 0);
        dev.write(0x100, 4, 0xFFFF_FFFF);
        assert_eq!(dev.read(0x100, 4), 0);
    }
}
