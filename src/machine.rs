// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Machine assembly: construct the address map, wire timer IRQs to CPU
//! input lines 8/9/10, and implement the boot protocol (flash load, vector
//! table copy, reset hook).

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::collaborators::{GuestMemory, RngSource, TickSource};
use crate::gpio::Gpio;
use crate::led::{LedMatrix, LedMatrixHandle};
use crate::mmio::AddressMap;
use crate::stubs::{ClockPowerMpu, Ficr, Nvmc, Rng, Unimplemented};
use crate::timer::{Timer, TimerHandle};

const ROM_BASE: u32 = 0x0000_0000;
const FLASH_BASE: u32 = 0x0001_8000;
const FLASH_SIZE: u32 = 0x0002_8000;
const FICR_BASE: u32 = 0x1000_0000;
const UICR_BASE: u32 = 0x1000_1000;
const CLOCK_POWER_MPU_BASE: u32 = 0x4000_0000;
const RADIO_BASE: u32 = 0x4000_1000;
const UART0_BASE: u32 = 0x4000_2000;
const SPI0_TWI0_BASE: u32 = 0x4000_3000;
const SPI1_TWI1_BASE: u32 = 0x4000_4000;
const GPIOTE_BASE: u32 = 0x4000_6000;
const ADC_BASE: u32 = 0x4000_7000;
const TIMER0_BASE: u32 = 0x4000_8000;
const TIMER1_BASE: u32 = 0x4000_9000;
const TIMER2_BASE: u32 = 0x4000_A000;
const RTC0_BASE: u32 = 0x4000_B000;
const TEMP_BASE: u32 = 0x4000_C000;
const RNG_BASE: u32 = 0x4000_D000;
const ECB_BASE: u32 = 0x4000_E000;
const AAR_CCM_BASE: u32 = 0x4000_F000;
const WDT_BASE: u32 = 0x4001_0000;
const RTC1_BASE: u32 = 0x4001_1000;
const QDEC_BASE: u32 = 0x4001_2000;
const LPCOMP_BASE: u32 = 0x4001_3000;
const SWI_BASE: u32 = 0x4001_4000;
const NVMC_BASE: u32 = 0x4001_E000;
const PPI_BASE: u32 = 0x4001_F000;
const LED_BASE: u32 = 0x4002_0000;
const GPIO_BASE: u32 = 0x5000_0000;

const VECTOR_TABLE_LEN: usize = 0xC0;

const TIMER0_IRQ: u32 = 8;
const TIMER1_IRQ: u32 = 9;
const TIMER2_IRQ: u32 = 10;

/// Fatal configuration-time failures. Every other documented failure mode
/// (guest error, unimplemented access, invalid LED row decode) is recoverable
/// and never surfaces as a `Result::Err`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported RAM size {0} bytes (expected 16384 or 32768)")]
    UnsupportedRamSize(u32),
    #[error("kernel image too large ({len} bytes, max {max})")]
    KernelImageTooLarge { len: usize, max: usize },
    #[error("could not read kernel image: {0}")]
    MissingKernelFile(#[source] std::io::Error),
    #[error("flash registration failed: {0}")]
    FlashRegistrationFailed(String),
}

/// RAM size choices accepted by the CLI surface this machine is embedded
/// behind.
const VALID_RAM_SIZES: [u32; 2] = [16384, 32768];

/// Construction-time configuration, mirroring the host CLI surface: machine
/// name "micro:bit", a RAM size, a required kernel image path, and an
/// optional flash-backing drive.
pub struct MachineConfig {
    pub ram_size: u32,
    pub kernel_path: PathBuf,
    pub pflash_path: Option<PathBuf>,
}

impl MachineConfig {
    pub fn new(ram_size: u32, kernel_path: impl Into<PathBuf>) -> Self {
        Self {
            ram_size,
            kernel_path: kernel_path.into(),
            pflash_path: None,
        }
    }

    /// Attaches an optional backing drive for FLASH (the CLI's `pflash`
    /// parameter, index 0). When set, [`Machine::load_image`] loads this
    /// file's contents into FLASH before the kernel image is written on top,
    /// and [`Machine::new`] treats a missing/oversized backing file as a
    /// flash registration failure.
    pub fn with_pflash(mut self, pflash_path: impl Into<PathBuf>) -> Self {
        self.pflash_path = Some(pflash_path.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_RAM_SIZES.contains(&self.ram_size) {
            return Err(ConfigError::UnsupportedRamSize(self.ram_size));
        }
        if let Some(pflash_path) = &self.pflash_path {
            let metadata = fs::metadata(pflash_path).map_err(|e| {
                ConfigError::FlashRegistrationFailed(format!(
                    "could not stat pflash drive {}: {e}",
                    pflash_path.display()
                ))
            })?;
            if metadata.len() > FLASH_SIZE as u64 {
                return Err(ConfigError::FlashRegistrationFailed(format!(
                    "pflash drive {} is {} bytes, exceeds FLASH region size {}",
                    pflash_path.display(),
                    metadata.len(),
                    FLASH_SIZE
                )));
            }
        }
        Ok(())
    }
}

/// Construction-time collaborators the host supplies: the IRQ controller
/// each timer pulses into, a tick-source factory invoked once per timer
/// instance, and the RNG backend.
pub struct MachineDeps<F> {
    pub tick_source_factory: F,
    pub rng_source: Box<dyn RngSource>,
}

/// The assembled machine: every device, owned, registered into one
/// [`AddressMap`], with timer IRQs wired to CPU input lines 8/9/10.
pub struct Machine {
    bus: AddressMap,
    led: Rc<RefCell<LedMatrix>>,
    timers: [Rc<RefCell<Timer>>; 3],
}

impl Machine {
    /// Validates `config`, constructs every device, wires the GPIO→LED
    /// bridge and timer IRQ lines, and registers everything into the
    /// address map described in the physical memory map.
    pub fn new<F>(config: &MachineConfig, deps: MachineDeps<F>) -> Result<Self, ConfigError>
    where
        F: FnMut() -> Box<dyn TickSource>,
    {
        config.validate()?;

        let mut tick_source_factory = deps.tick_source_factory;
        let mut bus = AddressMap::new();

        let led = Rc::new(RefCell::new(LedMatrix::new()));

        let mut gpio = Gpio::new();
        gpio.connect_led_bus(led.clone());
        bus.register(GPIO_BASE, Box::new(gpio));

        bus.register(LED_BASE, Box::new(LedMatrixHandle::new(led.clone())));

        let timer0 = Rc::new(RefCell::new(Timer::new(TIMER0_IRQ, tick_source_factory())));
        let timer1 = Rc::new(RefCell::new(Timer::new(TIMER1_IRQ, tick_source_factory())));
        let timer2 = Rc::new(RefCell::new(Timer::new(TIMER2_IRQ, tick_source_factory())));
        bus.register(TIMER0_BASE, Box::new(TimerHandle::new(timer0.clone())));
        bus.register(TIMER1_BASE, Box::new(TimerHandle::new(timer1.clone())));
        bus.register(TIMER2_BASE, Box::new(TimerHandle::new(timer2.clone())));

        bus.register(NVMC_BASE, Box::new(Nvmc::new()));
        bus.register(FICR_BASE, Box::new(Ficr::default()));
        bus.register(CLOCK_POWER_MPU_BASE, Box::new(ClockPowerMpu::new()));
        bus.register(RNG_BASE, Box::new(Rng::new(deps.rng_source)));

        for (name, base) in [
            ("uicr", UICR_BASE),
            ("radio", RADIO_BASE),
            ("uart0", UART0_BASE),
            ("spi0_twi0", SPI0_TWI0_BASE),
            ("spi1_twi1", SPI1_TWI1_BASE),
            ("gpiote", GPIOTE_BASE),
            ("adc", ADC_BASE),
            ("rtc0", RTC0_BASE),
            ("temp", TEMP_BASE),
            ("ecb", ECB_BASE),
            ("aar_ccm", AAR_CCM_BASE),
            ("wdt", WDT_BASE),
            ("rtc1", RTC1_BASE),
            ("qdec", QDEC_BASE),
            ("lpcomp", LPCOMP_BASE),
            ("swi", SWI_BASE),
            ("ppi", PPI_BASE),
        ] {
            bus.register(base, Box::new(Unimplemented::new(name, 0x1000)));
        }

        Ok(Self {
            bus,
            led,
            timers: [timer0, timer1, timer2],
        })
    }

    /// The assembled address map, consumed by the host's system bus the way
    /// it consumes any other MMIO-backed region.
    pub fn bus_mut(&mut self) -> &mut AddressMap {
        &mut self.bus
    }

    /// The LED matrix's rendering surface hook, shared with the GPIO
    /// bridge and the `LED_BASE` back door.
    pub fn led_matrix(&self) -> Rc<RefCell<LedMatrix>> {
        self.led.clone()
    }

    /// `TIMER0`/`TIMER1`/`TIMER2`, shared with their MMIO registrations.
    /// The host's virtual-time scheduler drives each through
    /// [`Timer::on_tick`] at the frequency the timer last programmed via its
    /// `TickSource` handle.
    pub fn timers(&self) -> &[Rc<RefCell<Timer>>; 3] {
        &self.timers
    }

    /// Re-invokes every device's reset, matching a CPU reset event.
    pub fn reset(&mut self) {
        self.bus.reset_all();
    }

    /// Loads `config.kernel_path` into FLASH and copies the vector table
    /// into ROM, per the boot protocol: at most [`FLASH_SIZE`] bytes land at
    /// [`FLASH_BASE`], and the first [`VECTOR_TABLE_LEN`] bytes are mirrored
    /// to [`ROM_BASE`]. If `config.pflash_path` is set, its contents are
    /// written into FLASH first, as the persistent backing drive the kernel
    /// image is then loaded on top of (`config.kernel_path` always wins,
    /// matching the original QEMU boot flow where `-kernel` is loaded
    /// regardless of whether a `pflash` drive is also attached).
    pub fn load_image(
        config: &MachineConfig,
        memory: &mut dyn GuestMemory,
    ) -> Result<(), ConfigError> {
        if let Some(pflash_path) = &config.pflash_path {
            let backing = fs::read(pflash_path).map_err(|e| {
                ConfigError::FlashRegistrationFailed(format!(
                    "could not read pflash drive {}: {e}",
                    pflash_path.display()
                ))
            })?;
            if backing.len() > FLASH_SIZE as usize {
                return Err(ConfigError::FlashRegistrationFailed(format!(
                    "pflash drive {} is {} bytes, exceeds FLASH region size {}",
                    pflash_path.display(),
                    backing.len(),
                    FLASH_SIZE
                )));
            }
            memory.write_from(FLASH_BASE, &backing);
        }

        let image = read_kernel_image(&config.kernel_path)?;
        if image.len() > FLASH_SIZE as usize {
            return Err(ConfigError::KernelImageTooLarge {
                len: image.len(),
                max: FLASH_SIZE as usize,
            });
        }
        memory.write_from(FLASH_BASE, &image);

        let mut vector_table = vec![0u8; VECTOR_TABLE_LEN];
        memory.read_into(FLASH_BASE, &mut vector_table);
        memory.write_from(ROM_BASE, &vector_table);
        Ok(())
    }
}

fn read_kernel_image(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(ConfigError::MissingKernelFile)
}
