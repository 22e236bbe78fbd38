// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Peripheral model for a Nordic nRF51822-based micro:bit machine.
//!
//! This crate implements the memory-mapped devices a host CPU emulator needs
//! to boot and run unmodified micro:bit firmware: GPIO, the row/column
//! multiplexed LED matrix, three instances of the nRF51 4-channel compare
//! timer, and a handful of register-backed stubs (NVMC, FICR, CLOCK/POWER,
//! RNG). The CPU core, system bus, image loader, graphics surface and
//! cryptographic RNG are external collaborators, named only through the
//! traits in [`collaborators`].
//!
//! [`machine::Machine`] is the assembly point: it owns every device, wires
//! timer IRQs to CPU input lines, and implements the boot protocol.

pub mod collaborators;
pub mod gpio;
pub mod led;
pub mod machine;
pub mod mmio;
pub mod stubs;
pub mod timer;

pub use collaborators::{GraphicsSurface, GuestMemory, InterruptSink, RngSource, TickSource};
pub use machine::{ConfigError, Machine, MachineConfig};
pub use mmio::Device;
