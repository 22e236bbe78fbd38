// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The LED matrix device: decodes the row/column multiplexed word the GPIO
//! bridge (or firmware writing `LED_BASE` directly) delivers into a 25-bit
//! 5×5 framebuffer, and renders it through an external graphics surface.

use std::cell::RefCell;
use std::rc::Rc;

use crate::collaborators::GraphicsSurface;
use crate::mmio::Device;

/// Block-fill layout constants for the rendering contract.
const HBASE: i32 = 40;
const VBASE: i32 = 40;
const HSIZE: i32 = 10;
const VSIZE: i32 = 40;
const HSKIP: i32 = 40;
const VSKIP: i32 = 10;

const FRAME_MASK: u32 = 0x01FF_FFFF;

/// Sentinel (x, y) for the two unused entries of row 1 (columns 8 and 9).
const UNUSED: (u8, u8) = (5, 5);

/// `(row, col) -> (x, y)` translation table, flat-indexed as `row + 3 * col`
/// (i.e. grouped by column, with the three rows interleaved within each
/// group of three entries).
#[rustfmt::skip]
const TRANSLATION: [(u8, u8); 27] = [
    (0, 0), (4, 2), (2, 4),
    (2, 0), (0, 2), (4, 4),
    (4, 0), (2, 2), (0, 4),
    (4, 3), (1, 0), (0, 1),
    (3, 3), (3, 0), (1, 1),
    (2, 3), (3, 4), (2, 1),
    (1, 3), (1, 4), (3, 1),
    (0, 3), UNUSED, (4, 1),
    (1, 2), UNUSED, (3, 2),
];

/// Per-row masks of the bits a row's write may clear in the stored frame.
const CLEAR_MASKS: [u32; 3] = [0x000f_8815, 0x00a0_540a, 0x0150_23e0];

/// The single-byte MMIO slot at physical address `0x4002_0000`.
pub struct LedMatrix {
    frame: u32,
    redraw_background: bool,
    redraw_foreground: bool,
}

impl LedMatrix {
    pub fn new() -> Self {
        Self {
            frame: 0,
            redraw_background: false,
            redraw_foreground: false,
        }
    }

    /// Applies a row/column multiplex write arriving either from the GPIO
    /// bridge or directly from firmware writing `LED_BASE`.
    pub fn handle_bus_write(&mut self, value: u32) {
        let row_bits = (value >> 13) & 7;
        let row = match row_bits {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => return, // invalid one-hot: silently ignored
        };

        let col_bits = (!(value >> 4)) & 0x1FF;
        let mut new_bits: u32 = 0;
        for col in 0..9 {
            if (col_bits >> col) & 1 == 0 {
                continue;
            }
            let (x, y) = TRANSLATION[row + 3 * col];
            if (x, y) == UNUSED {
                continue;
            }
            let index = y as u32 * 5 + x as u32;
            new_bits |= 1 << index;
        }

        let clear = CLEAR_MASKS[row];
        self.frame = ((self.frame & !clear) | new_bits) & FRAME_MASK;
    }

    /// Renders the current frame through `surface` if either redraw flag is
    /// pending, then clears both flags.
    pub fn render(&mut self, surface: &mut dyn GraphicsSurface) {
        if self.redraw_background {
            surface.fill(0x0000_0000);
        }
        if self.redraw_foreground {
            for i in 0..25u32 {
                if (self.frame >> i) & 1 == 0 {
                    continue;
                }
                let col = (i % 5) as i32;
                let row = (i / 5) as i32;
                let x = HBASE + col * (HSKIP + HSIZE);
                let y = VBASE + row * (VSKIP + VSIZE);
                surface.blit_block(x, y, HSIZE, VSIZE, 0x00FF_FFFF);
            }
        }
        self.redraw_background = false;
        self.redraw_foreground = false;
    }

    /// Four-hex-digit text-console representation of the current frame.
    pub fn text_repr(&self) -> String {
        format!("{:04x}", self.frame & 0xFFFF)
    }
}

impl Default for LedMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for LedMatrix {
    fn size(&self) -> u32 {
        1
    }

    fn read(&mut self, _offset: u32, _size: u32) -> u32 {
        self.redraw_background = true;
        self.redraw_foreground = true;
        self.frame
    }

    fn write(&mut self, _offset: u32, _size: u32, value: u32) {
        self.handle_bus_write(value);
    }

    fn reset(&mut self) {
        self.frame = 0;
        self.redraw_background = false;
        self.redraw_foreground = false;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedMatrixState {
    pub version: u32,
    pub frame: u32,
    pub redraw_background: bool,
    pub redraw_foreground: bool,
}

impl LedMatrix {
    pub fn snapshot(&self) -> LedMatrixState {
        LedMatrixState {
            version: 1,
            frame: self.frame,
            redraw_background: self.redraw_background,
            redraw_foreground: self.redraw_foreground,
        }
    }

    pub fn restore(&mut self, state: LedMatrixState) {
        self.frame = state.frame;
        self.redraw_background = state.redraw_background;
        self.redraw_foreground = state.redraw_foreground;
    }
}

/// Owning `Device` registration for the physical-address back door at
/// `LED_BASE` (`0x4002_0000`), sharing the same matrix the GPIO bridge
/// writes into through [`crate::gpio::Gpio::connect_led_bus`]. This is the
/// "explicit observer channel plus the address-mapped back door" design the
/// GPIO→LED write-through calls for: firmware that pokes `LED_BASE` directly
/// and firmware that drives it indirectly through GPIO see the same state.
pub struct LedMatrixHandle(pub Rc<RefCell<LedMatrix>>);

impl LedMatrixHandle {
    pub fn new(matrix: Rc<RefCell<LedMatrix>>) -> Self {
        Self(matrix)
    }
}

impl Device for LedMatrixHandle {
    fn size(&self) -> u32 {
        self.0.borrow().size()
    }

    fn read(&mut self, offset: u32, size: u32) -> u32 {
        self.0.borrow_mut().read(offset, size)
    }

    fn write(&mut self, offset: u32, size: u32, value: u32) {
        self.0.borrow_mut().write(offset, size, value)
    }

    fn reset(&mut self) {
        self.0.borrow_mut().reset()
    }
}
