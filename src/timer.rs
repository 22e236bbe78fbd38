// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The nRF51 4-channel compare/capture timer, instantiated three times by
//! the machine (`TIMER0`/`TIMER1`/`TIMER2`, wired to CPU IRQ lines 8/9/10).

use std::cell::RefCell;
use std::rc::Rc;

use crate::collaborators::{InterruptSink, TickSource};
use crate::mmio::{guest_error, unimplemented, Device};

const BASE_FREQUENCY_HZ: u64 = 16_000_000;

const TASKS_START: u32 = 0x000;
const TASKS_STOP: u32 = 0x004;
const TASKS_COUNT: u32 = 0x008;
const TASKS_CLEAR: u32 = 0x00C;
const TASKS_SHUTDOWN: u32 = 0x010;
const TASKS_CAPTURE0: u32 = 0x040;
const TASKS_CAPTURE3: u32 = TASKS_CAPTURE0 + 4 * 3;
const EVENTS_COMPARE0: u32 = 0x140;
const EVENTS_COMPARE3: u32 = EVENTS_COMPARE0 + 4 * 3;
const SHORTS: u32 = 0x200;
const INTENSET: u32 = 0x304;
const INTENCLR: u32 = 0x308;
const MODE: u32 = 0x504;
const BITMODE: u32 = 0x508;
const PRESCALER: u32 = 0x510;
const CC0: u32 = 0x540;
const CC3: u32 = CC0 + 4 * 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Timer,
    Counter,
}

fn bitmode_to_mask(bitmode: u32) -> u32 {
    match bitmode & 3 {
        0 => 0xFFFF,
        1 => 0xFF,
        2 => 0x00FF_FFFF,
        3 => 0xFFFF_FFFF,
        _ => unreachable!(),
    }
}

/// One timer instance. Owns a [`TickSource`] handle it keeps configured to
/// match its own state; the host's virtual clock invokes [`Timer::on_tick`]
/// at that frequency.
pub struct Timer {
    state: State,
    mode: Mode,
    internal_counter: u32,
    limit_mask: u32,
    bitmode: u32,
    prescaler: u32,
    cc: [u32; 4],
    compare: [u32; 4],
    inten: u32,
    pulsed: bool,
    count: u32,
    irq_line: u32,
    tick: Box<dyn TickSource>,
}

impl Timer {
    pub fn new(irq_line: u32, tick: Box<dyn TickSource>) -> Self {
        Self {
            state: State::Idle,
            mode: Mode::Timer,
            internal_counter: 0,
            limit_mask: bitmode_to_mask(0),
            bitmode: 0,
            prescaler: 0,
            cc: [0; 4],
            compare: [0; 4],
            inten: 0,
            pulsed: false,
            count: 0,
            irq_line,
            tick,
        }
    }

    /// Reload value the underlying tick source should carry: free-running
    /// (0) in timer mode, `count` in counter mode.
    fn recalibrate(&mut self) {
        let reload = match self.mode {
            Mode::Timer => 0,
            Mode::Counter => self.count,
        };
        self.tick.set_reload(reload);
    }

    fn start(&mut self) {
        let hz = BASE_FREQUENCY_HZ >> self.prescaler.min(31);
        self.tick.set_frequency(hz);
        self.limit_mask = bitmode_to_mask(self.bitmode);
        if self.pulsed {
            self.pulsed = false;
        } else {
            self.recalibrate();
        }
        self.tick.start(true);
        self.state = State::Running;
    }

    fn stop(&mut self) {
        self.tick.stop();
        self.pulsed = true;
        self.state = State::Paused;
    }

    fn clear(&mut self) {
        self.internal_counter = 0;
        self.recalibrate();
    }

    fn shutdown(&mut self) {
        self.tick.stop();
        self.internal_counter = 0;
        self.recalibrate();
        self.pulsed = false;
        self.state = State::Idle;
    }

    /// Advances the counter by one tick and asserts IRQs on a compare/wrap
    /// match. Called by the host's virtual-time scheduler, never by this
    /// crate, at the frequency last programmed through the `TickSource`.
    pub fn on_tick(&mut self, irq: &mut dyn InterruptSink) {
        self.internal_counter = self.internal_counter.wrapping_add(1) & self.limit_mask;
        match self.mode {
            Mode::Counter => {
                if self.internal_counter == self.count {
                    self.internal_counter = 0;
                    pulse(irq, self.irq_line);
                }
            }
            Mode::Timer => {
                for i in 0..4 {
                    if (self.inten >> i) & 1 == 1 && self.cc[i] == self.internal_counter {
                        self.compare[i] = self.compare[i].wrapping_add(1);
                        pulse(irq, self.irq_line);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn state(&self) -> State {
        self.state
    }
}

fn pulse(irq: &mut dyn InterruptSink, line: u32) {
    irq.set_irq(line, true);
    irq.set_irq(line, false);
}

impl Device for Timer {
    fn size(&self) -> u32 {
        0x1000
    }

    fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            TASKS_START | TASKS_STOP | TASKS_COUNT | TASKS_CLEAR | TASKS_SHUTDOWN => 0,
            TASKS_CAPTURE0..=TASKS_CAPTURE3 if (offset - TASKS_CAPTURE0) % 4 == 0 => 0,
            EVENTS_COMPARE0..=EVENTS_COMPARE3 if (offset - EVENTS_COMPARE0) % 4 == 0 => {
                self.compare[((offset - EVENTS_COMPARE0) / 4) as usize]
            }
            SHORTS => {
                unimplemented("timer", "SHORTS", false);
                0
            }
            INTENSET | INTENCLR => self.inten << 16,
            MODE => self.mode as u32,
            BITMODE => self.bitmode,
            PRESCALER => self.prescaler,
            CC0..=CC3 if (offset - CC0) % 4 == 0 => self.cc[((offset - CC0) / 4) as usize],
            _ => {
                guest_error("timer", offset, false);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            TASKS_START => self.start(),
            TASKS_STOP => self.stop(),
            TASKS_COUNT => {
                if self.mode == Mode::Counter {
                    self.count = value;
                    self.recalibrate();
                }
            }
            TASKS_CLEAR => self.clear(),
            TASKS_SHUTDOWN => self.shutdown(),
            TASKS_CAPTURE0..=TASKS_CAPTURE3 if (offset - TASKS_CAPTURE0) % 4 == 0 => {
                let i = ((offset - TASKS_CAPTURE0) / 4) as usize;
                self.cc[i] = self.internal_counter;
            }
            EVENTS_COMPARE0..=EVENTS_COMPARE3 if (offset - EVENTS_COMPARE0) % 4 == 0 => {
                self.compare[((offset - EVENTS_COMPARE0) / 4) as usize] = value;
            }
            SHORTS => unimplemented("timer", "SHORTS", true),
            INTENSET => self.inten |= (value >> 16) & 0xF,
            INTENCLR => self.inten &= !((value >> 16) & 0xF),
            MODE => {
                self.mode = if value & 1 == 1 {
                    Mode::Counter
                } else {
                    Mode::Timer
                };
                self.recalibrate();
            }
            BITMODE => self.bitmode = value & 3,
            PRESCALER => self.prescaler = value & 0xF,
            CC0..=CC3 if (offset - CC0) % 4 == 0 => {
                self.cc[((offset - CC0) / 4) as usize] = value;
            }
            _ => guest_error("timer", offset, true),
        }
    }

    fn reset(&mut self) {
        self.tick.stop();
        self.state = State::Idle;
        self.mode = Mode::Timer;
        self.internal_counter = 0;
        self.bitmode = 0;
        self.limit_mask = bitmode_to_mask(0);
        self.prescaler = 0;
        self.cc = [0; 4];
        self.compare = [0; 4];
        self.inten = 0;
        self.pulsed = false;
        self.count = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerState {
    pub version: u32,
    pub mode: u32,
    pub internal_counter: u32,
    pub bitmode: u32,
    pub prescaler: u32,
    pub cc: [u32; 4],
    pub compare: [u32; 4],
    pub inten: u32,
    pub pulsed: bool,
    pub count: u32,
}

impl Timer {
    pub fn snapshot(&self) -> TimerState {
        TimerState {
            version: 1,
            mode: self.mode as u32,
            internal_counter: self.internal_counter,
            bitmode: self.bitmode,
            prescaler: self.prescaler,
            cc: self.cc,
            compare: self.compare,
            inten: self.inten,
            pulsed: self.pulsed,
            count: self.count,
        }
    }

    pub fn restore(&mut self, state: TimerState) {
        self.mode = if state.mode & 1 == 1 {
            Mode::Counter
        } else {
            Mode::Timer
        };
        self.internal_counter = state.internal_counter;
        self.bitmode = state.bitmode;
        self.limit_mask = bitmode_to_mask(state.bitmode);
        self.prescaler = state.prescaler;
        self.cc = state.cc;
        self.compare = state.compare;
        self.inten = state.inten;
        self.pulsed = state.pulsed;
        self.count = state.count;
    }
}

/// Owning `Device` registration for a timer's MMIO region, sharing the same
/// instance the machine's virtual-time scheduler drives through
/// [`Timer::on_tick`]. Mirrors [`crate::led::LedMatrixHandle`]'s role for
/// the LED matrix: the CPU's register accesses and the host's tick callback
/// observe the same state through one `Rc<RefCell<_>>`.
pub struct TimerHandle(pub Rc<RefCell<Timer>>);

impl TimerHandle {
    pub fn new(timer: Rc<RefCell<Timer>>) -> Self {
        Self(timer)
    }
}

impl Device for TimerHandle {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTick {
        frequency: u64,
        reload: u32,
        running: bool,
    }

    impl TickSource for RecordingTick {
        fn set_frequency(&mut self, hz: u64) {
            self.frequency = hz;
        }
        fn set_reload(&mut self, reload: u32) {
            self.reload = reload;
        }
        fn start(&mut self, _continuous: bool) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
    }

    #[derive(Default)]
    struct RecordingIrq {
        pulses: Vec<u32>,
    }

    impl InterruptSink for RecordingIrq {
        fn set_irq(&mut self, line: u32, level: bool) {
            if level {
                self.pulses.push(line);
            }
        }
    }

    fn timer() -> Timer {
        Timer::new(8, Box::new(RecordingTick::default()))
    }

    #[test]
    fn s1_timer_basic_compare_pulses_once() {
        let mut t = timer();
        t.write(PRESCALER, 4, 4);
        t.write(BITMODE, 4, 0);
        t.write(CC0, 4, 0x000A);
        t.write(INTENSET, 4, 0x0001_0000);
        t.write(MODE, 4, 0);
        t.write(TASKS_START, 4, 1);

        let mut irq = RecordingIrq::default();
        for _ in 0..10 {
            t.on_tick(&mut irq);
        }
        assert_eq!(irq.pulses, vec![8]);
        assert_eq!(t.compare[0], 1);

        t.on_tick(&mut irq);
        assert_eq!(t.internal_counter, 0x000B);
        assert_eq!(irq.pulses, vec![8]);
    }

    #[test]
    fn s2_counter_mode_wraps_and_pulses() {
        let mut t = timer();
        t.write(MODE, 4, 1);
        t.write(TASKS_COUNT, 4, 5);
        t.write(TASKS_START, 4, 1);

        let mut irq = RecordingIrq::default();
        for _ in 0..4 {
            t.on_tick(&mut irq);
        }
        assert!(irq.pulses.is_empty());
        assert_eq!(t.internal_counter, 4);

        t.on_tick(&mut irq);
        assert_eq!(irq.pulses, vec![8]);
        assert_eq!(t.internal_counter, 0);
    }

    #[test]
    fn s3_bitmode_wrap_suppresses_high_compare() {
        let mut t = timer();
        t.write(BITMODE, 4, 1); // 8-bit
        t.write(CC0, 4, 0x100);
        t.write(INTENSET, 4, 0x0001_0000);
        t.write(TASKS_START, 4, 1);

        let mut irq = RecordingIrq::default();
        for _ in 0..300 {
            t.on_tick(&mut irq);
        }
        assert!(irq.pulses.is_empty());
        assert!(t.internal_counter <= 0xFF);
    }

    #[test]
    fn invariant_2_counter_never_exceeds_limit_mask() {
        let mut t = timer();
        t.write(BITMODE, 4, 2); // 24-bit
        t.write(TASKS_START, 4, 1);
        let mut irq = RecordingIrq::default();
        for _ in 0..5 {
            t.on_tick(&mut irq);
        }
        assert!(t.internal_counter <= 0x00FF_FFFF);
    }

    #[test]
    fn stop_then_start_resumes_without_recalibrating() {
        let mut t = timer();
        t.write(TASKS_START, 4, 1);
        let mut irq = RecordingIrq::default();
        t.on_tick(&mut irq);
        t.on_tick(&mut irq);
        assert_eq!(t.internal_counter, 2);

        t.write(TASKS_STOP, 4, 1);
        assert_eq!(t.state(), State::Paused);
        t.write(TASKS_START, 4, 1);
        assert_eq!(t.state(), State::Running);
        // resuming does not zero the counter
        assert_eq!(t.internal_counter, 2);
    }

    #[test]
    fn count_write_in_counter_mode_does_not_reset_counter() {
        let mut t = timer();
        t.write(MODE, 4, 1);
        t.write(TASKS_START, 4, 1);
        let mut irq = RecordingIrq::default();
        t.on_tick(&mut irq);
        t.on_tick(&mut irq);
        assert_eq!(t.internal_counter, 2);

        t.write(TASKS_COUNT, 4, 100);
        assert_eq!(t.internal_counter, 2);
    }

    #[test]
    fn round_trip_cc_compare_mode_bitmode_prescaler() {
        let mut t = timer();
        t.write(CC0, 4, 0x1234);
        assert_eq!(t.read(CC0, 4), 0x1234);

        t.write(EVENTS_COMPARE0, 4, 7);
        assert_eq!(t.read(EVENTS_COMPARE0, 4), 7);

        t.write(MODE, 4, 1);
        assert_eq!(t.read(MODE, 4), 1);

        t.write(BITMODE, 4, 2);
        assert_eq!(t.read(BITMODE, 4), 2);

        t.write(PRESCALER, 4, 9);
        assert_eq!(t.read(PRESCALER, 4), 9);
    }

    #[test]
    fn capture_copies_counter_into_cc() {
        let mut t = timer();
        t.write(TASKS_START, 4, 1);
        let mut irq = RecordingIrq::default();
        for _ in 0..3 {
            t.on_tick(&mut irq);
        }
        t.write(TASKS_CAPTURE0, 4, 0);
        assert_eq!(t.cc[0], 3);
    }
}
