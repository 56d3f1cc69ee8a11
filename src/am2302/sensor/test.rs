// am2302 - Temperature and humidity decoder for AM2302/DHT22 sensors
//
// Copyright 2026 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

#![cfg(test)]

use crate::sensor::core::SensorPin;
use rppal::gpio::{Level, Mode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// Virtual microseconds charged per backend call, standing in for the cost of
// one GPIO register access.
const POLL_COST_US: u32 = 1;

/// SensorPin implementation that never produces an edge: the line reads high
/// forever, as if no sensor were wired to the pin. Used to exercise timeout
/// and retry behavior.
///
/// Clones share state so tests can keep a handle for inspection after the
/// reader takes ownership of the pin.
#[derive(Clone)]
pub(crate) struct DeadPin {
    state: Arc<PinState>,
}

impl DeadPin {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(PinState::default()),
        }
    }

    /// Number of wake pulses (output-mode transitions) observed, one per
    /// acquisition attempt.
    pub(crate) fn wake_pulses(&self) -> u32 {
        self.state.wake_pulses.load(Ordering::SeqCst)
    }
}

impl SensorPin for DeadPin {
    fn set_mode(&mut self, mode: Mode) {
        if mode == Mode::Output {
            self.state.wake_pulses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write(&mut self, _level: Level) {
        // NOP
    }

    fn read(&self) -> Level {
        self.state.clock.fetch_add(POLL_COST_US, Ordering::SeqCst);
        Level::High
    }

    fn now_micros(&self) -> u32 {
        self.state.clock.fetch_add(POLL_COST_US, Ordering::SeqCst)
    }

    fn pin(&self) -> u8 {
        7
    }
}

#[derive(Default)]
struct PinState {
    clock: AtomicU32,
    wake_pulses: AtomicU32,
    script_epoch: AtomicU32,
}

/// SensorPin implementation that plays back a scripted waveform on a virtual
/// clock: a sequence of (level, duration) segments, with the final level held
/// once the script runs out. Playback restarts from the top every time the
/// reader releases the line back to input mode, so one script describes one
/// acquisition attempt.
///
/// Clones share state so tests can keep a handle for inspection after the
/// reader takes ownership of the pin.
#[derive(Clone)]
pub(crate) struct ScriptedPin {
    segments: Arc<Vec<(Level, u32)>>,
    state: Arc<PinState>,
}

impl ScriptedPin {
    pub(crate) fn new(segments: Vec<(Level, u32)>) -> Self {
        Self {
            segments: Arc::new(segments),
            state: Arc::new(PinState::default()),
        }
    }

    pub(crate) fn wake_pulses(&self) -> u32 {
        self.state.wake_pulses.load(Ordering::SeqCst)
    }

    fn level_at(&self, micros: u32) -> Level {
        let mut end = 0u32;
        let mut level = Level::High;

        for &(segment_level, duration) in self.segments.iter() {
            end = end.saturating_add(duration);
            level = segment_level;
            if micros < end {
                return level;
            }
        }

        level
    }
}

impl SensorPin for ScriptedPin {
    fn set_mode(&mut self, mode: Mode) {
        if mode == Mode::Output {
            self.state.wake_pulses.fetch_add(1, Ordering::SeqCst);
        } else {
            // Releasing the line starts (or restarts) script playback
            let now = self.state.clock.load(Ordering::SeqCst);
            self.state.script_epoch.store(now, Ordering::SeqCst);
        }
    }

    fn write(&mut self, _level: Level) {
        // NOP
    }

    fn read(&self) -> Level {
        let now = self.state.clock.fetch_add(POLL_COST_US, Ordering::SeqCst);
        let epoch = self.state.script_epoch.load(Ordering::SeqCst);
        self.level_at(now.wrapping_sub(epoch))
    }

    fn now_micros(&self) -> u32 {
        self.state.clock.fetch_add(POLL_COST_US, Ordering::SeqCst)
    }

    fn pin(&self) -> u8 {
        7
    }
}

/// Build a waveform script transmitting the five given bytes with nominal
/// datasheet timings: the handshake, then a ~50us low phase and a 26us (0)
/// or 70us (1) high phase per bit, MSB first.
pub(crate) fn frame_script(bytes: [u8; 5]) -> Vec<(Level, u32)> {
    let mut segments = vec![(Level::High, 25), (Level::Low, 80), (Level::High, 80)];

    for byte in bytes {
        for offset in 0..8 {
            let bit = byte >> (7 - offset) & 1 == 1;
            segments.push((Level::Low, 50));
            segments.push((Level::High, if bit { 70 } else { 26 }));
        }
    }

    // Terminate the final high phase before the line returns to idle
    segments.push((Level::Low, 50));
    segments.push((Level::High, u32::MAX));
    segments
}
