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

use std::fmt::{self, Formatter};
use std::ops::RangeInclusive;

use crate::sensor::core::{Humidity, TemperatureCelsius};

/// Number of pulses in the request/acknowledgment handshake.
pub(crate) const HANDSHAKE_PULSES: usize = 3;

/// Number of data bits in one frame: 16 humidity, 16 temperature, 8 parity.
pub(crate) const FRAME_BITS: usize = 40;

// Classification windows for the high phase of a bit, in microseconds. The
// datasheet nominals are 26-28us for a 0 and ~70us for a 1, but captures on a
// preemptible kernel routinely stretch: confirmed-good frames contain "1"
// pulses measured at 87us and 116us, so the windows are wider than the
// datasheet. A duration landing in neither window is a missing bit.
const ZERO_PULSE_US: RangeInclusive<u32> = 10..=45;
const ONE_PULSE_US: RangeInclusive<u32> = 55..=200;

// The low phase separating bits is nominally ~50us and carries no data; it
// only gets a gross plausibility check.
const LOW_PHASE_US: RangeInclusive<u32> = 20..=200;

fn assemble(bits: &[bool]) -> u16 {
    // MSB first, the order the sensor shifts them out
    bits.iter().fold(0, |acc, &bit| (acc << 1) | u16::from(bit))
}

/// Durations, in microseconds, of every pulse in one acquisition attempt.
///
/// Three handshake pulses precede the data: the gap between the host
/// releasing the line and the sensor pulling it low, then the sensor's ~80us
/// low and ~80us high acknowledgments. Each of the 40 data bits then
/// contributes a ~50us low phase and a high phase whose length encodes the
/// bit value.
///
/// All durations start at zero, meaning "not yet captured". A buffer lives
/// for exactly one acquisition attempt: it is filled during capture, decoded
/// afterwards, and never reused.
#[derive(Debug)]
pub struct PulseBuffer {
    start: [u32; HANDSHAKE_PULSES],
    high: [u32; FRAME_BITS],
    low: [u32; FRAME_BITS],
}

impl PulseBuffer {
    pub fn new() -> Self {
        Self {
            start: [0; HANDSHAKE_PULSES],
            high: [0; FRAME_BITS],
            low: [0; FRAME_BITS],
        }
    }

    /// Duration of handshake pulse `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 3`; an out-of-range pulse index is a programming error.
    pub fn start(&self, i: usize) -> u32 {
        self.start[i]
    }

    /// Record the duration of handshake pulse `i`, overwriting any previous value.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 3`; an out-of-range pulse index is a programming error.
    pub fn set_start(&mut self, i: usize, micros: u32) {
        self.start[i] = micros;
    }

    /// Duration of the high phase of bit `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 40`; an out-of-range bit index is a programming error.
    pub fn high(&self, i: usize) -> u32 {
        self.high[i]
    }

    /// Record the duration of the high phase of bit `i`, overwriting any previous value.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 40`; an out-of-range bit index is a programming error.
    pub fn set_high(&mut self, i: usize, micros: u32) {
        self.high[i] = micros;
    }

    /// Duration of the low phase of bit `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 40`; an out-of-range bit index is a programming error.
    pub fn low(&self, i: usize) -> u32 {
        self.low[i]
    }

    /// Record the duration of the low phase of bit `i`, overwriting any previous value.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 40`; an out-of-range bit index is a programming error.
    pub fn set_low(&mut self, i: usize, micros: u32) {
        self.low[i] = micros;
    }

    /// Classify every captured pulse pair and assemble the frame fields.
    ///
    /// A bit whose high phase falls in neither classification window, or
    /// whose low phase fails the gross range check, is counted as missing and
    /// left at 0 for assembly. Missing bits are detected, never guessed at.
    ///
    /// Decoding is a pure function of the captured durations; calling it
    /// again on an unchanged buffer yields an identical frame.
    pub fn decode(&self) -> DecodedFrame {
        let mut bits = [false; FRAME_BITS];
        let mut missing_bits = 0;

        for i in 0..FRAME_BITS {
            if !LOW_PHASE_US.contains(&self.low[i]) {
                missing_bits += 1;
            } else if ONE_PULSE_US.contains(&self.high[i]) {
                bits[i] = true;
            } else if !ZERO_PULSE_US.contains(&self.high[i]) {
                missing_bits += 1;
            }
        }

        let humidity_raw = assemble(&bits[0..16]);
        let temperature_raw = assemble(&bits[16..32]);
        let parity = assemble(&bits[32..40]) as u8;

        tracing::debug!(
            message = "decoded pulse durations",
            humidity_raw = humidity_raw,
            temperature_raw = temperature_raw,
            parity = parity,
            missing_bits = missing_bits,
        );

        DecodedFrame {
            bits,
            humidity_raw,
            temperature_raw,
            parity,
            missing_bits,
        }
    }

    /// Whether the captured durations decode into a trustworthy frame.
    pub fn valid(&self) -> bool {
        self.decode().valid()
    }

    /// Number of bit positions whose durations could not be classified.
    pub fn missing_bits(&self) -> u32 {
        self.decode().missing_bits()
    }

    /// Decoded temperature; meaningful only when `valid()` holds.
    pub fn temperature(&self) -> TemperatureCelsius {
        self.decode().temperature()
    }

    /// Decoded relative humidity; meaningful only when `valid()` holds.
    pub fn humidity(&self) -> Humidity {
        self.decode().humidity()
    }
}

impl Default for PulseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One frame of sensor data derived from a `PulseBuffer`.
///
/// The frame is returned even when it fails validation so that callers can
/// inspect the decoded fields and the missing-bit count for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    bits: [bool; FRAME_BITS],
    humidity_raw: u16,
    temperature_raw: u16,
    parity: u8,
    missing_bits: u32,
}

impl DecodedFrame {
    /// Value of bit `i` of the frame, MSB of the humidity field first.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 40`; an out-of-range bit index is a programming error.
    pub fn bit(&self, i: usize) -> bool {
        self.bits[i]
    }

    /// Raw humidity field (bits 0-15), tenths of a percent.
    pub fn humidity_raw(&self) -> u16 {
        self.humidity_raw
    }

    /// Raw temperature field (bits 16-31), tenths of a degree with a sign
    /// flag in the top bit.
    pub fn temperature_raw(&self) -> u16 {
        self.temperature_raw
    }

    /// Parity byte transmitted by the sensor (bits 32-39).
    pub fn parity(&self) -> u8 {
        self.parity
    }

    /// Number of bit positions whose durations could not be classified.
    pub fn missing_bits(&self) -> u32 {
        self.missing_bits
    }

    fn checksum(&self) -> u8 {
        // From the AM2302 datasheet:
        // > If the data transmission is right, check-sum should be the last 8 bit of
        // > "8 bit integral RH data+8 bit decimal RH data+8 bit integral T data+8 bit
        // > decimal T data".
        let [h_hi, h_lo] = self.humidity_raw.to_be_bytes();
        let [t_hi, t_lo] = self.temperature_raw.to_be_bytes();
        ((h_hi as u16 + h_lo as u16 + t_hi as u16 + t_lo as u16) & 0xFF) as u8
    }

    /// Whether the frame can be trusted: every bit classified, the parity
    /// byte matching the data, and both measurements inside the sensor's
    /// physical range (0-100% relative humidity, -50c to 100c).
    pub fn valid(&self) -> bool {
        if self.missing_bits != 0 || self.parity != self.checksum() {
            return false;
        }

        let humidity = f64::from(self.humidity());
        let temperature = f64::from(self.temperature());
        (0.0..=100.0).contains(&humidity) && (-50.0..=100.0).contains(&temperature)
    }

    /// Temperature in degrees celsius; the top bit of the raw field flags a
    /// negative value, the remaining 15 bits are tenths of a degree.
    pub fn temperature(&self) -> TemperatureCelsius {
        let magnitude = (self.temperature_raw & 0x7FFF) as f64 / 10.0;
        if self.temperature_raw & 0x8000 != 0 {
            TemperatureCelsius::from(-magnitude)
        } else {
            TemperatureCelsius::from(magnitude)
        }
    }

    /// Relative humidity, tenths of a percent in the raw field.
    pub fn humidity(&self) -> Humidity {
        Humidity::from(self.humidity_raw as f64 / 10.0)
    }
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (parity {:#04x}, {} missing bits)",
            self.temperature(),
            self.humidity(),
            self.parity,
            self.missing_bits
        )
    }
}
