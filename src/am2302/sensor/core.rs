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

use std::error::Error;
use std::fmt::{self, Formatter};
use std::sync::OnceLock;
use std::time::Instant;

use rppal::gpio::{Gpio, IoPin, Level, Mode};

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Potential kinds of errors that can be encountered acquiring data from the sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    HandshakeTimeout,
    BitCaptureTimeout,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::HandshakeTimeout => "handshake_timeout",
            SensorErrorKind::BitCaptureTimeout => "bit_capture_timeout",
        }
    }
}

/// Error initializing the GPIO backend or acquiring a frame from the sensor.
///
/// Note that a frame that was fully captured but failed validation is not an
/// error: it is returned to the caller for inspection. `NoData` means every
/// acquisition attempt timed out and there is nothing to inspect at all.
#[derive(Debug)]
pub enum SensorError {
    NoData { attempts: u32, last: SensorErrorKind },
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::NoData { last, .. } => *last,
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::NoData { attempts, last } => {
                write!(f, "no data from sensor after {} attempts ({})", attempts, last.as_label())
            }
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// GPIO backend consumed by the acquisition state machine.
///
/// Four primitives are all the protocol needs: pin direction, digital write,
/// digital read, and a monotonic microsecond timestamp. The timestamp wraps
/// at `u32::MAX` (a bit over 71 minutes); durations between two timestamps
/// must be computed with `wrapping_sub`.
pub trait SensorPin {
    fn set_mode(&mut self, mode: Mode);
    fn write(&mut self, level: Level);
    fn read(&self) -> Level;
    fn now_micros(&self) -> u32;
    fn pin(&self) -> u8;
}

/// An `rppal::gpio::IoPin` paired with a microsecond clock.
#[derive(Debug)]
pub struct TimedPin {
    pin: IoPin,
    epoch: Instant,
}

impl TimedPin {
    pub fn new(pin: IoPin) -> Self {
        Self {
            pin,
            epoch: Instant::now(),
        }
    }
}

impl SensorPin for TimedPin {
    fn set_mode(&mut self, mode: Mode) {
        self.pin.set_mode(mode);
    }

    fn write(&mut self, level: Level) {
        self.pin.write(level);
    }

    fn read(&self) -> Level {
        self.pin.read()
    }

    fn now_micros(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn pin(&self) -> u8 {
        self.pin.pin()
    }
}

static CONTROLLER: OnceLock<Gpio> = OnceLock::new();

/// Perform one-time process-wide GPIO initialization.
///
/// Calling this again after the first success is a no-op.
pub fn setup() -> Result<(), SensorError> {
    if CONTROLLER.get().is_some() {
        return Ok(());
    }

    let controller = Gpio::new().map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to create GPIO controller",
            Box::new(e),
        )
    })?;

    // A lost race here means another thread completed setup first.
    let _ = CONTROLLER.set(controller);
    Ok(())
}

/// Return true if process-wide GPIO initialization has completed.
pub fn initialized() -> bool {
    CONTROLLER.get().is_some()
}

/// Create a new `TimedPin` based on the BCM GPIO pin number of the data wire
/// of a sensor, performing process-wide setup first if it hasn't happened yet.
///
/// The returned pin is exclusive: rppal hands out each pin only once per
/// process, which is what keeps two readers from bit-banging the same wire.
///
/// Note that the BCM GPIO pin number is NOT the same as the physical pin number.
/// See [pinout] for more information.
///
/// [pinout]: https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header
pub fn open_pin(bcm_gpio_pin: u8) -> Result<TimedPin, SensorError> {
    setup()?;

    let controller = CONTROLLER.get().ok_or(SensorError::KindMsg(
        SensorErrorKind::Initialization,
        "GPIO controller unavailable after setup",
    ))?;

    let pin = controller.get(bcm_gpio_pin).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to acquire pin from controller",
            Box::new(e),
        )
    })?;

    Ok(TimedPin::new(pin.into_io(Mode::Input)))
}
