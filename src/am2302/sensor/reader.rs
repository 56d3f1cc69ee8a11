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

use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

use rppal::gpio::{Level, Mode};

use crate::sensor::core::{SensorError, SensorErrorKind, SensorPin};
use crate::sensor::pulse::{DecodedFrame, PulseBuffer, FRAME_BITS, HANDSHAKE_PULSES};

/// How long the host holds the line low to wake the sensor.
const WAKE_LOW: Duration = Duration::from_millis(3);

/// Minimum interval between electrical samplings; the sensor misbehaves when
/// polled faster than once every two seconds.
const RESAMPLE_WAIT: Duration = Duration::from_secs(2);

/// Deadline for the sensor to pull the line low after the host releases it
/// (nominally 20-40us).
const RELEASE_DEADLINE_US: u32 = 200;

/// Deadline for each of the sensor's ~80us acknowledgment pulses to end.
const ACK_DEADLINE_US: u32 = 300;

/// An acknowledgment pulse shorter than this is line noise, not the sensor.
const ACK_MIN_US: u32 = 50;

/// Deadline for each edge during bit capture. Generous compared to the
/// longest nominal pulse (~70us) so that a preempted poll loop still catches
/// the edge on its next pass; the decoder judges the inflated duration.
const BIT_DEADLINE_US: u32 = 400;

/// Position of the acquisition state machine.
///
/// Transitions are strictly sequential; no state is ever skipped. `TimedOut`
/// is terminal for a single attempt only: the retry loop in [`Reader::run`]
/// is the one place attempts repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    RequestSent,
    Ack1,
    Ack2,
    Ack3,
    CapturingBit(u8),
    Complete,
    TimedOut,
}

/// Drive a sensor through the wake/acknowledge/transmit sequence and decode
/// what comes back.
///
/// The reader owns its pin: one physical data wire can only ever be
/// bit-banged by one owner, so exclusivity is enforced by move semantics
/// rather than locking. While an acquisition is in flight the calling thread
/// busy-polls the backend clock; the only true sleeps are the wake pulse and
/// the mandatory pause between retries.
pub struct Reader<P> {
    pin: P,
    state: State,
    start: [u32; HANDSHAKE_PULSES],
    humidity_done: bool,
    temp_done: bool,
    parity_done: bool,
    await_bit: Option<u8>,
    await_level: Option<Level>,
    await_duration: u32,
    valid: bool,
}

impl<P> Reader<P>
where
    P: SensorPin,
{
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            state: State::Idle,
            start: [0; HANDSHAKE_PULSES],
            humidity_done: false,
            temp_done: false,
            parity_done: false,
            await_bit: None,
            await_level: None,
            await_duration: 0,
            valid: false,
        }
    }

    /// Acquire one frame from the sensor, making up to `retries + 1` attempts.
    ///
    /// A fully captured frame is returned even when it fails validation:
    /// callers can still inspect the decoded fields and `missing_bits()`.
    /// Only when every attempt times out is `SensorError::NoData` returned.
    /// Timed-out attempts are separated by the two-second pause the sensor's
    /// electrical protocol demands.
    pub fn run(&mut self, retries: u32) -> Result<DecodedFrame, SensorError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.attempt() {
                Ok(frame) => {
                    self.valid = frame.valid();
                    if !self.valid {
                        tracing::warn!(
                            message = "captured frame failed validation",
                            pin = self.pin.pin(),
                            missing_bits = frame.missing_bits(),
                            frame = %frame,
                        );
                    }
                    return Ok(frame);
                }
                Err(kind) => {
                    tracing::debug!(
                        message = "acquisition attempt timed out",
                        pin = self.pin.pin(),
                        attempt = attempts,
                        kind = kind.as_label(),
                        await_bit = ?self.await_bit,
                        await_duration = self.await_duration,
                    );

                    if attempts > retries {
                        return Err(SensorError::NoData { attempts, last: kind });
                    }

                    thread::sleep(RESAMPLE_WAIT);
                }
            }
        }
    }

    /// Which state the most recent attempt reached.
    pub fn state(&self) -> State {
        self.state
    }

    /// Durations of the three handshake pulses captured by the most recent attempt.
    pub fn start_durations(&self) -> [u32; HANDSHAKE_PULSES] {
        self.start
    }

    /// True once all 16 humidity bits of the current frame were captured.
    pub fn humidity_done(&self) -> bool {
        self.humidity_done
    }

    /// True once all 16 temperature bits of the current frame were captured.
    pub fn temp_done(&self) -> bool {
        self.temp_done
    }

    /// True once all 8 parity bits of the current frame were captured.
    pub fn parity_done(&self) -> bool {
        self.parity_done
    }

    /// Bit index the acquisition cursor is (or was) waiting on, if any.
    pub fn await_bit(&self) -> Option<u8> {
        self.await_bit
    }

    /// Pin level the acquisition cursor is (or was) waiting for, if any.
    pub fn await_level(&self) -> Option<Level> {
        self.await_level
    }

    /// Microseconds accumulated so far for the in-flight pulse.
    pub fn await_duration(&self) -> u32 {
        self.await_duration
    }

    /// Whether the most recent frame passed validation.
    pub fn valid(&self) -> bool {
        self.valid
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.start = [0; HANDSHAKE_PULSES];
        self.humidity_done = false;
        self.temp_done = false;
        self.parity_done = false;
        self.await_bit = None;
        self.await_level = None;
        self.await_duration = 0;
        self.valid = false;
    }

    /// One complete acquisition: wake pulse, handshake, 40 bit-pulse pairs,
    /// decode. Any missed edge aborts the attempt with the kind of timeout
    /// that occurred.
    fn attempt(&mut self) -> Result<DecodedFrame, SensorErrorKind> {
        self.reset();
        let mut pulses = PulseBuffer::new();

        // Wake the sensor: hold the line low, then release it by switching
        // back to input mode (the pull-up takes the line high).
        self.pin.set_mode(Mode::Output);
        self.pin.write(Level::Low);
        thread::sleep(WAKE_LOW);
        self.pin.set_mode(Mode::Input);
        self.state = State::RequestSent;

        // The sensor acknowledges by pulling the line low, holding it low
        // for ~80us, then high for ~80us.
        let released = self
            .wait_for_level(Level::Low, 0, RELEASE_DEADLINE_US)
            .ok_or(SensorErrorKind::HandshakeTimeout)?;
        pulses.set_start(0, released);
        self.state = State::Ack1;

        let ack_low = self
            .wait_for_level(Level::High, ACK_MIN_US, ACK_DEADLINE_US)
            .ok_or(SensorErrorKind::HandshakeTimeout)?;
        pulses.set_start(1, ack_low);
        self.state = State::Ack2;

        let ack_high = self
            .wait_for_level(Level::Low, ACK_MIN_US, ACK_DEADLINE_US)
            .ok_or(SensorErrorKind::HandshakeTimeout)?;
        pulses.set_start(2, ack_high);
        self.state = State::Ack3;
        self.start = [pulses.start(0), pulses.start(1), pulses.start(2)];

        // Each bit is a ~50us low phase followed by a high phase whose
        // length encodes the value. Low before high, bit i before bit i+1;
        // an edge that never shows up is a timeout, never reordered.
        for bit in 0..FRAME_BITS {
            self.state = State::CapturingBit(bit as u8);
            self.await_bit = Some(bit as u8);

            let low_phase = self
                .wait_for_level(Level::High, 0, BIT_DEADLINE_US)
                .ok_or(SensorErrorKind::BitCaptureTimeout)?;
            pulses.set_low(bit, low_phase);

            let high_phase = self
                .wait_for_level(Level::Low, 0, BIT_DEADLINE_US)
                .ok_or(SensorErrorKind::BitCaptureTimeout)?;
            pulses.set_high(bit, high_phase);

            match bit {
                15 => self.humidity_done = true,
                31 => self.temp_done = true,
                39 => self.parity_done = true,
                _ => {}
            }
        }

        self.await_bit = None;
        self.state = State::Complete;

        tracing::trace!(message = "captured pulse durations", pulses = ?pulses);
        Ok(pulses.decode())
    }

    /// Busy-wait until the line reads `level`, returning the elapsed time in
    /// microseconds.
    ///
    /// Returns `None` when the edge is not seen before `deadline_us`, or when
    /// it arrives before `min_us` (a pulse too short to be the one the
    /// protocol calls for). An edge first observed after the deadline is
    /// still accepted: the poll loop may have been preempted, and the decoder
    /// is the right place to judge an inflated duration.
    fn wait_for_level(&mut self, level: Level, min_us: u32, deadline_us: u32) -> Option<u32> {
        self.await_level = Some(level);
        let entered = self.pin.now_micros();

        loop {
            // The microsecond counter wraps after about 71 minutes
            let elapsed = self.pin.now_micros().wrapping_sub(entered);

            if self.pin.read() == level {
                self.await_duration = elapsed;
                if elapsed >= min_us {
                    return Some(elapsed);
                }
                self.state = State::TimedOut;
                return None;
            }

            if elapsed >= deadline_us {
                self.await_duration = elapsed;
                self.state = State::TimedOut;
                return None;
            }
        }
    }
}

impl<P> Debug for Reader<P>
where
    P: SensorPin,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("pin", &self.pin.pin())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{Reader, State};
    use crate::sensor::core::{Humidity, SensorError, SensorErrorKind, TemperatureCelsius};
    use crate::sensor::test::{frame_script, DeadPin, ScriptedPin};
    use rppal::gpio::Level;

    #[test]
    fn test_run_full_frame() {
        // Humidity 40.0%, temperature 24.6c, parity 0x87
        let script = frame_script([0x01, 0x90, 0x00, 0xF6, 0x87]);
        let pin = ScriptedPin::new(script);
        let mut reader = Reader::new(pin.clone());

        let frame = reader.run(0).unwrap();

        assert!(frame.valid());
        assert_eq!(TemperatureCelsius::from(24.6), frame.temperature());
        assert_eq!(Humidity::from(40.0), frame.humidity());

        assert_eq!(State::Complete, reader.state());
        assert!(reader.valid());
        assert!(reader.humidity_done());
        assert!(reader.temp_done());
        assert!(reader.parity_done());
        assert_eq!(None, reader.await_bit());
        assert_eq!(1, pin.wake_pulses());

        // Measured handshake durations track the scripted 25/80/80 within
        // poll-loop granularity.
        let [released, ack_low, ack_high] = reader.start_durations();
        assert!((20..=35).contains(&released), "released = {}", released);
        assert!((70..=95).contains(&ack_low), "ack_low = {}", ack_low);
        assert!((70..=95).contains(&ack_high), "ack_high = {}", ack_high);
    }

    #[test]
    fn test_run_corrupt_frame_still_returned() {
        // Parity byte deliberately wrong: the frame must still come back so
        // the caller can inspect it.
        let script = frame_script([0x01, 0x90, 0x00, 0xF6, 0x13]);
        let pin = ScriptedPin::new(script);
        let mut reader = Reader::new(pin);

        let frame = reader.run(0).unwrap();

        assert!(!frame.valid());
        assert_eq!(0, frame.missing_bits());
        assert_eq!(State::Complete, reader.state());
        assert!(!reader.valid());
    }

    #[test]
    fn test_run_dead_backend_single_attempt() {
        let pin = DeadPin::new();
        let mut reader = Reader::new(pin.clone());

        let err = reader.run(0).unwrap_err();

        assert_eq!(SensorErrorKind::HandshakeTimeout, err.kind());
        assert_eq!(1, pin.wake_pulses());
        assert_eq!(State::TimedOut, reader.state());
    }

    #[test]
    fn test_run_dead_backend_retries_exhausted() {
        let pin = DeadPin::new();
        let mut reader = Reader::new(pin.clone());

        match reader.run(1) {
            Err(SensorError::NoData { attempts, last }) => {
                assert_eq!(2, attempts);
                assert_eq!(SensorErrorKind::HandshakeTimeout, last);
            }
            other => panic!("expected NoData, got {:?}", other.map(|f| f.missing_bits())),
        }

        // Exactly retries + 1 wake pulses, never fewer, never more
        assert_eq!(2, pin.wake_pulses());
    }

    #[test]
    fn test_run_handshake_stalls_after_first_edge() {
        // The sensor pulls the line low and never lets go.
        let pin = ScriptedPin::new(vec![(Level::High, 25), (Level::Low, u32::MAX)]);
        let mut reader = Reader::new(pin);

        let err = reader.run(0).unwrap_err();

        assert_eq!(SensorErrorKind::HandshakeTimeout, err.kind());
        assert_eq!(State::TimedOut, reader.state());
        assert_eq!(Some(Level::High), reader.await_level());
        assert!(reader.await_duration() >= 300);
    }

    #[test]
    fn test_run_short_ack_rejected() {
        // A 20us low blip is not the sensor's ~80us acknowledgment.
        let pin = ScriptedPin::new(vec![
            (Level::High, 25),
            (Level::Low, 20),
            (Level::High, u32::MAX),
        ]);
        let mut reader = Reader::new(pin);

        let err = reader.run(0).unwrap_err();

        assert_eq!(SensorErrorKind::HandshakeTimeout, err.kind());
        assert_eq!(State::TimedOut, reader.state());
    }

    #[test]
    fn test_run_bit_capture_stalls() {
        // Good handshake and one low phase, then the line sticks high.
        let pin = ScriptedPin::new(vec![
            (Level::High, 25),
            (Level::Low, 80),
            (Level::High, 80),
            (Level::Low, 50),
            (Level::High, u32::MAX),
        ]);
        let mut reader = Reader::new(pin);

        let err = reader.run(0).unwrap_err();

        assert_eq!(SensorErrorKind::BitCaptureTimeout, err.kind());
        assert_eq!(State::TimedOut, reader.state());
        assert_eq!(Some(0), reader.await_bit());
        assert_eq!(Some(Level::Low), reader.await_level());
        assert!(reader.await_duration() >= 400);
    }
}
