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

use am2302::sensor::{open_pin, Reader};
use clap::{crate_version, Parser};
use std::process;
use tracing::Level;

const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Read temperature and humidity from an AM2302/DHT22 sensor
///
/// Bit-bang the single-wire sensor protocol on a GPIO pin of the local
/// machine, usually a Raspberry PI, and print the decoded reading. The
/// sensor must be connected to one of the General Purpose IO pins (GPIO).
/// The numbering of these pins (and how the pin number is provided here)
/// is based on the Broadcom SOC channel.
#[derive(Debug, Parser)]
#[clap(name = "am2302", version = crate_version!())]
struct Am2302Application {
    /// BCM GPIO pin number the sensor data line is connected to
    #[clap(long)]
    bcm_pin: u8,

    /// Number of times a timed-out acquisition attempt is retried
    #[clap(long, default_value_t = DEFAULT_RETRIES)]
    retries: u32,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error' (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

fn main() {
    let opts = Am2302Application::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let pin = open_pin(opts.bcm_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize data pin", bcm_pin = opts.bcm_pin, error = %e);
        process::exit(1)
    });

    let mut reader = Reader::new(pin);
    match reader.run(opts.retries) {
        Ok(frame) => {
            let [released, ack_low, ack_high] = reader.start_durations();
            tracing::debug!(
                message = "acquisition complete",
                bcm_pin = opts.bcm_pin,
                released_us = released,
                ack_low_us = ack_low,
                ack_high_us = ack_high,
            );

            if !frame.valid() {
                tracing::warn!(
                    message = "sensor data is corrupt",
                    bcm_pin = opts.bcm_pin,
                    missing_bits = frame.missing_bits(),
                );
            }

            println!("{}", frame);
        }
        Err(e) => {
            tracing::error!(
                message = "unable to read sensor",
                bcm_pin = opts.bcm_pin,
                state = ?reader.state(),
                error = %e,
            );
            process::exit(1)
        }
    }
}
