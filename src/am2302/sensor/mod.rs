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

mod core;
mod pulse;
mod reader;
mod test;

pub use crate::sensor::core::{
    initialized, open_pin, setup, Humidity, SensorError, SensorErrorKind, SensorPin,
    TemperatureCelsius, TimedPin,
};
pub use crate::sensor::pulse::{DecodedFrame, PulseBuffer};
pub use crate::sensor::reader::{Reader, State};
