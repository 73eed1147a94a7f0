// aqi_station - Air quality station sync and dashboard
//
// Copyright 2024 Nick Pillitteri
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

//! Local temperature and humidity sensor.
//!
//! The sensor is a DHT11 wired to a single GPIO pin. Reading it means bit-banging the
//! one-wire protocol: hold the line low to request a reading, then time the 41 high/low
//! pulses the sensor answers with. Long high pulses are ones, short ones are zeros.

use std::error;
use std::fmt;

pub const DEFAULT_SENSOR_PIN: u8 = 12;

/// Number of pulses in a reply: one start pulse plus 40 data bits.
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
const DHT_PULSES: usize = 41;

/// A single reading from the local sensor. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub humidity: f32,
    pub temperature: f32,
}

impl SensorReading {
    /// Text shown on the display after each sensor update.
    pub fn display_text(&self) -> String {
        format!("Temp: {} \nHumidity: {}", self.temperature, self.humidity)
    }
}

#[derive(Debug)]
pub enum SensorError {
    Timeout,
    Checksum,
    Gpio(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout waiting for sensor"),
            Self::Checksum => write!(f, "sensor reading checksum mismatch"),
            Self::Gpio(msg) => write!(f, "gpio error: {}", msg),
        }
    }
}

impl error::Error for SensorError {}

/// Blocking read of the attached sensor.
pub trait SensorReader: Send + Sync {
    fn read(&self) -> Result<SensorReading, SensorError>;
}

/// Turn the pulse lengths of a reply into the five raw data bytes.
///
/// `pulses` holds alternating low/high durations (in loop iterations, not time) for each
/// pulse. The first pair is the sensor's start signal and is only used to skip ahead.
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
fn decode_pulses(pulses: &[usize; DHT_PULSES * 2]) -> [u8; 5] {
    // Average of every low pulse is the threshold between a short and long high pulse
    let threshold = pulses.iter().skip(2).step_by(2).sum::<usize>() / (DHT_PULSES - 1);

    let mut data = [0u8; 5];
    for (bit, high) in pulses.iter().skip(3).step_by(2).enumerate() {
        let index = bit / 8;
        data[index] <<= 1;
        if *high >= threshold {
            data[index] |= 1;
        }
    }

    data
}

/// Check and convert the raw DHT11 data bytes.
///
/// Bytes are humidity integral, humidity decimal, temperature integral, temperature
/// decimal, checksum. The high bit of the temperature decimal byte marks negative values.
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
fn decode_dht11(data: [u8; 5]) -> Result<SensorReading, SensorError> {
    let sum = data[0]
        .wrapping_add(data[1])
        .wrapping_add(data[2])
        .wrapping_add(data[3]);
    if sum != data[4] {
        return Err(SensorError::Checksum);
    }

    let humidity = data[0] as f32 + data[1] as f32 / 10.0;
    let mut temperature = data[2] as f32 + (data[3] & 0x7f) as f32 / 10.0;
    if data[3] & 0x80 != 0 {
        temperature = -temperature;
    }

    Ok(SensorReading { humidity, temperature })
}

#[cfg(feature = "hardware")]
pub use self::hardware::Dht11;

#[cfg(feature = "hardware")]
mod hardware {
    use super::{decode_dht11, decode_pulses, SensorError, SensorReader, SensorReading, DHT_PULSES};
    use rppal::gpio::{Gpio, IoPin, Level, Mode};
    use std::sync::Mutex;
    use std::thread::sleep;
    use std::time::Duration;

    /// Upper bound on loop iterations spent waiting for any single pulse.
    const MAX_COUNT: usize = 32000;

    impl From<rppal::gpio::Error> for SensorError {
        fn from(e: rppal::gpio::Error) -> Self {
            SensorError::Gpio(e.to_string())
        }
    }

    /// DHT11 on a Raspberry Pi GPIO pin.
    ///
    /// Bit-banging from userspace is timing sensitive and fails occasionally. Callers
    /// should expect `Timeout` and `Checksum` errors and must not read more than once
    /// every second or two.
    #[derive(Debug)]
    pub struct Dht11 {
        pin: Mutex<IoPin>,
    }

    impl Dht11 {
        pub fn new(pin: u8) -> Result<Self, SensorError> {
            let pin = Gpio::new()?.get(pin)?.into_io(Mode::Output);
            Ok(Dht11 { pin: Mutex::new(pin) })
        }
    }

    impl SensorReader for Dht11 {
        fn read(&self) -> Result<SensorReading, SensorError> {
            let mut gpio = self
                .pin
                .lock()
                .map_err(|_| SensorError::Gpio("sensor pin lock poisoned".to_owned()))?;

            let mut pulses = [0usize; DHT_PULSES * 2];

            gpio.set_mode(Mode::Output);
            gpio.write(Level::High);
            sleep(Duration::from_millis(500));
            gpio.write(Level::Low);
            sleep(Duration::from_millis(20));
            gpio.set_mode(Mode::Input);

            let mut count = 0;
            while gpio.read() == Level::High {
                count += 1;
                if count > MAX_COUNT {
                    return Err(SensorError::Timeout);
                }
            }

            for pair in pulses.chunks_exact_mut(2) {
                for (slot, level) in pair.iter_mut().zip([Level::Low, Level::High]) {
                    while gpio.read() == level {
                        *slot += 1;
                        if *slot > MAX_COUNT {
                            return Err(SensorError::Timeout);
                        }
                    }
                }
            }

            decode_dht11(decode_pulses(&pulses))
        }
    }
}

/// Sensor stand-in that always returns the same reading, for machines without the
/// sensor attached.
#[derive(Debug, Clone)]
pub struct FixedSensor {
    reading: SensorReading,
}

impl FixedSensor {
    pub fn new(humidity: f32, temperature: f32) -> Self {
        tracing::info!(message = "using fixed sensor readings, no hardware access", humidity, temperature);
        FixedSensor {
            reading: SensorReading { humidity, temperature },
        }
    }
}

impl SensorReader for FixedSensor {
    fn read(&self) -> Result<SensorReading, SensorError> {
        tracing::debug!(message = "fixed sensor read", reading = ?self.reading);
        Ok(self.reading)
    }
}
