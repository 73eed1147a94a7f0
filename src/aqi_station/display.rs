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

//! 16x2 character LCD with an RGB backlight on an I2C bus.
//!
//! The display shows up as two devices: one for the backlight color and one for text and
//! commands. Commands and characters are sent as SMBus "write byte data" transfers to the
//! text device with a control byte selecting which one it is.

use std::error;
use std::fmt;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;

pub const DEFAULT_I2C_BUS: u8 = 1;
pub const RGB_ADDR: u8 = 0x62;
pub const TEXT_ADDR: u8 = 0x3e;
pub const COLUMNS: usize = 16;
pub const ROWS: usize = 2;

const REG_COMMAND: u8 = 0x80;
const REG_DATA: u8 = 0x40;

const CMD_CLEAR: u8 = 0x01;
const CMD_DISPLAY_ON_NO_CURSOR: u8 = 0x08 | 0x04;
const CMD_TWO_LINES: u8 = 0x28;
const CMD_SECOND_ROW: u8 = 0xc0;

const SETTLE_TIME: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct BusError(pub String);

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i2c bus error: {}", self.0)
    }
}

impl error::Error for BusError {}

/// Minimal SMBus interface needed to drive the display.
pub trait I2cBus: Send {
    fn write_byte_data(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError>;
}

/// Something that can show a short status message.
///
/// Writes are fire-and-forget: failures are logged by the implementation and never
/// returned to the caller.
pub trait TextDisplay: Send + Sync {
    /// Clear the display and show `text` on up to two lines.
    fn set_text(&self, text: &str);

    /// Clear the display without writing anything.
    fn clear(&self);

    fn set_backlight(&self, r: u8, g: u8, b: u8);
}

/// Split `text` into the lines that fit on the display.
///
/// A newline or running past the last column moves to the next row. Anything that would
/// start a third row is dropped.
pub fn fit_lines(text: &str) -> Vec<String> {
    let mut lines = vec![String::new()];
    let mut count = 0;

    for c in text.chars() {
        if c == '\n' || count == COLUMNS {
            count = 0;
            if lines.len() == ROWS {
                break;
            }

            lines.push(String::new());
            if c == '\n' {
                continue;
            }
        }

        count += 1;
        if let Some(line) = lines.last_mut() {
            line.push(c);
        }
    }

    lines
}

/// LCD driven over an [`I2cBus`].
#[derive(Debug)]
pub struct Lcd<B> {
    bus: Mutex<B>,
    settle: Duration,
}

impl<B> Lcd<B>
where
    B: I2cBus,
{
    pub fn new(bus: B) -> Self {
        Self::with_settle_time(bus, SETTLE_TIME)
    }

    /// Use a custom pause after clearing and mode commands.
    pub fn with_settle_time(bus: B, settle: Duration) -> Self {
        Lcd {
            bus: Mutex::new(bus),
            settle,
        }
    }

    fn with_bus<F>(&self, f: F)
    where
        F: FnOnce(&mut B) -> Result<(), BusError>,
    {
        let res = match self.bus.lock() {
            Ok(mut bus) => f(&mut bus),
            Err(_) => Err(BusError("display bus lock poisoned".to_owned())),
        };

        if let Err(e) = res {
            tracing::warn!(message = "failed to write to display", error = %e);
        }
    }

    fn write_text(&self, bus: &mut B, text: &str) -> Result<(), BusError> {
        bus.write_byte_data(TEXT_ADDR, REG_COMMAND, CMD_CLEAR)?;
        sleep(self.settle);
        bus.write_byte_data(TEXT_ADDR, REG_COMMAND, CMD_DISPLAY_ON_NO_CURSOR)?;
        bus.write_byte_data(TEXT_ADDR, REG_COMMAND, CMD_TWO_LINES)?;
        sleep(self.settle);

        for (row, line) in fit_lines(text).iter().enumerate() {
            if row > 0 {
                bus.write_byte_data(TEXT_ADDR, REG_COMMAND, CMD_SECOND_ROW)?;
            }

            for c in line.chars() {
                let byte = if c.is_ascii() { c as u8 } else { b'?' };
                bus.write_byte_data(TEXT_ADDR, REG_DATA, byte)?;
            }
        }

        Ok(())
    }
}

impl<B> TextDisplay for Lcd<B>
where
    B: I2cBus,
{
    fn set_text(&self, text: &str) {
        tracing::debug!(message = "updating display text", text = %text.escape_debug());
        self.with_bus(|bus| self.write_text(bus, text));
    }

    fn clear(&self) {
        self.with_bus(|bus| bus.write_byte_data(TEXT_ADDR, REG_COMMAND, CMD_CLEAR));
    }

    fn set_backlight(&self, r: u8, g: u8, b: u8) {
        self.with_bus(|bus| {
            bus.write_byte_data(RGB_ADDR, 0x00, 0x00)?;
            bus.write_byte_data(RGB_ADDR, 0x01, 0x00)?;
            bus.write_byte_data(RGB_ADDR, 0x08, 0xaa)?;
            bus.write_byte_data(RGB_ADDR, 0x04, r)?;
            bus.write_byte_data(RGB_ADDR, 0x03, g)?;
            bus.write_byte_data(RGB_ADDR, 0x02, b)
        });
    }
}

#[cfg(feature = "hardware")]
pub use self::hardware::RppalBus;

#[cfg(feature = "hardware")]
mod hardware {
    use super::{BusError, I2cBus};
    use rppal::i2c::I2c;

    impl From<rppal::i2c::Error> for BusError {
        fn from(e: rppal::i2c::Error) -> Self {
            BusError(e.to_string())
        }
    }

    /// I2C bus of a Raspberry Pi.
    #[derive(Debug)]
    pub struct RppalBus {
        i2c: I2c,
    }

    impl RppalBus {
        pub fn new(bus: u8) -> Result<Self, BusError> {
            Ok(RppalBus {
                i2c: I2c::with_bus(bus)?,
            })
        }
    }

    impl I2cBus for RppalBus {
        fn write_byte_data(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
            self.i2c.set_slave_address(addr as u16)?;
            self.i2c.smbus_write_byte(reg, value)?;
            Ok(())
        }
    }
}

/// Bus that only logs each transfer, for machines without the display attached.
#[derive(Debug, Default)]
pub struct LoggingBus;

impl I2cBus for LoggingBus {
    fn write_byte_data(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
        tracing::trace!(
            message = "i2c write",
            addr = format_args!("0x{:02x}", addr),
            reg = format_args!("0x{:02x}", reg),
            value = format_args!("0x{:02x}", value),
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        fit_lines, BusError, I2cBus, Lcd, TextDisplay, CMD_CLEAR, CMD_SECOND_ROW, REG_COMMAND, REG_DATA, RGB_ADDR,
        TEXT_ADDR,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Bus that records every transfer so tests can inspect them.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingBus {
        pub(crate) writes: Arc<Mutex<Vec<(u8, u8, u8)>>>,
    }

    impl RecordingBus {
        pub(crate) fn writes(&self) -> Vec<(u8, u8, u8)> {
            self.writes.lock().unwrap().clone()
        }

        /// Characters written to the display, with rows separated by a newline.
        pub(crate) fn screen(&self) -> String {
            let mut out = String::new();
            for (_, reg, value) in self.writes() {
                if reg == REG_DATA {
                    out.push(value as char);
                } else if reg == REG_COMMAND && value == CMD_SECOND_ROW {
                    out.push('\n');
                } else if reg == REG_COMMAND && value == CMD_CLEAR {
                    out.clear();
                }
            }
            out
        }
    }

    impl I2cBus for RecordingBus {
        fn write_byte_data(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
            self.writes.lock().unwrap().push((addr, reg, value));
            Ok(())
        }
    }

    struct FailingBus;

    impl I2cBus for FailingBus {
        fn write_byte_data(&mut self, _addr: u8, _reg: u8, _value: u8) -> Result<(), BusError> {
            Err(BusError("no device".to_owned()))
        }
    }

    pub(crate) fn recording_lcd() -> (Lcd<RecordingBus>, RecordingBus) {
        let bus = RecordingBus::default();
        (Lcd::with_settle_time(bus.clone(), Duration::ZERO), bus)
    }

    #[test]
    fn test_fit_lines_newline() {
        assert_eq!(vec!["Temp: 21", "Humidity: 55"], fit_lines("Temp: 21\nHumidity: 55"));
    }

    #[test]
    fn test_fit_lines_wraps_long_line() {
        assert_eq!(vec!["0123456789abcdef", "ghij"], fit_lines("0123456789abcdefghij"));
    }

    #[test]
    fn test_fit_lines_truncates() {
        assert_eq!(vec!["0123456789abcdef", "0123456789abcdef"], fit_lines("0123456789abcdef0123456789abcdefXYZ"));
        assert_eq!(vec!["one", "two"], fit_lines("one\ntwo\nthree"));
    }

    #[test]
    fn test_fit_lines_exact_width() {
        assert_eq!(vec!["0123456789abcdef"], fit_lines("0123456789abcdef"));
    }

    #[test]
    fn test_set_text_clears_first() {
        let (lcd, bus) = recording_lcd();
        lcd.set_text("Temp: 21\nHumidity: 55");

        let writes = bus.writes();
        assert_eq!((TEXT_ADDR, REG_COMMAND, CMD_CLEAR), writes[0]);
        assert!(writes.iter().all(|(addr, _, _)| *addr == TEXT_ADDR));
        assert_eq!("Temp: 21\nHumidity: 55", bus.screen());
    }

    #[test]
    fn test_set_text_sensor_message_truncated() {
        let (lcd, bus) = recording_lcd();
        lcd.set_text("Temp: 21.5 degrees C\nHumidity: 55 percent\nignored");

        let screen = bus.screen();
        let lines: Vec<&str> = screen.split('\n').collect();
        assert_eq!(2, lines.len());
        assert_eq!("Temp: 21.5 degre", lines[0]);
        assert_eq!("es C", lines[1]);
    }

    #[test]
    fn test_set_text_non_ascii() {
        let (lcd, bus) = recording_lcd();
        lcd.set_text("Mª");
        assert_eq!("M?", bus.screen());
    }

    #[test]
    fn test_clear_only_clears() {
        let (lcd, bus) = recording_lcd();
        lcd.clear();
        assert_eq!(vec![(TEXT_ADDR, REG_COMMAND, CMD_CLEAR)], bus.writes());
    }

    #[test]
    fn test_backlight_uses_rgb_device() {
        let (lcd, bus) = recording_lcd();
        lcd.set_backlight(10, 20, 30);

        let writes = bus.writes();
        assert!(writes.iter().all(|(addr, _, _)| *addr == RGB_ADDR));
        assert_eq!(Some(&(RGB_ADDR, 0x02, 30)), writes.last());
    }

    #[test]
    fn test_bus_errors_are_not_fatal() {
        let lcd = Lcd::with_settle_time(FailingBus, Duration::ZERO);
        lcd.set_text("hello");
        lcd.clear();
    }
}
