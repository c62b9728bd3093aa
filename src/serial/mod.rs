pub(crate) mod ascii;
pub(crate) mod frame;

/// serial transport driver
#[cfg(feature = "serial")]
pub mod client;

use std::time::Duration;

use crate::error::ConfigError;

/// Number of data bits per character
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataBits {
    /// 7 data bits, required by ASCII framing
    Seven,
    /// 8 data bits, required by RTU framing
    Eight,
}

/// Number of stop bits per character
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// Parity checking mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial port settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate in symbols per second
    pub baud_rate: u32,
    /// Number of data bits
    pub data_bits: DataBits,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Parity mode
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        Ok(())
    }

    pub(crate) fn validate_ascii(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.data_bits != DataBits::Seven {
            return Err(ConfigError::AsciiRequiresSevenDataBits);
        }
        Ok(())
    }

    /// Transmission time of a single character: start bit + data bits +
    /// optional parity bit + stop bits, at the configured baud rate
    pub(crate) fn char_time(&self) -> Duration {
        let data_bits = match self.data_bits {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        let parity_bits = match self.parity {
            Parity::None => 0,
            _ => 1,
        };

        let bits_per_char = 1u64 + data_bits + stop_bits + parity_bits;
        let ns_per_bit = 1_000_000_000u64 / self.baud_rate as u64;
        Duration::from_nanos(bits_per_char * ns_per_bit)
    }

    /// The intra-frame gap: silence longer than 1.5 character times inside a
    /// frame is suspicious, so reads are bounded by it
    pub(crate) fn inter_char_timeout(&self) -> Duration {
        self.char_time() * 3 / 2
    }

    /// The end-of-frame gap of 3.5 character times. Hosts cannot time
    /// sub-millisecond gaps reliably, so a fixed 1.75 ms applies at high
    /// baud rates.
    pub(crate) fn inter_frame_delay(&self) -> Duration {
        if self.baud_rate >= 19200 {
            return Duration::from_micros(1750);
        }
        self.char_time() * 7 / 2
    }
}

#[cfg(feature = "serial")]
pub(crate) fn open(
    path: &str,
    settings: SerialSettings,
) -> Result<tokio_serial::SerialStream, std::io::Error> {
    use tokio_serial::SerialPortBuilderExt;

    let data_bits = match settings.data_bits {
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    };
    let stop_bits = match settings.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    };
    let parity = match settings.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    };

    tokio_serial::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_time_at_9600_8n1() {
        // 10 bits per character at 9600 baud is about 1.042 ms
        let settings = SerialSettings {
            baud_rate: 9600,
            ..Default::default()
        };
        let micros = settings.char_time().as_micros();
        assert!((1041..=1042).contains(&micros));
    }

    #[test]
    fn parity_adds_a_bit() {
        let without = SerialSettings {
            baud_rate: 9600,
            ..Default::default()
        };
        let with = SerialSettings {
            parity: Parity::Even,
            ..without
        };
        assert!(with.char_time() > without.char_time());
    }

    #[test]
    fn slow_links_use_the_computed_end_of_frame_gap() {
        let settings = SerialSettings {
            baud_rate: 9600,
            ..Default::default()
        };
        let micros = settings.inter_frame_delay().as_micros();
        // 3.5 characters of 10 bits each at 9600 baud
        assert!((3645..=3646).contains(&micros));
    }

    #[test]
    fn fast_links_use_the_fixed_end_of_frame_gap() {
        let settings = SerialSettings {
            baud_rate: 115200,
            ..Default::default()
        };
        assert_eq!(settings.inter_frame_delay(), Duration::from_micros(1750));
    }

    #[test]
    fn ascii_requires_seven_data_bits() {
        let settings = SerialSettings::default();
        assert_eq!(
            settings.validate_ascii(),
            Err(ConfigError::AsciiRequiresSevenDataBits)
        );
        let settings = SerialSettings {
            data_bits: DataBits::Seven,
            ..settings
        };
        assert_eq!(settings.validate_ascii(), Ok(()));
    }
}
