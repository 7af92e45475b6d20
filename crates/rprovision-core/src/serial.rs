//! Serial key exchange
//!
//! Pushes the device key and current UTC time to already-flashed firmware
//! over its console port. The firmware polls one byte at a time, hence the
//! paced writes.

use std::io::Write;
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};

use crate::error::SerialExchangeError;
use crate::patch::KEY_LEN;

/// Baud rate the firmware console listens at
pub const BAUD_RATE: u32 = 115_200;

/// Delay between consecutive bytes on the wire
pub const INTER_BYTE_DELAY: Duration = Duration::from_millis(50);

/// Seam over the key-exchange channel
pub trait KeyExchanger {
    /// Send the raw key followed by the UTC timestamp to the device on `port`
    fn exchange(
        &self,
        port: &str,
        key: &[u8; KEY_LEN],
        utc_millis: u64,
    ) -> Result<(), SerialExchangeError>;
}

/// Production exchanger over a real serial port (115200 8N1)
pub struct SerialKeyExchange {
    delay: Duration,
}

impl SerialKeyExchange {
    /// Exchanger with the standard inter-byte pacing
    pub fn new() -> Self {
        Self {
            delay: INTER_BYTE_DELAY,
        }
    }
}

impl Default for SerialKeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchanger for SerialKeyExchange {
    fn exchange(
        &self,
        port_name: &str,
        key: &[u8; KEY_LEN],
        utc_millis: u64,
    ) -> Result<(), SerialExchangeError> {
        let port_err = |source| SerialExchangeError::Port {
            port: port_name.to_string(),
            source,
        };

        let mut port = serialport::new(port_name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(port_err)?;
        port.clear(ClearBuffer::Input).map_err(port_err)?;

        log::info!("sending key over {port_name}");
        let write_err = |source| SerialExchangeError::Write {
            port: port_name.to_string(),
            source,
        };
        write_paced(&mut port, key, self.delay).map_err(write_err)?;

        log::info!("sending UTC timestamp over {port_name}");
        write_paced(&mut port, &timestamp_frame(utc_millis), self.delay).map_err(write_err)?;

        Ok(())
    }
}

/// UTC milliseconds as the ASCII decimal frame the firmware parses
fn timestamp_frame(utc_millis: u64) -> Vec<u8> {
    format!("{utc_millis}\n").into_bytes()
}

fn write_paced<W: Write + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
    delay: Duration,
) -> std::io::Result<()> {
    for &byte in bytes {
        writer.write_all(&[byte])?;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_frame_is_ascii_decimal() {
        assert_eq!(timestamp_frame(1_700_000_000_123), b"1700000000123\n");
        assert_eq!(timestamp_frame(0), b"0\n");
    }

    #[test]
    fn test_write_paced_preserves_order() {
        let mut out = Vec::new();
        write_paced(&mut out, b"key-bytes", Duration::ZERO).unwrap();
        assert_eq!(out, b"key-bytes");
    }

    #[test]
    fn test_write_paced_propagates_errors() {
        struct FailAfter(usize);

        impl Write for FailAfter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if self.0 == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
                }
                self.0 -= 1;
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let err = write_paced(&mut FailAfter(3), b"abcdef", Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
