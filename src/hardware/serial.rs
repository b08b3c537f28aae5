//! Async serial plumbing shared by the hardware backend.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SharedPort`]: Line-buffered port behind an async mutex
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking (`serial` feature)
//! - [`drain_serial_buffer`]: Drain stale data from a serial port
//!
//! Anything implementing the async I/O traits can stand in for a real port,
//! which is how the protocol layer is tested against `tokio::io::duplex`.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
///
/// Covers `tokio_serial::SerialStream` (real hardware) and
/// `tokio::io::DuplexStream` (tests).
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line-buffered serial port that can be released.
///
/// `None` once the owning connection has been closed.
pub type SharedPort = Mutex<Option<BufReader<DynSerial>>>;

/// Wrap a port for line-oriented reading.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Mutex::new(Some(BufReader::new(port)))
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> crate::error::StageResult<tokio_serial::SerialStream> {
    use crate::error::StageError;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let stream = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| StageError::Communication(format!("serial open task failed: {}", e)))??;

    tracing::debug!(port = port_path, baud_rate, "Opened serial port");
    Ok(stream)
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives within `timeout_ms`.
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break, // nothing more right now
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        host.write_all(b"@01 0 OK IDLE -- 0\r\n").await.unwrap();

        let mut guard = port.lock().await;
        let reader = guard.as_mut().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "@01 0 OK IDLE -- 0");
    }

    #[tokio::test]
    async fn test_released_port_is_none() {
        let (_host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        let taken = port.lock().await.take();
        assert!(taken.is_some());
        assert!(port.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"!01 1 IDLE --\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 15);

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(10), device.read(&mut buf)).await;
        assert!(read.is_err(), "expected no further data");
    }
}
