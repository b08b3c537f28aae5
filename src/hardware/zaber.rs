//! Zaber ASCII hardware backend.
//!
//! Two single-axis Zaber controllers share one daisy-chained serial line. The
//! first detected device drives X, the second drives Y.
//!
//! Protocol Overview:
//! - Format: line-based ASCII, see [`crate::hardware::ascii`]
//! - Baud: 115200, 8N1, no flow control
//! - Positions: integer microsteps, converted from/to micrometres here
//! - Example: `/1 1 07 move abs 20997` -> `@01 1 07 OK BUSY -- 0`
//! - Every command carries a message ID; a reply is only accepted when its
//!   device, axis and ID all match, so a late reply to an abandoned command
//!   is skipped instead of answering the next one
//!
//! # Usage
//!
//! ```rust,ignore
//! use xy_stage::hardware::zaber::ZaberBackend;
//!
//! let backend = ZaberBackend::open("/dev/ttyUSB0", &config.hardware).await?;
//! let (x, y) = backend.bind_axes().await?;
//! x.move_absolute(1.0, Units::Millimetres, true).await?;
//! ```

use crate::config::HardwareConfig;
use crate::error::{StageError, StageResult};
use crate::hardware::ascii::{format_command, is_fault, Message, Reply, MESSAGE_ID_COUNT};
use crate::hardware::capabilities::{finite_target, Axis, AxisHandle, LimitKind, StageBackend};
use crate::hardware::serial::{drain_serial_buffer, wrap_shared, DynSerial, SharedPort};
use crate::units::Units;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::MutexGuard;
use tracing::instrument;

/// Broadcast address reaching every device on the chain.
const BROADCAST: u8 = 0;

/// Axis number of a single-axis controller.
const AXIS_NUMBER: u8 = 1;

/// How long to wait for stale bytes when bringing the bus up.
const DRAIN_TIMEOUT_MS: u64 = 50;

type PortGuard<'a> = MutexGuard<'a, Option<BufReader<DynSerial>>>;

/// A device that answered detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Daisy-chain address (1-based)
    pub address: u8,
    /// Product identifier reported by `get device.id`
    pub device_id: u32,
}

// =============================================================================
// ZaberConnection
// =============================================================================

/// Serial session to a chain of Zaber devices.
///
/// One command is in flight at a time. Alert and info lines that arrive
/// between replies are consumed and logged, as are replies to earlier
/// commands whose caller stopped waiting.
pub struct ZaberConnection {
    port: SharedPort,
    closed: AtomicBool,
    next_id: AtomicU32,
    reply_timeout: Duration,
    detect_window: Duration,
}

impl ZaberConnection {
    /// Wrap an already-open byte stream.
    pub fn from_port(port: DynSerial, config: &HardwareConfig) -> Self {
        Self {
            port: wrap_shared(port),
            closed: AtomicBool::new(false),
            next_id: AtomicU32::new(0),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
            detect_window: Duration::from_millis(config.detect_window_ms),
        }
    }

    /// Open the serial port at `path` with the configured baud rate.
    #[cfg(feature = "serial")]
    pub async fn open(path: &str, config: &HardwareConfig) -> StageResult<Self> {
        let stream = crate::hardware::serial::open_serial_async(path, config.baud_rate).await?;
        tracing::info!(port = path, baud = config.baud_rate, "Zaber connection opened");
        Ok(Self::from_port(Box::new(stream), config))
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the serial port. Idempotent.
    ///
    /// If a transaction currently holds the port, it is dropped as soon as
    /// that transaction finishes.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.port.try_lock() {
            guard.take();
        }
        tracing::info!("Zaber connection closed");
    }

    async fn lock_open(&self) -> StageResult<PortGuard<'_>> {
        if self.is_closed() {
            return Err(StageError::ConnectionClosed);
        }
        let mut guard = self.port.lock().await;
        if self.is_closed() {
            guard.take();
        }
        if guard.is_none() {
            return Err(StageError::ConnectionClosed);
        }
        Ok(guard)
    }

    fn message_id(&self) -> u8 {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) % u32::from(MESSAGE_ID_COUNT);
        n as u8
    }

    fn release_if_closed(&self, guard: &mut PortGuard<'_>) {
        if self.is_closed() {
            guard.take();
        }
    }

    /// Discard anything the devices sent before we started talking.
    pub async fn drain_stale(&self) -> StageResult<usize> {
        let mut guard = self.lock_open().await?;
        let port = guard.as_mut().ok_or(StageError::ConnectionClosed)?;
        let discarded = drain_serial_buffer(port.get_mut(), DRAIN_TIMEOUT_MS).await;
        if discarded > 0 {
            tracing::debug!("Discarded {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Send `command` to `device`/`axis` and return its reply.
    ///
    /// `RJ` replies are returned as-is; mapping them to errors is up to the
    /// caller.
    pub async fn command(&self, device: u8, axis: u8, command: &str) -> StageResult<Reply> {
        let mut guard = self.lock_open().await?;
        let id = self.message_id();
        let line = format_command(device, axis, id, command);
        let result = match guard.as_mut() {
            Some(port) => self.exchange(port, (device, axis, id), &line).await,
            None => Err(StageError::ConnectionClosed),
        };
        self.release_if_closed(&mut guard);
        result
    }

    /// Send `command` to every device and collect replies for the detect window.
    pub async fn broadcast(&self, command: &str) -> StageResult<Vec<Reply>> {
        let mut guard = self.lock_open().await?;
        let id = self.message_id();
        let line = format_command(BROADCAST, 0, id, command);
        let result = match guard.as_mut() {
            Some(port) => self.collect(port, id, &line).await,
            None => Err(StageError::ConnectionClosed),
        };
        self.release_if_closed(&mut guard);
        result
    }

    /// Write `line` and wait for the reply addressed by `(device, axis, id)`.
    async fn exchange(
        &self,
        port: &mut BufReader<DynSerial>,
        (device, axis, id): (u8, u8, u8),
        line: &str,
    ) -> StageResult<Reply> {
        write_line(port, line).await?;

        loop {
            let text = read_line_within(port, self.reply_timeout)
                .await?
                .ok_or_else(|| {
                    StageError::Communication(format!(
                        "no reply to '{}' within {:?}",
                        line.trim_end(),
                        self.reply_timeout
                    ))
                })?;

            match Message::parse(&text)? {
                Message::Reply(reply)
                    if reply.device == device && reply.axis == axis && reply.id == Some(id) =>
                {
                    log_warning(&reply);
                    return Ok(reply);
                }
                other => log_unsolicited(&other),
            }
        }
    }

    async fn collect(
        &self,
        port: &mut BufReader<DynSerial>,
        id: u8,
        line: &str,
    ) -> StageResult<Vec<Reply>> {
        write_line(port, line).await?;

        let deadline = tokio::time::Instant::now() + self.detect_window;
        let mut replies = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(text) = read_line_within(port, remaining).await? else {
                break;
            };
            match Message::parse(&text) {
                Ok(Message::Reply(reply)) if reply.id == Some(id) => replies.push(reply),
                Ok(other) => log_unsolicited(&other),
                Err(e) => tracing::warn!("Ignoring bad line during broadcast: {}", e),
            }
        }
        Ok(replies)
    }

    /// Ask every device to send unsolicited status alerts.
    pub async fn enable_alerts(&self) -> StageResult<()> {
        let replies = self.broadcast("set comm.alert 1").await?;
        for reply in replies.iter().filter(|r| !r.accepted) {
            tracing::warn!(device = reply.device, "Device refused alerts: {}", reply.data);
        }
        Ok(())
    }

    /// List the devices on the chain, sorted by address.
    pub async fn detect_devices(&self) -> StageResult<Vec<DeviceInfo>> {
        let replies = self.broadcast("get device.id").await?;

        let mut devices: Vec<DeviceInfo> = replies
            .iter()
            .filter(|r| r.accepted)
            .filter_map(|r| {
                let device_id = r.data.trim().parse::<u32>().ok()?;
                Some(DeviceInfo {
                    address: r.device,
                    device_id,
                })
            })
            .collect();
        devices.sort_by_key(|d| d.address);
        devices.dedup_by_key(|d| d.address);

        tracing::info!(count = devices.len(), ?devices, "Zaber devices detected");
        Ok(devices)
    }
}

async fn write_line(port: &mut BufReader<DynSerial>, line: &str) -> StageResult<()> {
    tracing::debug!(tx = line.trim_end(), "Zaber ->");
    let writer = port.get_mut();
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Next non-empty line, or `None` if nothing arrives within `timeout`.
async fn read_line_within(
    port: &mut BufReader<DynSerial>,
    timeout: Duration,
) -> StageResult<Option<String>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut line = String::new();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let read = match tokio::time::timeout(remaining, port.read_line(&mut line)).await {
            Ok(read) => read?,
            Err(_) => return Ok(None),
        };
        if read == 0 {
            return Err(StageError::Communication(
                "serial stream ended unexpectedly".to_string(),
            ));
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            tracing::debug!(rx = trimmed, "Zaber <-");
            return Ok(Some(trimmed.to_string()));
        }
    }
}

fn log_warning(reply: &Reply) {
    if let Some(ref warning) = reply.warning {
        if is_fault(warning) {
            tracing::warn!(device = reply.device, axis = reply.axis, "Device fault flag {}", warning);
        }
    }
}

fn log_unsolicited(message: &Message) {
    match message {
        Message::Alert {
            device,
            axis,
            busy,
            warning,
        } => match warning {
            Some(w) if is_fault(w) => {
                tracing::warn!(device, axis, "Alert with fault flag {}", w)
            }
            _ => tracing::debug!(device, axis, busy, "Alert"),
        },
        Message::Info { device, text } => tracing::debug!(device, "Info: {}", text),
        Message::Reply(reply) => tracing::debug!(
            device = reply.device,
            axis = reply.axis,
            id = ?reply.id,
            "Skipping reply to another command"
        ),
    }
}

// =============================================================================
// ZaberAxis
// =============================================================================

/// One axis of a Zaber device bound to an X or Y role.
pub struct ZaberAxis {
    name: String,
    connection: Arc<ZaberConnection>,
    device: u8,
    axis: u8,
    microstep_um: f64,
    poll_interval: Duration,
}

impl ZaberAxis {
    /// Bind axis 1 of `device` under the role `name`.
    pub fn new(
        name: &str,
        connection: Arc<ZaberConnection>,
        device: u8,
        config: &HardwareConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            connection,
            device,
            axis: AXIS_NUMBER,
            microstep_um: config.microstep_size_um,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Daisy-chain address of the device driving this axis.
    pub fn device(&self) -> u8 {
        self.device
    }

    /// Whole microsteps for `value`, refusing anything the device could not
    /// represent.
    fn steps_for(&self, value: f64, unit: Units) -> StageResult<i64> {
        let value = finite_target(&self.name, value)?;
        let steps = (unit.to_micrometres(value) / self.microstep_um).round();
        if steps.abs() < i64::MAX as f64 {
            Ok(steps as i64)
        } else {
            Err(StageError::InvalidTarget {
                axis: self.name.clone(),
                value,
            })
        }
    }

    fn steps_in_unit(&self, steps: i64, unit: Units) -> f64 {
        unit.from_micrometres(steps as f64 * self.microstep_um)
    }

    /// Send a command and turn an `RJ` reply into `CommandRejected`.
    async fn checked(&self, command: &str) -> StageResult<Reply> {
        let reply = self.connection.command(self.device, self.axis, command).await?;
        if reply.accepted {
            Ok(reply)
        } else {
            Err(StageError::CommandRejected {
                axis: self.name.clone(),
                reason: reply.data,
            })
        }
    }

    async fn finish(&self, blocking: bool) -> StageResult<()> {
        if blocking {
            self.wait_until_idle().await
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Axis for ZaberAxis {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_homed(&self) -> StageResult<bool> {
        self.checked("get limit.home.triggered").await?.data_bool()
    }

    #[instrument(skip(self), fields(axis = %self.name), err)]
    async fn home(&self) -> StageResult<()> {
        tracing::info!(device = self.device, "Homing axis {}", self.name);
        self.checked("home").await?;
        self.wait_until_idle().await
    }

    #[instrument(skip(self), fields(axis = %self.name), err)]
    async fn move_absolute(&self, position: f64, unit: Units, blocking: bool) -> StageResult<()> {
        let steps = self.steps_for(position, unit)?;
        self.checked(&format!("move abs {}", steps)).await?;
        self.finish(blocking).await
    }

    #[instrument(skip(self), fields(axis = %self.name), err)]
    async fn move_relative(&self, delta: f64, unit: Units, blocking: bool) -> StageResult<()> {
        let steps = self.steps_for(delta, unit)?;
        self.checked(&format!("move rel {}", steps)).await?;
        self.finish(blocking).await
    }

    async fn stop(&self, blocking: bool) -> StageResult<()> {
        let reply = self.connection.command(self.device, self.axis, "stop").await?;
        if !reply.accepted {
            tracing::warn!(axis = %self.name, "Stop refused by device: {}", reply.data);
        }
        self.finish(blocking).await
    }

    async fn position(&self, unit: Units) -> StageResult<f64> {
        let steps = self.checked("get pos").await?.data_i64()?;
        Ok(self.steps_in_unit(steps, unit))
    }

    async fn is_busy(&self) -> StageResult<bool> {
        Ok(self.checked("").await?.busy)
    }

    async fn wait_until_idle(&self) -> StageResult<()> {
        while self.is_busy().await? {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }

    async fn limit(&self, kind: LimitKind, unit: Units) -> StageResult<f64> {
        let steps = self
            .checked(&format!("get limit.{}", kind.as_str()))
            .await?
            .data_i64()?;
        Ok(self.steps_in_unit(steps, unit))
    }
}

// =============================================================================
// ZaberBackend
// =============================================================================

/// [`StageBackend`] over a [`ZaberConnection`].
pub struct ZaberBackend {
    connection: Arc<ZaberConnection>,
    config: HardwareConfig,
}

impl ZaberBackend {
    /// Backend over an existing connection.
    pub fn new(connection: ZaberConnection, config: &HardwareConfig) -> Self {
        Self {
            connection: Arc::new(connection),
            config: config.clone(),
        }
    }

    /// Open `path` and wrap it in a backend.
    #[cfg(feature = "serial")]
    pub async fn open(path: &str, config: &HardwareConfig) -> StageResult<Self> {
        let connection = ZaberConnection::open(path, config).await?;
        Ok(Self::new(connection, config))
    }

    /// The shared connection.
    pub fn connection(&self) -> &Arc<ZaberConnection> {
        &self.connection
    }
}

#[async_trait]
impl StageBackend for ZaberBackend {
    fn name(&self) -> &'static str {
        "hardware"
    }

    async fn bind_axes(&self) -> StageResult<(AxisHandle, AxisHandle)> {
        self.connection.drain_stale().await?;
        self.connection.enable_alerts().await?;

        let devices = self.connection.detect_devices().await?;
        let (x_dev, y_dev) = match devices.as_slice() {
            [x, y] => (*x, *y),
            [x, y, ..] => {
                tracing::warn!(
                    found = devices.len(),
                    "More than two devices on the chain; using the first two"
                );
                (*x, *y)
            }
            _ => {
                return Err(StageError::InsufficientDevices {
                    found: devices.len(),
                })
            }
        };

        tracing::info!(x = x_dev.address, y = y_dev.address, "Binding stage axes");
        let x: AxisHandle = Arc::new(ZaberAxis::new(
            "x",
            self.connection.clone(),
            x_dev.address,
            &self.config,
        ));
        let y: AxisHandle = Arc::new(ZaberAxis::new(
            "y",
            self.connection.clone(),
            y_dev.address,
            &self.config,
        ));
        Ok((x, y))
    }

    fn close(&self) {
        self.connection.close();
    }

    fn is_open(&self) -> bool {
        !self.connection.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader, DuplexStream};

    fn test_config() -> HardwareConfig {
        HardwareConfig {
            reply_timeout_ms: 200,
            detect_window_ms: 50,
            poll_interval_ms: 5,
            microstep_size_um: 0.5,
            ..Default::default()
        }
    }

    fn connection() -> (Arc<ZaberConnection>, TokioBufReader<DuplexStream>) {
        let (host, device) = tokio::io::duplex(1024);
        let conn = ZaberConnection::from_port(Box::new(host), &test_config());
        (Arc::new(conn), TokioBufReader::new(device))
    }

    async fn expect_line(device: &mut TokioBufReader<DuplexStream>) -> String {
        let mut line = String::new();
        device.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(device: &mut TokioBufReader<DuplexStream>, text: &str) {
        device.get_mut().write_all(text.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_command_skips_alerts() {
        let (conn, mut device) = connection();

        let task = tokio::spawn(async move {
            assert_eq!(expect_line(&mut device).await, "/1 1 00 get pos");
            send(&mut device, "!02 1 IDLE --\r\n#01 1 hello\r\n@01 1 00 OK IDLE -- 2000\r\n").await;
            device
        });

        let reply = conn.command(1, 1, "get pos").await.unwrap();
        assert_eq!(reply.data, "2000");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_must_match_axis_and_id() {
        let (conn, mut device) = connection();

        let task = tokio::spawn(async move {
            assert_eq!(expect_line(&mut device).await, "/1 1 00 get pos");
            // Device-scope reply, reply without an ID, reply to another ID
            send(
                &mut device,
                "@01 0 00 OK IDLE -- 1\r\n@01 1 OK IDLE -- 2\r\n@01 1 41 OK IDLE -- 3\r\n@01 1 00 OK IDLE -- 4\r\n",
            )
            .await;
            device
        });

        let reply = conn.command(1, 1, "get pos").await.unwrap();
        assert_eq!(reply.data, "4");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_message_ids_wrap() {
        let (conn, _device) = connection();
        let ids: Vec<u8> = (0..=MESSAGE_ID_COUNT).map(|_| conn.message_id()).collect();
        assert_eq!(ids[0], 0);
        assert_eq!(ids[99], 99);
        assert_eq!(ids[100], 0);
    }

    #[tokio::test]
    async fn test_non_finite_target_is_never_sent() {
        let (conn, mut device) = connection();
        let axis = ZaberAxis::new("x", conn, 1, &test_config());

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, f64::MAX] {
            let err = axis
                .move_absolute(value, Units::Millimetres, false)
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::InvalidTarget { .. }), "{value}: {err:?}");
        }
        assert!(axis
            .move_relative(f64::NAN, Units::Micrometres, false)
            .await
            .unwrap_err()
            .is_recoverable());

        let mut line = String::new();
        let silent =
            tokio::time::timeout(Duration::from_millis(50), device.read_line(&mut line)).await;
        assert!(silent.is_err(), "unexpected command {line:?}");
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let (conn, _device) = connection();
        let err = conn.command(1, 1, "get pos").await.unwrap_err();
        assert!(matches!(err, StageError::Communication(_)));
    }

    #[tokio::test]
    async fn test_detect_devices_sorted() {
        let (conn, mut device) = connection();

        let task = tokio::spawn(async move {
            assert_eq!(expect_line(&mut device).await, "/0 0 00 get device.id");
            send(&mut device, "@02 0 00 OK IDLE -- 50081\r\n@01 0 00 OK IDLE -- 50081\r\n").await;
            device
        });

        let devices = conn.detect_devices().await.unwrap();
        assert_eq!(
            devices.iter().map(|d| d.address).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(devices[0].device_id, 50081);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_maps_to_command_rejected() {
        let (conn, mut device) = connection();
        let axis = ZaberAxis::new("x", conn, 1, &test_config());

        let task = tokio::spawn(async move {
            // 10 mm at 0.5 µm per step
            assert_eq!(expect_line(&mut device).await, "/1 1 00 move abs 20000");
            send(&mut device, "@01 1 00 RJ IDLE -- BADDATA\r\n").await;
            device
        });

        let err = axis
            .move_absolute(10.0, Units::Millimetres, false)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, StageError::CommandRejected { ref axis, ref reason } if axis == "x" && reason == "BADDATA"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_rejection_is_not_an_error() {
        let (conn, mut device) = connection();
        let axis = ZaberAxis::new("y", conn, 2, &test_config());

        let task = tokio::spawn(async move {
            assert_eq!(expect_line(&mut device).await, "/2 1 00 stop");
            send(&mut device, "@02 1 00 RJ IDLE FS STATUSBUSY\r\n").await;
            device
        });

        axis.stop(false).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_position_conversion() {
        let (conn, mut device) = connection();
        let axis = ZaberAxis::new("x", conn, 1, &test_config());

        let task = tokio::spawn(async move {
            assert_eq!(expect_line(&mut device).await, "/1 1 00 get pos");
            send(&mut device, "@01 1 00 OK IDLE -- 3000\r\n").await;
            device
        });

        assert_eq!(axis.position(Units::Millimetres).await.unwrap(), 1.5);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (conn, _device) = connection();
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.command(1, 1, "").await,
            Err(StageError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_is_communication_error() {
        let (conn, device) = connection();
        drop(device);
        assert!(matches!(
            conn.command(1, 1, "get pos").await,
            Err(StageError::Communication(_)) | Err(StageError::Io(_))
        ));
    }
}
