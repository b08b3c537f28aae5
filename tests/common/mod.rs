//! Shared helpers for integration tests.
//!
//! [`FakeBus`] answers Zaber ASCII commands for a chain of single-axis devices
//! on one end of a `tokio::io::duplex` pipe. The other end goes into
//! `ZaberConnection::from_port` in place of a serial port.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use xy_stage::config::{HardwareConfig, StageConfig};
use xy_stage::hardware::serial::DynSerial;
use xy_stage::hardware::zaber::{ZaberBackend, ZaberConnection};

/// Device ID reported by every fake device.
pub const FAKE_DEVICE_ID: u32 = 50081;

/// Micrometres per microstep used by [`hardware_config`].
pub const TEST_MICROSTEP_UM: f64 = 0.5;

/// Status polls a move stays BUSY for.
const BUSY_POLLS: u32 = 2;

/// Observable state of one fake device.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub address: u8,
    pub position: i64,
    pub homed: bool,
    pub limit_min: i64,
    pub limit_max: i64,
    pub busy_polls: u32,
}

impl FakeDevice {
    fn new(address: u8, homed: bool) -> Self {
        Self {
            address,
            position: if homed { 0 } else { 7_777 },
            homed,
            limit_min: 0,
            limit_max: 100_000,
            busy_polls: 0,
        }
    }

    fn status(&self) -> &'static str {
        if self.busy_polls > 0 {
            "BUSY"
        } else {
            "IDLE"
        }
    }
}

/// Handle to a running fake device chain.
#[derive(Clone)]
pub struct FakeBus {
    pub devices: Arc<Mutex<Vec<FakeDevice>>>,
    pub received: Arc<Mutex<Vec<String>>>,
    reply_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeBus {
    /// Start a chain of `count` devices and return the host end of the pipe.
    pub fn spawn(count: u8, homed: bool) -> (DynSerial, FakeBus) {
        let (host, device_end) = tokio::io::duplex(4096);
        let bus = FakeBus {
            devices: Arc::new(Mutex::new(
                (1..=count).map(|a| FakeDevice::new(a, homed)).collect(),
            )),
            received: Arc::new(Mutex::new(Vec::new())),
            reply_delay: Arc::new(Mutex::new(None)),
        };
        tokio::spawn(bus.clone().serve(device_end));
        (Box::new(host), bus)
    }

    /// Snapshot of device `address`.
    pub fn device(&self, address: u8) -> FakeDevice {
        self.devices.lock().unwrap()[usize::from(address) - 1].clone()
    }

    /// Commands received so far, without message ID or trailing newline.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Hold back the reply to the next command for `delay`.
    ///
    /// Commands sent meanwhile queue up and are answered afterwards, in order.
    pub fn delay_next_reply(&self, delay: Duration) {
        *self.reply_delay.lock().unwrap() = Some(delay);
    }

    async fn serve(self, stream: DuplexStream) {
        let mut stream = BufReader::new(stream);
        loop {
            let mut line = String::new();
            match stream.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let response = self.respond(line.trim());
            let delay = self.reply_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if stream.get_mut().write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn respond(&self, line: &str) -> String {
        let body = line.strip_prefix('/').unwrap_or(line);
        let mut words = body.split_whitespace();
        let device: u8 = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
        let axis: u8 = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
        let mut command: Vec<&str> = words.collect();
        let id = match command.first() {
            Some(word) if word.parse::<u8>().is_ok() => Some(command.remove(0)),
            _ => None,
        };

        let mut record = format!("/{} {}", device, axis);
        if !command.is_empty() {
            record.push(' ');
            record.push_str(&command.join(" "));
        }
        self.received.lock().unwrap().push(record);

        let mut devices = self.devices.lock().unwrap();
        let mut out = String::new();
        for dev in devices.iter_mut() {
            if device == 0 || device == dev.address {
                out.push_str(&Self::apply(dev, axis, id, &command));
            }
        }
        out
    }

    fn apply(dev: &mut FakeDevice, axis: u8, id: Option<&str>, command: &[&str]) -> String {
        let header = match id {
            Some(id) => format!("@{:02} {} {}", dev.address, axis, id),
            None => format!("@{:02} {}", dev.address, axis),
        };
        let addr = dev.address;
        let ok = |dev: &FakeDevice, data: &str| {
            format!("{} OK {} -- {}\r\n", header, dev.status(), data)
        };
        let rejected = |dev: &FakeDevice, reason: &str| {
            format!("{} RJ {} -- {}\r\n", header, dev.status(), reason)
        };

        match command {
            [] => {
                // Status poll; announce completion with an alert first
                if dev.busy_polls > 0 {
                    dev.busy_polls -= 1;
                    if dev.busy_polls == 0 {
                        return format!("!{:02} {} IDLE --\r\n{}", addr, axis, ok(dev, "0"));
                    }
                }
                ok(dev, "0")
            }
            ["set", "comm.alert", _] => ok(dev, "0"),
            ["get", "device.id"] => ok(dev, &FAKE_DEVICE_ID.to_string()),
            ["get", "pos"] => ok(dev, &dev.position.to_string()),
            ["get", "limit.min"] => ok(dev, &dev.limit_min.to_string()),
            ["get", "limit.max"] => ok(dev, &dev.limit_max.to_string()),
            ["get", "limit.home.triggered"] => ok(dev, if dev.homed { "1" } else { "0" }),
            ["home"] => {
                dev.homed = true;
                dev.position = 0;
                dev.busy_polls = BUSY_POLLS;
                ok(dev, "0")
            }
            ["stop"] => {
                dev.busy_polls = 0;
                ok(dev, "0")
            }
            ["move", kind @ ("abs" | "rel"), value] => {
                let Ok(value) = value.parse::<i64>() else {
                    return rejected(dev, "BADDATA");
                };
                let target = if *kind == "abs" { value } else { dev.position + value };
                if target < dev.limit_min || target > dev.limit_max {
                    return rejected(dev, "BADDATA");
                }
                dev.position = target;
                dev.busy_polls = BUSY_POLLS;
                ok(dev, "0")
            }
            _ => rejected(dev, "BADCOMMAND"),
        }
    }
}

/// Hardware settings with short timeouts and a round microstep size.
pub fn hardware_config() -> HardwareConfig {
    HardwareConfig {
        reply_timeout_ms: 500,
        detect_window_ms: 50,
        poll_interval_ms: 5,
        microstep_size_um: TEST_MICROSTEP_UM,
        ..Default::default()
    }
}

/// Full config for a simulated stage that homes instantly.
pub fn quick_simulated_config() -> StageConfig {
    let mut config = StageConfig::default();
    config.simulated.home_delay_ms = 0;
    config
}

/// Zaber backend talking to a fresh fake chain.
pub fn fake_backend(count: u8, homed: bool) -> (ZaberBackend, FakeBus) {
    let (port, bus) = FakeBus::spawn(count, homed);
    let config = hardware_config();
    let connection = ZaberConnection::from_port(port, &config);
    (ZaberBackend::new(connection, &config), bus)
}
