//! Two-axis stage controller.
//!
//! [`StageController`] owns backend selection, the connection lifecycle and
//! the pair of axis handles. Callers open it with a [`BackendKind`], call
//! [`StageController::initialize`] once, then drive the returned axes until
//! the controller is closed or dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut stage = StageController::open(BackendKind::Simulated, &config).await?;
//! let (x, y) = stage.initialize().await?;
//! x.move_absolute(30_000.0, Units::Micrometres, false).await?;
//! y.move_absolute(7_000.0, Units::Micrometres, true).await?;
//! stage.close();
//! ```
//!
//! Dropping the controller closes it, so the connection is released on every
//! exit path, `?` early returns included.

use crate::config::StageConfig;
use crate::error::{StageError, StageResult};
use crate::hardware::capabilities::{AxisHandle, StageBackend};
use crate::hardware::simulated::SimulatedBackend;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Which backend drives the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Physical Zaber stage over a serial line
    Hardware,
    /// In-memory simulation
    Simulated,
}

impl BackendKind {
    /// Canonical selector string.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Hardware => "hardware",
            BackendKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hardware" | "zaber" => Ok(BackendKind::Hardware),
            "simulated" | "sim" | "dummy" => Ok(BackendKind::Simulated),
            _ => Err(StageError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Uniform two-axis stage over any [`StageBackend`].
pub struct StageController {
    kind: BackendKind,
    backend: Box<dyn StageBackend>,
    axes: Option<(AxisHandle, AxisHandle)>,
    closed: bool,
}

impl StageController {
    /// Open a controller for `kind`.
    ///
    /// For [`BackendKind::Hardware`] the port comes from `config.hardware.port`
    /// when set, otherwise from USB discovery. No match yields
    /// [`StageError::DeviceNotFound`], and the caller may retry with a manual
    /// port in the config.
    pub async fn open(kind: BackendKind, config: &StageConfig) -> StageResult<Self> {
        let backend: Box<dyn StageBackend> = match kind {
            BackendKind::Simulated => Box::new(SimulatedBackend::with_config(&config.simulated)),
            BackendKind::Hardware => open_hardware(config).await?,
        };
        info!(backend = %kind, "Stage connection opened");
        Ok(Self::from_backend(kind, backend))
    }

    /// Parse `selector` and open the matching backend.
    pub async fn open_selector(selector: &str, config: &StageConfig) -> StageResult<Self> {
        let kind = selector.parse::<BackendKind>()?;
        Self::open(kind, config).await
    }

    /// Wrap an already-opened backend.
    pub fn from_backend(kind: BackendKind, backend: Box<dyn StageBackend>) -> Self {
        Self {
            kind,
            backend,
            axes: None,
            closed: false,
        }
    }

    /// Backend this controller was opened with.
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Bring the stage up and return the X and Y axis handles.
    ///
    /// Any axis that reports itself un-homed is homed to completion before
    /// this returns. May be called once; a second call fails with
    /// [`StageError::AlreadyInitialized`].
    pub async fn initialize(&mut self) -> StageResult<(AxisHandle, AxisHandle)> {
        if self.is_closed() {
            return Err(StageError::ConnectionClosed);
        }
        if self.axes.is_some() {
            return Err(StageError::AlreadyInitialized);
        }

        let (x, y) = self.backend.bind_axes().await?;
        for axis in [&x, &y] {
            if !axis.is_homed().await? {
                info!(axis = axis.name(), "Axis not homed, homing");
                axis.home().await?;
            }
        }

        info!(backend = %self.kind, "Stage initialized");
        self.axes = Some((x.clone(), y.clone()));
        Ok((x, y))
    }

    /// The axis handles returned by [`initialize`](Self::initialize).
    pub fn axes(&self) -> StageResult<(AxisHandle, AxisHandle)> {
        if self.is_closed() {
            return Err(StageError::ConnectionClosed);
        }
        self.axes.clone().ok_or(StageError::NotInitialized)
    }

    /// Release the connection. Idempotent.
    ///
    /// Outstanding axis handles stay allocated but every operation on them
    /// fails with [`StageError::ConnectionClosed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.axes = None;
        self.backend.close();
        info!(backend = %self.kind, "Stage connection closed");
    }

    /// Whether the controller has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed || !self.backend.is_open()
    }
}

impl Drop for StageController {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StageController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageController")
            .field("kind", &self.kind)
            .field("backend", &self.backend.name())
            .field("initialized", &self.axes.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(feature = "serial")]
async fn open_hardware(config: &StageConfig) -> StageResult<Box<dyn StageBackend>> {
    use crate::hardware::port_resolver::UsbPortSpec;
    use crate::hardware::zaber::ZaberBackend;

    let hw = &config.hardware;
    let port = match hw.port {
        Some(ref port) => {
            info!(port = %port, "Using configured serial port");
            port.clone()
        }
        None => UsbPortSpec::new(hw.usb_vid, hw.usb_pid)
            .resolve()
            .ok_or(StageError::DeviceNotFound {
                vid: hw.usb_vid,
                pid: hw.usb_pid,
            })?,
    };

    Ok(Box::new(ZaberBackend::open(&port, hw).await?))
}

#[cfg(not(feature = "serial"))]
async fn open_hardware(_config: &StageConfig) -> StageResult<Box<dyn StageBackend>> {
    Err(StageError::FeatureNotEnabled("serial".to_string()))
}
