//! Simulated stage backend.
//!
//! An in-memory stand-in with the same per-axis operations as the hardware
//! backend and no physical I/O. Useful for tests, demos and UI work without a
//! stage attached.
//!
//! Behavior differs from hardware:
//!
//! - Axes start at position 0 and are always homed
//! - Moves take effect instantly and never check travel limits, so callers can
//!   exercise unclamped ranges. Only NaN and infinite targets are refused
//! - `unit` and `blocking` arguments are accepted and ignored
//! - `home()` takes a configurable delay (tokio time, not thread sleep) so
//!   callers can exercise their async/timeout handling. Like a real device,
//!   homing keeps going if the caller stops waiting
//! - `stop()` aborts homing and returns the axis to `Idle`

use crate::config::SimulatedConfig;
use crate::error::{StageError, StageResult};
use crate::hardware::capabilities::{
    finite_target, Axis, AxisHandle, AxisState, LimitKind, StageBackend,
};
use crate::units::Units;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};

/// Default homing delay, long enough to be visible in a UI.
const DEFAULT_HOME_DELAY: Duration = Duration::from_secs(1);

/// How often a waiter re-checks a running homing cycle, so `stop()` is seen.
const HOMING_POLL: Duration = Duration::from_millis(10);

/// Default simulated travel range in micrometres.
const DEFAULT_LIMITS_UM: (f64, f64) = (0.0, 50_000.0);

// =============================================================================
// SimulatedConnection
// =============================================================================

/// Trivial "transport" for the simulated backend: a connected flag.
#[derive(Debug, Clone)]
pub struct SimulatedConnection {
    connected: Arc<AtomicBool>,
}

impl SimulatedConnection {
    /// A new, connected simulated transport.
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether `close()` has not yet been called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("SimulatedConnection: closed");
        }
    }

    fn ensure_connected(&self) -> StageResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StageError::ConnectionClosed)
        }
    }
}

impl Default for SimulatedConnection {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct AxisStatus {
    position_um: f64,
    is_homed: bool,
    /// When the running homing cycle completes
    homing_until: Option<Instant>,
}

impl AxisStatus {
    fn is_homing(&self, now: Instant) -> bool {
        self.homing_until.is_some_and(|done| now < done)
    }

    fn is_homed(&self, now: Instant) -> bool {
        self.is_homed || self.homing_until.is_some_and(|done| now >= done)
    }

    fn state(&self, now: Instant) -> AxisState {
        if self.is_homing(now) {
            AxisState::Homing
        } else {
            AxisState::Idle
        }
    }
}

// =============================================================================
// SimulatedAxis
// =============================================================================

/// Simulated linear axis.
///
/// # Example
///
/// ```rust,ignore
/// let axis = SimulatedAxis::builder("x").home_delay(Duration::ZERO).build();
/// axis.move_absolute(30_000.0, Units::Micrometres, false).await?;
/// assert_eq!(axis.position(Units::Micrometres).await?, 30_000.0);
/// ```
#[derive(Clone)]
pub struct SimulatedAxis {
    name: String,
    status: Arc<RwLock<AxisStatus>>,
    limits_um: (f64, f64),
    home_delay: Duration,
    connection: SimulatedConnection,
}

impl SimulatedAxis {
    /// Create a builder for configuring a simulated axis.
    pub fn builder(name: &str) -> SimulatedAxisBuilder {
        SimulatedAxisBuilder::new(name)
    }

    /// Current motion state.
    pub async fn state(&self) -> AxisState {
        self.status.read().await.state(Instant::now())
    }
}

#[async_trait]
impl Axis for SimulatedAxis {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_homed(&self) -> StageResult<bool> {
        self.connection.ensure_connected()?;
        Ok(self.status.read().await.is_homed(Instant::now()))
    }

    async fn home(&self) -> StageResult<()> {
        self.connection.ensure_connected()?;

        {
            let now = Instant::now();
            let mut status = self.status.write().await;
            status.is_homed = status.is_homed(now);
            status.homing_until = Some(now + self.home_delay);
        }
        tracing::debug!("SimulatedAxis {}: Homing...", self.name);

        self.wait_until_idle().await?;
        tracing::debug!("SimulatedAxis {}: Homing complete", self.name);
        Ok(())
    }

    async fn move_absolute(&self, position: f64, _unit: Units, _blocking: bool) -> StageResult<()> {
        self.connection.ensure_connected()?;
        let position = finite_target(&self.name, position)?;

        let mut status = self.status.write().await;
        tracing::debug!(
            "SimulatedAxis {}: Moving from {:.3} to {:.3}",
            self.name,
            status.position_um,
            position
        );
        status.position_um = position;
        Ok(())
    }

    async fn move_relative(&self, delta: f64, _unit: Units, _blocking: bool) -> StageResult<()> {
        self.connection.ensure_connected()?;
        let delta = finite_target(&self.name, delta)?;

        let mut status = self.status.write().await;
        status.position_um = finite_target(&self.name, status.position_um + delta)?;
        tracing::debug!(
            "SimulatedAxis {}: Moved by {:.3} to {:.3}",
            self.name,
            delta,
            status.position_um
        );
        Ok(())
    }

    async fn stop(&self, _blocking: bool) -> StageResult<()> {
        self.connection.ensure_connected()?;

        let now = Instant::now();
        let mut status = self.status.write().await;
        status.is_homed = status.is_homed(now);
        status.homing_until = None;
        tracing::debug!("SimulatedAxis {}: Stop", self.name);
        Ok(())
    }

    async fn position(&self, _unit: Units) -> StageResult<f64> {
        self.connection.ensure_connected()?;
        Ok(self.status.read().await.position_um)
    }

    async fn is_busy(&self) -> StageResult<bool> {
        self.connection.ensure_connected()?;
        Ok(self.status.read().await.is_homing(Instant::now()))
    }

    async fn wait_until_idle(&self) -> StageResult<()> {
        // Motion is instantaneous; only homing can be in progress
        loop {
            self.connection.ensure_connected()?;
            let Some(done) = self.status.read().await.homing_until else {
                return Ok(());
            };
            if Instant::now() >= done {
                return Ok(());
            }
            sleep(HOMING_POLL.min(done.saturating_duration_since(Instant::now()))).await;
        }
    }

    async fn limit(&self, kind: LimitKind, _unit: Units) -> StageResult<f64> {
        self.connection.ensure_connected()?;
        Ok(match kind {
            LimitKind::Min => self.limits_um.0,
            LimitKind::Max => self.limits_um.1,
        })
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SimulatedAxis`] with fluent API
pub struct SimulatedAxisBuilder {
    name: String,
    initial_position_um: f64,
    homed: bool,
    limits_um: (f64, f64),
    home_delay: Duration,
    connection: Option<SimulatedConnection>,
}

impl SimulatedAxisBuilder {
    /// Create a new builder with defaults
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_position_um: 0.0,
            homed: true,
            limits_um: DEFAULT_LIMITS_UM,
            home_delay: DEFAULT_HOME_DELAY,
            connection: None,
        }
    }

    /// Set initial position (µm)
    pub fn initial_position(mut self, position_um: f64) -> Self {
        self.initial_position_um = position_um;
        self
    }

    /// Start un-homed, so that bring-up has to home the axis
    pub fn unhomed(mut self) -> Self {
        self.homed = false;
        self
    }

    /// Set reported travel limits (µm)
    pub fn limits(mut self, min_um: f64, max_um: f64) -> Self {
        self.limits_um = (min_um, max_um);
        self
    }

    /// Set the simulated homing duration
    pub fn home_delay(mut self, delay: Duration) -> Self {
        self.home_delay = delay;
        self
    }

    /// Attach the axis to a shared connection
    pub fn connection(mut self, connection: SimulatedConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Build the axis
    pub fn build(self) -> SimulatedAxis {
        SimulatedAxis {
            name: self.name,
            status: Arc::new(RwLock::new(AxisStatus {
                position_um: self.initial_position_um,
                is_homed: self.homed,
                homing_until: None,
            })),
            limits_um: self.limits_um,
            home_delay: self.home_delay,
            connection: self.connection.unwrap_or_default(),
        }
    }
}

// =============================================================================
// SimulatedBackend
// =============================================================================

/// [`StageBackend`] producing two fresh [`SimulatedAxis`] handles.
pub struct SimulatedBackend {
    connection: SimulatedConnection,
    home_delay: Duration,
    limits_um: (f64, f64),
}

impl SimulatedBackend {
    /// Backend configured from the `[simulated]` config section.
    pub fn with_config(config: &SimulatedConfig) -> Self {
        Self {
            connection: SimulatedConnection::new(),
            home_delay: Duration::from_millis(config.home_delay_ms),
            limits_um: (config.limit_min_um, config.limit_max_um),
        }
    }

    /// The underlying simulated connection.
    pub fn connection(&self) -> &SimulatedConnection {
        &self.connection
    }

    fn make_axis(&self, name: &str) -> SimulatedAxis {
        SimulatedAxis::builder(name)
            .limits(self.limits_um.0, self.limits_um.1)
            .home_delay(self.home_delay)
            .connection(self.connection.clone())
            .build()
    }
}

#[async_trait]
impl StageBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn bind_axes(&self) -> StageResult<(AxisHandle, AxisHandle)> {
        self.connection.ensure_connected()?;
        let x: AxisHandle = Arc::new(self.make_axis("x"));
        let y: AxisHandle = Arc::new(self.make_axis("y"));
        Ok((x, y))
    }

    fn close(&self) {
        self.connection.close();
    }

    fn is_open(&self) -> bool {
        self.connection.is_connected()
    }
}
