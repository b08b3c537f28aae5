//! Axis and backend capability traits.
//!
//! Every backend exposes the same two seams:
//!
//! - [`Axis`]: one linear degree of freedom (X or Y) with motion, homing,
//!   position readout and travel limits.
//! - [`StageBackend`]: an opened transport that can bind two axes and be closed.
//!
//! The controller only ever talks to these traits, so adding a third backend
//! (another stage vendor, a network-attached stage) means implementing the same
//! operation set and nothing else.
//!
//! # Design Philosophy
//!
//! - All methods are async (`#[async_trait]`) and take `&self`
//! - Implementations are thread-safe (`Send + Sync`) and use interior mutability
//! - Errors are [`StageError`]; a rejected command leaves the axis usable
//! - Positions cross this boundary together with a [`Units`] tag
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park(axis: &dyn Axis) -> StageResult<()> {
//!     axis.move_absolute(0.0, Units::Micrometres, true).await?;
//!     let pos = axis.position(Units::Micrometres).await?;
//!     tracing::info!("parked at {pos} µm");
//!     Ok(())
//! }
//! ```

use crate::error::{StageError, StageResult};
use crate::units::Units;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Shared handle to one axis of an initialized stage.
pub type AxisHandle = Arc<dyn Axis>;

/// Reject a NaN or infinite motion target before it reaches a backend.
pub fn finite_target(axis: &str, value: f64) -> StageResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StageError::InvalidTarget {
            axis: axis.to_string(),
            value,
        })
    }
}

/// Which travel boundary to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Lower travel boundary
    Min,
    /// Upper travel boundary
    Max,
}

impl LimitKind {
    /// Device setting suffix for this boundary.
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Min => "min",
            LimitKind::Max => "max",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motion state of a single axis.
///
/// `Homing -> Idle <-> Moving`. A motion command may be issued from `Idle` or
/// `Moving`; a new target while moving replaces the in-flight one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    /// Calibration motion in progress
    Homing,
    /// No commanded motion in progress
    Idle,
    /// Commanded motion in progress
    Moving,
}

/// Capability: one controllable linear axis.
///
/// # Contract
/// - `blocking == true` returns once the axis reports idle; `false` returns
///   right after the command is accepted
/// - Commanded positions are not clamped here. A backend may reject an
///   out-of-range target with `CommandRejected`, and the axis stays usable
/// - Non-finite targets fail with `InvalidTarget` and never move the axis
/// - `position` is a live read, never a cached value
/// - `stop` is the emergency path and is accepted in every axis state
#[async_trait]
pub trait Axis: Send + Sync {
    /// Role of this axis on the stage, e.g. `"x"` or `"y"`.
    fn name(&self) -> &str;

    /// Whether the axis has an established zero reference.
    async fn is_homed(&self) -> StageResult<bool>;

    /// Run the homing motion to completion.
    async fn home(&self) -> StageResult<()>;

    /// Move to an absolute `position` expressed in `unit`.
    async fn move_absolute(&self, position: f64, unit: Units, blocking: bool) -> StageResult<()>;

    /// Move by a signed `delta` expressed in `unit`.
    async fn move_relative(&self, delta: f64, unit: Units, blocking: bool) -> StageResult<()>;

    /// Halt motion immediately.
    async fn stop(&self, blocking: bool) -> StageResult<()>;

    /// Current position converted to `unit`.
    async fn position(&self, unit: Units) -> StageResult<f64>;

    /// Whether a commanded motion is still in progress.
    async fn is_busy(&self) -> StageResult<bool>;

    /// Suspend until the axis reports idle.
    ///
    /// No timeout is applied; callers that need a bounded wait wrap this in
    /// `tokio::time::timeout`.
    async fn wait_until_idle(&self) -> StageResult<()>;

    /// Configured travel boundary converted to `unit`.
    async fn limit(&self, kind: LimitKind, unit: Units) -> StageResult<f64>;
}

/// An opened stage transport that can hand out its two axes.
#[async_trait]
pub trait StageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Perform backend bring-up and bind the X and Y axes, in that order.
    async fn bind_axes(&self) -> StageResult<(AxisHandle, AxisHandle)>;

    /// Release the transport. Idempotent.
    fn close(&self);

    /// Whether the transport is still open.
    fn is_open(&self) -> bool;
}
