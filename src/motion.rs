//! Two-axis motion helpers built on the [`Axis`] surface.
//!
//! These are the operations an interactive front end performs over and over:
//! read both positions, move to an XY target, jog one step in a direction,
//! and stop everything.

use crate::error::StageResult;
use crate::hardware::capabilities::Axis;
use crate::units::Units;
use futures::future::try_join;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stage position in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XyPosition {
    /// X coordinate (µm)
    pub x_um: f64,
    /// Y coordinate (µm)
    pub y_um: f64,
}

impl XyPosition {
    /// Position from X and Y in micrometres.
    pub fn new(x_um: f64, y_um: f64) -> Self {
        Self { x_um, y_um }
    }
}

impl fmt::Display for XyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {:.3} µm, Y: {:.3} µm", self.x_um, self.y_um)
    }
}

/// Read both axes.
pub async fn read_xy(x: &dyn Axis, y: &dyn Axis) -> StageResult<XyPosition> {
    let (x_um, y_um) = try_join(
        x.position(Units::Micrometres),
        y.position(Units::Micrometres),
    )
    .await?;
    Ok(XyPosition { x_um, y_um })
}

/// Move both axes to `target`.
///
/// Both moves are issued without waiting so the axes travel together. With
/// `blocking`, returns once both report idle.
pub async fn move_xy(
    x: &dyn Axis,
    y: &dyn Axis,
    target: XyPosition,
    blocking: bool,
) -> StageResult<()> {
    tracing::debug!(%target, blocking, "XY move");
    x.move_absolute(target.x_um, Units::Micrometres, false).await?;
    y.move_absolute(target.y_um, Units::Micrometres, false).await?;

    if blocking {
        try_join(x.wait_until_idle(), y.wait_until_idle()).await?;
    }
    Ok(())
}

/// Jog direction as seen on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// +Y
    Up,
    /// -Y
    Down,
    /// -X
    Left,
    /// +X
    Right,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" | "u" => Ok(Direction::Up),
            "down" | "d" => Ok(Direction::Down),
            "left" | "l" => Ok(Direction::Left),
            "right" | "r" => Ok(Direction::Right),
            other => Err(format!(
                "Unknown jog direction '{}'. Expected up, down, left or right",
                other
            )),
        }
    }
}

/// Relative move of `step_mm` millimetres in `direction`, without waiting.
pub async fn jog(x: &dyn Axis, y: &dyn Axis, direction: Direction, step_mm: f64) -> StageResult<()> {
    let step_um = Units::Millimetres.to_micrometres(step_mm);
    let (axis, delta) = match direction {
        Direction::Up => (y, step_um),
        Direction::Down => (y, -step_um),
        Direction::Right => (x, step_um),
        Direction::Left => (x, -step_um),
    };
    tracing::debug!(?direction, axis = axis.name(), delta, "Jog");
    axis.move_relative(delta, Units::Micrometres, false).await
}

/// Stop both axes without waiting.
///
/// Both stops are attempted even if the first fails; the first error is
/// returned.
pub async fn stop_all(x: &dyn Axis, y: &dyn Axis) -> StageResult<()> {
    let (rx, ry) = futures::join!(x.stop(false), y.stop(false));
    rx.and(ry)
}
