//! # XY Stage Controller Library
//!
//! A uniform two-axis motion API over a physical Zaber stage or an in-memory
//! simulation. Front ends (the bundled CLI, a GUI, a script) open a
//! [`StageController`], call `initialize()` once for the X and Y axis handles,
//! then issue moves and position reads against those handles.
//!
//! ## Crate Structure
//!
//! - **`controller`**: `StageController` and backend selection (`BackendKind`).
//! - **`hardware`**: the `Axis`/`StageBackend` traits, the simulated backend and
//!   the Zaber serial backend with its transport plumbing.
//! - **`motion`**: two-axis helpers (XY moves, jogs, stop-all).
//! - **`locations`**: named position bookmarks with plain-text export.
//! - **`units`**: micrometre/millimetre conversions.
//! - **`config`**: figment-backed configuration (`config/stage.toml` + env).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the `StageError` enum shared by every module.

pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod locations;
pub mod logging;
pub mod motion;
pub mod units;

pub use config::StageConfig;
pub use controller::{BackendKind, StageController};
pub use error::{StageError, StageResult};
pub use hardware::{Axis, AxisHandle, LimitKind};
pub use units::Units;
