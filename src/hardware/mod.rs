//! Stage backends and the transport they run on.
//!
//! - [`capabilities`]: the `Axis` and `StageBackend` traits every backend implements
//! - [`simulated`]: in-memory backend, no I/O
//! - [`zaber`]: Zaber ASCII backend over a serial line
//! - [`serial`], [`port_resolver`], [`ascii`]: plumbing for the hardware backend

pub mod ascii;
pub mod capabilities;
pub mod port_resolver;
pub mod serial;
pub mod simulated;
pub mod zaber;

pub use capabilities::{Axis, AxisHandle, AxisState, LimitKind, StageBackend};
pub use port_resolver::{list_ports, PortInfo, UsbPortSpec};
pub use simulated::{SimulatedAxis, SimulatedBackend, SimulatedConnection};
pub use zaber::{ZaberAxis, ZaberBackend, ZaberConnection};
