//! Serial port discovery by USB identifiers.
//!
//! The stage sits behind a USB serial adapter whose device path
//! (`/dev/ttyUSB0`, `COM3`, ...) changes between machines and reboots, while
//! its USB vendor/product IDs do not. Discovery enumerates the system's serial
//! ports and picks the first one whose IDs match.
//!
//! # Usage
//!
//! ```rust,ignore
//! use xy_stage::hardware::port_resolver::UsbPortSpec;
//!
//! let spec = UsbPortSpec::new(0x0403, 0x6001);
//! match spec.resolve() {
//!     Some(port) => println!("stage on {port}"),
//!     None => println!("no stage attached"),
//! }
//! ```

use std::fmt;

/// Information about an available serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path or name (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port_name: String,
    /// USB vendor ID, for USB-attached ports
    pub vid: Option<u16>,
    /// USB product ID, for USB-attached ports
    pub pid: Option<u16>,
    /// Manufacturer string (if reported)
    pub manufacturer: Option<String>,
    /// Product string (if reported)
    pub product: Option<String>,
    /// USB serial number (if reported)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// A port with no USB information.
    pub fn plain(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// A USB port with the given identifiers.
    pub fn usb(port_name: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            vid: Some(vid),
            pid: Some(pid),
            ..Self::plain(port_name)
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port_name)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " (USB {:04x}:{:04x}", vid, pid)?;
            if let Some(ref product) = self.product {
                write!(f, " {}", product)?;
            }
            if let Some(ref serial) = self.serial_number {
                write!(f, " SN {}", serial)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// USB identifiers of the serial adapter to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbPortSpec {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
}

impl UsbPortSpec {
    /// Create a spec for the given vendor/product pair.
    pub fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Whether `port` carries exactly these identifiers.
    pub fn matches(&self, port: &PortInfo) -> bool {
        port.vid == Some(self.vid) && port.pid == Some(self.pid)
    }

    /// Pick the first matching port out of `ports`.
    pub fn resolve_from(&self, ports: &[PortInfo]) -> Option<String> {
        let mut matching = ports.iter().filter(|p| self.matches(p));
        let first = matching.next()?;

        let others: Vec<&str> = matching.map(|p| p.port_name.as_str()).collect();
        if !others.is_empty() {
            tracing::warn!(
                chosen = %first.port_name,
                ignored = ?others,
                "Multiple serial ports match USB {:04x}:{:04x}; using the first",
                self.vid,
                self.pid
            );
        }

        Some(first.port_name.clone())
    }

    /// Enumerate the system's serial ports and pick the first match.
    ///
    /// An enumeration failure is logged and treated as "no ports".
    pub fn resolve(&self) -> Option<String> {
        let ports = list_ports();
        let found = self.resolve_from(&ports);
        match found {
            Some(ref port) => tracing::info!(port = %port, "Stage serial port autodetected"),
            None => tracing::info!(
                candidates = ports.len(),
                "No serial port with USB {:04x}:{:04x}",
                self.vid,
                self.pid
            ),
        }
        found
    }
}

/// List all serial ports visible to the OS, sorted by name.
///
/// Returns an empty list when enumeration fails or the `serial` feature is off.
pub fn list_ports() -> Vec<PortInfo> {
    #[cfg(feature = "serial")]
    {
        use serialport::SerialPortType;

        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Could not enumerate serial ports: {}", e);
                return Vec::new();
            }
        };

        let mut infos: Vec<PortInfo> = ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => PortInfo {
                    port_name: p.port_name,
                    vid: Some(info.vid),
                    pid: Some(info.pid),
                    manufacturer: info.manufacturer,
                    product: info.product,
                    serial_number: info.serial_number,
                },
                _ => PortInfo::plain(p.port_name),
            })
            .collect();

        infos.sort_by(|a, b| a.port_name.cmp(&b.port_name));
        infos
    }

    #[cfg(not(feature = "serial"))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ports() -> Vec<PortInfo> {
        vec![
            PortInfo::plain("/dev/ttyS0"),
            PortInfo::usb("/dev/ttyUSB0", 0x10c4, 0xea60),
            PortInfo::usb("/dev/ttyUSB1", 0x0403, 0x6001),
            PortInfo::usb("/dev/ttyUSB2", 0x0403, 0x6001),
        ]
    }

    #[test]
    fn test_resolve_first_match() {
        let spec = UsbPortSpec::new(0x0403, 0x6001);
        assert_eq!(spec.resolve_from(&sample_ports()).as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_resolve_requires_both_ids() {
        let ports = vec![PortInfo::usb("COM4", 0x0403, 0x6015)];
        assert_eq!(UsbPortSpec::new(0x0403, 0x6001).resolve_from(&ports), None);
        assert_eq!(UsbPortSpec::new(0x0403, 0x6001).resolve_from(&[]), None);
    }

    #[test]
    fn test_plain_ports_never_match() {
        let spec = UsbPortSpec::new(0x0403, 0x6001);
        assert!(!spec.matches(&PortInfo::plain("/dev/ttyS0")));
    }

    #[test]
    fn test_display() {
        let mut port = PortInfo::usb("/dev/ttyUSB0", 0x0403, 0x6001);
        port.product = Some("FT232R".to_string());
        assert_eq!(port.to_string(), "/dev/ttyUSB0 (USB 0403:6001 FT232R)");
        assert_eq!(PortInfo::plain("COM1").to_string(), "COM1");
    }

    #[test]
    fn test_unlikely_ids_resolve_to_nothing() {
        assert_eq!(UsbPortSpec::new(0xffff, 0xfffe).resolve(), None);
    }
}
