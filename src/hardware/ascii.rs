//! Zaber ASCII protocol framing.
//!
//! Commands are single lines:
//!
//! ```text
//! /{device} {axis} {id} {command}\n
//! ```
//!
//! Device `0` addresses every device on the daisy chain, axis `0` addresses
//! the whole device. The message ID (0-99) is echoed back in the reply.
//! Incoming lines start with a type character:
//!
//! | Prefix | Kind  | Shape                                     |
//! |--------|-------|-------------------------------------------|
//! | `@`    | reply | `@01 1 07 OK IDLE -- 12345`               |
//! | `!`    | alert | `!01 1 IDLE --`                           |
//! | `#`    | info  | `#01 0 07 free text`                      |
//!
//! Replies without an ID are still parsed, with [`Reply::id`] set to `None`.
//!
//! A reply flag is `OK` or `RJ` (rejected). The warning field is `--` when the
//! device has nothing to report, otherwise a two-letter code. An optional
//! `:XX` checksum suffix is stripped before parsing.

use crate::error::{StageError, StageResult};

/// Warning field value meaning "no warning".
pub const NO_WARNING: &str = "--";

/// Message IDs wrap around after this many commands.
pub const MESSAGE_ID_COUNT: u8 = 100;

/// Format a command line for `device`/`axis` tagged with message `id`.
pub fn format_command(device: u8, axis: u8, id: u8, command: &str) -> String {
    if command.is_empty() {
        format!("/{} {} {:02}\n", device, axis, id)
    } else {
        format!("/{} {} {:02} {}\n", device, axis, id, command)
    }
}

/// A parsed `@` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Address of the answering device
    pub device: u8,
    /// Axis the reply refers to (0 = device scope)
    pub axis: u8,
    /// Echoed message ID, if the command carried one
    pub id: Option<u8>,
    /// `true` for `OK`, `false` for `RJ`
    pub accepted: bool,
    /// `true` while the device or axis is moving
    pub busy: bool,
    /// Highest-priority warning flag, `None` for `--`
    pub warning: Option<String>,
    /// Reply data: a value, `0`, or a rejection reason
    pub data: String,
}

impl Reply {
    /// Data parsed as a float.
    pub fn data_f64(&self) -> StageResult<f64> {
        self.data.trim().parse::<f64>().map_err(|_| {
            StageError::Communication(format!("expected numeric reply data, got '{}'", self.data))
        })
    }

    /// Data parsed as an integer.
    pub fn data_i64(&self) -> StageResult<i64> {
        self.data.trim().parse::<i64>().map_err(|_| {
            StageError::Communication(format!("expected integer reply data, got '{}'", self.data))
        })
    }

    /// Data parsed as a device boolean (`1`/`0`).
    pub fn data_bool(&self) -> StageResult<bool> {
        match self.data.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(StageError::Communication(format!(
                "expected 0 or 1 in reply data, got '{}'",
                other
            ))),
        }
    }
}

/// Any line the device may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Response to a command
    Reply(Reply),
    /// Unsolicited status change (e.g. motion finished)
    Alert {
        /// Sending device
        device: u8,
        /// Axis the alert refers to
        axis: u8,
        /// `true` if still busy
        busy: bool,
        /// Warning flag, `None` for `--`
        warning: Option<String>,
    },
    /// Informational text, typically following a reply
    Info {
        /// Sending device
        device: u8,
        /// Free text after the header
        text: String,
    },
}

impl Message {
    /// Parse one received line (without the terminating newline).
    pub fn parse(line: &str) -> StageResult<Self> {
        let line = strip_checksum(line.trim());
        let malformed = || StageError::Communication(format!("malformed reply '{}'", line));

        let (kind, body) = match line.chars().next() {
            Some(c @ ('@' | '!' | '#')) => (c, &line[1..]),
            _ => return Err(malformed()),
        };

        let mut fields = body.split_whitespace();
        let device = parse_address(fields.next()).ok_or_else(malformed)?;
        let axis = parse_address(fields.next()).ok_or_else(malformed)?;

        match kind {
            '@' => {
                let mut flag = fields.next();
                let id = match flag {
                    Some("OK" | "RJ") | None => None,
                    Some(field) => {
                        flag = fields.next();
                        Some(field.parse::<u8>().map_err(|_| malformed())?)
                    }
                };
                let accepted = match flag {
                    Some("OK") => true,
                    Some("RJ") => false,
                    _ => return Err(malformed()),
                };
                let busy = parse_status(fields.next()).ok_or_else(malformed)?;
                let warning = parse_warning(fields.next()).ok_or_else(malformed)?;
                let data = fields.collect::<Vec<_>>().join(" ");
                Ok(Message::Reply(Reply {
                    device,
                    axis,
                    id,
                    accepted,
                    busy,
                    warning,
                    data,
                }))
            }
            '!' => {
                let busy = parse_status(fields.next()).ok_or_else(malformed)?;
                let warning = parse_warning(fields.next()).ok_or_else(malformed)?;
                Ok(Message::Alert {
                    device,
                    axis,
                    busy,
                    warning,
                })
            }
            _ => Ok(Message::Info {
                device,
                text: fields.collect::<Vec<_>>().join(" "),
            }),
        }
    }
}

fn strip_checksum(line: &str) -> &str {
    match line.rsplit_once(':') {
        Some((head, sum)) if sum.len() == 2 && sum.chars().all(|c| c.is_ascii_hexdigit()) => head,
        _ => line,
    }
}

fn parse_address(field: Option<&str>) -> Option<u8> {
    field?.parse().ok()
}

fn parse_status(field: Option<&str>) -> Option<bool> {
    match field? {
        "IDLE" => Some(false),
        "BUSY" => Some(true),
        _ => None,
    }
}

fn parse_warning(field: Option<&str>) -> Option<Option<String>> {
    match field? {
        NO_WARNING => Some(None),
        w if w.len() == 2 => Some(Some(w.to_string())),
        _ => None,
    }
}

/// Whether a warning code indicates a fault (codes starting with `F`).
pub fn is_fault(warning: &str) -> bool {
    warning.starts_with('F')
}
