//! Named XY bookmarks kept for the length of a session.
//!
//! Nothing here is persisted automatically; [`SavedLocations::export_to`]
//! writes a tab-separated snapshot on request.

use crate::error::StageResult;
use crate::motion::XyPosition;
use std::fmt::Write as _;
use std::path::Path;

/// Header line of the exported text.
pub const EXPORT_HEADER: &str = "name\tx_um\ty_um";

/// One bookmarked position.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedLocation {
    /// User-chosen label
    pub name: String,
    /// X coordinate (µm)
    pub x_um: f64,
    /// Y coordinate (µm)
    pub y_um: f64,
}

impl SavedLocation {
    /// The stored coordinates.
    pub fn position(&self) -> XyPosition {
        XyPosition::new(self.x_um, self.y_um)
    }
}

/// Ordered set of [`SavedLocation`]s, unique by name.
#[derive(Debug, Clone, Default)]
pub struct SavedLocations {
    entries: Vec<SavedLocation>,
}

impl SavedLocations {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save `position` under `name`, replacing an existing entry in place.
    pub fn save(&mut self, name: &str, position: XyPosition) {
        let entry = SavedLocation {
            name: name.to_string(),
            x_um: position.x_um,
            y_um: position.y_um,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Look up a location by name.
    pub fn get(&self, name: &str) -> Option<&SavedLocation> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Remove and return a location.
    pub fn remove(&mut self, name: &str) -> Option<SavedLocation> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SavedLocation> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tab-separated text: a header line, then one line per entry.
    pub fn export_text(&self) -> String {
        let mut out = String::from(EXPORT_HEADER);
        out.push('\n');
        for e in &self.entries {
            let _ = writeln!(out, "{}\t{}\t{}", e.name, e.x_um, e.y_um);
        }
        out
    }

    /// Write [`export_text`](Self::export_text) to `path`.
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> StageResult<()> {
        std::fs::write(path.as_ref(), self.export_text())?;
        tracing::info!(
            path = %path.as_ref().display(),
            count = self.len(),
            "Exported saved locations"
        );
        Ok(())
    }
}
