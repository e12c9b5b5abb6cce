//! The static geographic-code reference table.
//!
//! Maps county and forecast-zone codes (`OHC085`, `LEZ146`) to human names.
//! The table is loaded once at startup from a bundled JSON file and is
//! immutable thereafter; a load failure is fatal.

use crate::ugc::UgcZone;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One reference-table record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    /// The six-character geographic code
    pub code: String,
    /// Human name, e.g. "Lake County, OH"
    pub name: String,
    /// Two-letter state
    pub state: String,
    /// `"C"` for county, `"Z"` for forecast zone
    pub kind: String,
}

/// The immutable code → name lookup table.
///
/// # Example
///
/// ```rust
/// use stormwire::reference::ReferenceTable;
///
/// let table = ReferenceTable::from_json(r#"[
///     {"code": "OHC085", "name": "Lake County, OH", "state": "OH", "kind": "C"},
///     {"code": "OHC093", "name": "Lorain County, OH", "state": "OH", "kind": "C"}
/// ]"#).unwrap();
///
/// assert_eq!(table.lookup("OHC085"), Some("Lake County, OH"));
/// assert_eq!(table.lookup("XXZ000"), None);
/// assert_eq!(table.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    by_code: HashMap<String, ReferenceEntry>,
}

/// The error returned when the reference table cannot be loaded.
#[derive(thiserror::Error, Debug)]
pub enum ReferenceError {
    /// The file could not be read
    #[error("cannot read reference table {path}: {source}")]
    Io {
        /// The configured path
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The file is not a JSON array of entries
    #[error("cannot parse reference table: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ReferenceTable {
    /// Load the table from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ReferenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let entries: Vec<ReferenceEntry> = serde_json::from_slice(&bytes)?;
        Ok(Self::from_entries(entries))
    }

    /// Parse the table from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ReferenceError> {
        let entries: Vec<ReferenceEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    /// Build the table from entries.
    pub fn from_entries(entries: Vec<ReferenceEntry>) -> Self {
        Self {
            by_code: entries
                .into_iter()
                .map(|entry| (entry.code.clone(), entry))
                .collect(),
        }
    }

    /// The human name for a code, when the table knows it.
    pub fn lookup(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(|entry| entry.name.as_str())
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Render a zone list as a `; `-joined list of human names.
    ///
    /// Unknown codes fall back to the code itself. Duplicate names (one
    /// county covered by both a county and a zone code, say) are dropped,
    /// preserving first-appearance order.
    pub fn display_locations(&self, zones: &[UgcZone]) -> String {
        let mut seen = Vec::new();
        for zone in zones {
            let name = self.lookup(zone.as_str()).unwrap_or(zone.as_str());
            if !seen.iter().any(|s| s == &name) {
                seen.push(name);
            }
        }
        seen.join("; ")
    }
}

/// Truncate a rendered location list for display: at most `max` full names,
/// with an overflow count.
///
/// This is the subscriber-facing policy; the store always holds the full
/// list.
///
/// ```rust
/// use stormwire::reference::truncate_locations;
///
/// assert_eq!(truncate_locations("A; B; C", 3), "A; B; C");
/// assert_eq!(truncate_locations("A; B; C; D; E", 3), "A; B; C +2 more");
/// ```
pub fn truncate_locations(display: &str, max: usize) -> String {
    let names: Vec<&str> = display.split("; ").collect();
    if names.len() <= max {
        display.into()
    } else {
        format!("{} +{} more", names[..max].join("; "), names.len() - max)
    }
}
