//! Types for the P-VTEC event identifier.
//!
//! Most warning products carry a single structured line of the form
//! `/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/` which encodes the
//! product class, the action being taken, the issuing office, the phenomenon
//! and significance, the event tracking number, and the event's time window.
//! This line is the primary identity mechanism for the alert lifecycle: a
//! follow-up product references the same `(office, phenomenon, significance,
//! event number)` tuple with an action describing what changed.

use crate::event::{Phenomenon, Significance};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// The product class of a VTEC line.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum VtecClass {
    /// `O` — operational product
    Operational,
    /// `T` — test product
    Test,
    /// `E` — experimental product
    Experimental,
    /// `X` — experimental VTEC in an operational product
    ExperimentalVtec,
}

impl VtecClass {
    fn as_code(&self) -> &'static str {
        match self {
            VtecClass::Operational => "O",
            VtecClass::Test => "T",
            VtecClass::Experimental => "E",
            VtecClass::ExperimentalVtec => "X",
        }
    }
}

/// The action a VTEC line takes on its event.
///
/// The action drives the store's upsert semantics: `NEW` inserts, the
/// continuation family updates in place, and `CAN`/`UPG`/`EXP` remove the
/// referenced event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum VtecAction {
    /// `NEW` — a new event
    New,
    /// `CON` — event continues, unchanged in area and time
    Con,
    /// `EXT` — event extended in time
    Ext,
    /// `EXA` — event extended in area
    Exa,
    /// `EXB` — event extended in both area and time
    Exb,
    /// `UPG` — event upgraded to a more significant product
    Upg,
    /// `CAN` — event cancelled
    Can,
    /// `EXP` — event expired
    Exp,
    /// `COR` — correction to a previous product
    Cor,
    /// `ROU` — routine product
    Rou,
}

impl VtecAction {
    fn as_code(&self) -> &'static str {
        match self {
            VtecAction::New => "NEW",
            VtecAction::Con => "CON",
            VtecAction::Ext => "EXT",
            VtecAction::Exa => "EXA",
            VtecAction::Exb => "EXB",
            VtecAction::Upg => "UPG",
            VtecAction::Can => "CAN",
            VtecAction::Exp => "EXP",
            VtecAction::Cor => "COR",
            VtecAction::Rou => "ROU",
        }
    }

    /// True when this action removes its referent from the active set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VtecAction::Can | VtecAction::Upg | VtecAction::Exp)
    }
}

impl FromStr for VtecAction {
    type Err = InvalidVtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(VtecAction::New),
            "CON" => Ok(VtecAction::Con),
            "EXT" => Ok(VtecAction::Ext),
            "EXA" => Ok(VtecAction::Exa),
            "EXB" => Ok(VtecAction::Exb),
            "UPG" => Ok(VtecAction::Upg),
            "CAN" => Ok(VtecAction::Can),
            "EXP" => Ok(VtecAction::Exp),
            "COR" => Ok(VtecAction::Cor),
            "ROU" => Ok(VtecAction::Rou),
            other => Err(InvalidVtecError::UnknownAction(other.into())),
        }
    }
}

impl std::fmt::Display for VtecAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// The `(office, phenomenon, significance, event number)` tuple identifying
/// one tracked event across its product lifetime.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Four-letter issuing office
    pub office: String,
    /// Two-letter phenomenon code
    pub phenomenon: Phenomenon,
    /// One-letter significance code
    pub significance: Significance,
    /// Yearly event tracking number assigned by the office
    pub event_number: u16,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{:04}",
            self.office, self.phenomenon, self.significance, self.event_number
        )
    }
}

/// A decoded P-VTEC line.
///
/// # Example
///
/// ```rust
/// use stormwire::vtec::{Vtec, VtecAction};
/// use stormwire::event::{Phenomenon, Significance};
///
/// let vtec: Vtec = "/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/"
///     .parse()
///     .unwrap();
///
/// assert_eq!(vtec.action, VtecAction::New);
/// assert_eq!(vtec.office, "KCLE");
/// assert_eq!(vtec.phenomenon, Phenomenon::SevereThunderstorm);
/// assert_eq!(vtec.significance, Significance::Warning);
/// assert_eq!(vtec.event_number, 42);
/// assert!(vtec.begin.is_some());
/// assert!(vtec.end.is_some());
///
/// // Parsing and formatting round-trip
/// assert_eq!(
///     vtec.to_string(),
///     "/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/"
/// );
/// ```
///
/// An all-zero time (`000000T0000Z`) means the bound is open:
///
/// ```rust
/// # use stormwire::vtec::Vtec;
/// let vtec: Vtec = "/O.CON.KCLE.WS.W.0007.000000T0000Z-251221T0600Z/"
///     .parse()
///     .unwrap();
/// assert!(vtec.begin.is_none());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vtec {
    /// Product class
    pub class: VtecClass,
    /// Action taken on the event
    pub action: VtecAction,
    /// Four-letter issuing office
    pub office: String,
    /// Phenomenon code
    pub phenomenon: Phenomenon,
    /// Significance code
    pub significance: Significance,
    /// Event tracking number
    pub event_number: u16,
    /// Event begin instant, or `None` for an open beginning
    pub begin: Option<DateTime<Utc>>,
    /// Event end instant, or `None` for an open end
    pub end: Option<DateTime<Utc>>,
}

impl Vtec {
    /// The index tuple identifying this event across its product lifetime.
    pub fn event_key(&self) -> EventKey {
        EventKey {
            office: self.office.clone(),
            phenomenon: self.phenomenon.clone(),
            significance: self.significance,
            event_number: self.event_number,
        }
    }

    /// Scan `text` for the first line containing a parseable P-VTEC string.
    ///
    /// Returns `None` when no line carries one; some product types (special
    /// weather statements in particular) legally have no VTEC.
    pub fn find_in(text: &str) -> Option<Vtec> {
        for line in text.lines() {
            let line = line.trim();
            if let Some(start) = line.find("/O.").or_else(|| line.find("/T.")) {
                if let Some(end) = line[start + 1..].find('/') {
                    if let Ok(vtec) = line[start..=start + 1 + end].parse() {
                        return Some(vtec);
                    }
                }
            }
        }
        None
    }
}

/// The error returned when a P-VTEC string would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidVtecError {
    /// The string does not have the `/k.aaa.cccc.pp.s.nnnn.begin-end/` shape
    #[error("malformed VTEC string: {0:?}")]
    Malformed(String),
    /// Unknown product class
    #[error("unknown VTEC product class: {0:?}")]
    UnknownClass(String),
    /// Unknown action code
    #[error("unknown VTEC action: {0:?}")]
    UnknownAction(String),
    /// Office code is not four uppercase letters
    #[error("invalid VTEC office: {0:?}")]
    InvalidOffice(String),
    /// Phenomenon code is invalid
    #[error("invalid VTEC phenomenon: {0}")]
    InvalidPhenomenon(#[from] crate::event::InvalidPhenomenonError),
    /// Significance code is invalid
    #[error("invalid VTEC significance: {0}")]
    InvalidSignificance(#[from] crate::event::InvalidSignificanceError),
    /// Event number is not four digits
    #[error("invalid VTEC event number: {0:?}")]
    InvalidEventNumber(String),
    /// A time bound is not of the form `yymmddThhmmZ`
    #[error("invalid VTEC time: {0:?}")]
    InvalidTime(String),
}

/// Decode a `yymmddThhmmZ` bound; all zeroes means the bound is open.
fn parse_time(s: &str) -> Result<Option<DateTime<Utc>>, InvalidVtecError> {
    if s == "000000T0000Z" {
        return Ok(None);
    }
    let bad = || InvalidVtecError::InvalidTime(s.into());

    if s.len() != 12 || s.as_bytes()[6] != b'T' || s.as_bytes()[11] != b'Z' {
        return Err(bad());
    }
    let year: i32 = s[0..2].parse().map_err(|_| bad())?;
    let month: u32 = s[2..4].parse().map_err(|_| bad())?;
    let day: u32 = s[4..6].parse().map_err(|_| bad())?;
    let hour: u32 = s[7..9].parse().map_err(|_| bad())?;
    let minute: u32 = s[9..11].parse().map_err(|_| bad())?;

    NaiveDate::from_ymd_opt(2000 + year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(bad)
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.format("%y%m%dT%H%MZ").to_string(),
        None => "000000T0000Z".into(),
    }
}

impl FromStr for Vtec {
    type Err = InvalidVtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || InvalidVtecError::Malformed(s.into());

        let inner = s
            .strip_prefix('/')
            .and_then(|s| s.strip_suffix('/'))
            .ok_or_else(malformed)?;

        let mut parts = inner.split('.');
        let (class, action, office, phenomenon, significance, event_number, window) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(k), Some(a), Some(o), Some(p), Some(sig), Some(n), Some(w), None) => {
                (k, a, o, p, sig, n, w)
            }
            _ => return Err(malformed()),
        };

        let class = match class {
            "O" => VtecClass::Operational,
            "T" => VtecClass::Test,
            "E" => VtecClass::Experimental,
            "X" => VtecClass::ExperimentalVtec,
            other => return Err(InvalidVtecError::UnknownClass(other.into())),
        };

        if office.len() != 4 || !office.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(InvalidVtecError::InvalidOffice(office.into()));
        }

        if event_number.len() != 4 {
            return Err(InvalidVtecError::InvalidEventNumber(event_number.into()));
        }
        let event_number: u16 = event_number
            .parse()
            .map_err(|_| InvalidVtecError::InvalidEventNumber(event_number.into()))?;

        let (begin, end) = window
            .split_once('-')
            .ok_or_else(malformed)?;

        Ok(Vtec {
            class,
            action: action.parse()?,
            office: office.into(),
            phenomenon: phenomenon.parse()?,
            significance: significance.parse()?,
            event_number,
            begin: parse_time(begin)?,
            end: parse_time(end)?,
        })
    }
}

impl std::fmt::Display for Vtec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "/{}.{}.{}.{}.{}.{:04}.{}-{}/",
            self.class.as_code(),
            self.action,
            self.office,
            self.phenomenon,
            self.significance,
            self.event_number,
            format_time(self.begin),
            format_time(self.end),
        )
    }
}
