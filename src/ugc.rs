//! Types for the Universal Geographic Code block.
//!
//! The first non-blank block of every product segment lists the counties or
//! forecast zones the segment applies to, plus a `DDHHMM` expiration tail:
//!
//! ```text
//! OHC085-093-PAC003-201900-
//! ```
//!
//! expands to counties `OHC085`, `OHC093`, and `PAC003`, expiring on day 20
//! at 19:00 UTC. The state-and-kind prefix carries forward across bare
//! numeric tokens, `>` expands a numeric range, and the block may wrap
//! across several lines, each ending in `-`.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// One county or forecast zone code, e.g. `OHC085` or `LEZ146`.
///
/// `UgcZone`s are strings with a fixed shape: a two-letter state, a kind
/// letter (`C` for county, `Z` for forecast zone), and a three-digit number.
///
/// # Example
///
/// ```rust
/// use stormwire::ugc::{UgcZone, UgcKind};
///
/// let zone: UgcZone = "OHC085".parse().unwrap();
/// assert_eq!(zone.state(), "OH");
/// assert_eq!(zone.kind(), UgcKind::County);
/// assert_eq!(zone.number(), 85);
/// assert_eq!(zone.as_str(), "OHC085");
///
/// assert!("OHX085".parse::<UgcZone>().is_err());
/// assert!("OHC08".parse::<UgcZone>().is_err());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct UgcZone(String);

/// Whether a geographic code names a county or a forecast zone.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum UgcKind {
    /// `C` — county FIPS code
    County,
    /// `Z` — public forecast zone
    Zone,
}

impl UgcZone {
    /// Assemble a zone from its parts.
    pub fn new(state: &str, kind: UgcKind, number: u16) -> Result<Self, InvalidUgcError> {
        let kind_char = match kind {
            UgcKind::County => 'C',
            UgcKind::Zone => 'Z',
        };
        format!("{state}{kind_char}{number:03}").parse()
    }

    /// The zone code as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-letter state code.
    pub fn state(&self) -> &str {
        &self.0[0..2]
    }

    /// County or forecast zone.
    pub fn kind(&self) -> UgcKind {
        match self.0.as_bytes()[2] {
            b'C' => UgcKind::County,
            _ => UgcKind::Zone,
        }
    }

    /// The three-digit zone number.
    pub fn number(&self) -> u16 {
        self.0[3..6].parse().expect("constructed from three digits")
    }
}

impl std::fmt::Display for UgcZone {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UgcZone {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for UgcZone {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// The error returned when a geographic code or UGC block would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidUgcError {
    /// A zone code is not `SS[CZ]nnn`
    #[error("invalid zone code: {0:?}")]
    InvalidZone(String),
    /// A block token could not be interpreted
    #[error("invalid UGC token: {0:?}")]
    InvalidToken(String),
    /// A `nnn>nnn` range runs backwards
    #[error("backwards UGC range: {0}>{1}")]
    BackwardsRange(u16, u16),
    /// A bare numeric token appeared before any state prefix
    #[error("UGC number {0:?} with no preceding state prefix")]
    NumberWithoutPrefix(String),
    /// The block has no `DDHHMM` expiration tail
    #[error("UGC block missing expiration tail")]
    MissingExpiration,
    /// The `DDHHMM` tail is out of range
    #[error("invalid UGC expiration: day {day} {hour:02}:{minute:02}")]
    InvalidExpiration {
        /// Day-of-month field
        day: u32,
        /// Hour field
        hour: u32,
        /// Minute field
        minute: u32,
    },
    /// The block lists no zones
    #[error("UGC block lists no zones")]
    Empty,
}

impl FromStr for UgcZone {
    type Err = InvalidUgcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let ok = bytes.len() == 6
            && bytes[0].is_ascii_uppercase()
            && bytes[1].is_ascii_uppercase()
            && matches!(bytes[2], b'C' | b'Z')
            && bytes[3..6].iter().all(u8::is_ascii_digit);
        if ok {
            Ok(Self(s.into()))
        } else {
            Err(InvalidUgcError::InvalidZone(s.into()))
        }
    }
}

impl Serialize for UgcZone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UgcZone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A decoded UGC block: the fully expanded zone list and the raw `DDHHMM`
/// expiration tail.
///
/// # Example
///
/// ```rust
/// use stormwire::ugc::UgcBlock;
///
/// let block: UgcBlock = "OHC085-093-PAC003-201900-".parse().unwrap();
/// assert_eq!(block.zones.len(), 3);
/// assert_eq!(block.zones[0], "OHC085");
/// assert_eq!(block.zones[1], "OHC093");
/// assert_eq!(block.zones[2], "PAC003");
/// assert_eq!((block.expires_day, block.expires_hour, block.expires_minute), (20, 19, 0));
///
/// // Ranges expand under the current prefix
/// let block: UgcBlock = "LEZ142>145-201900-".parse().unwrap();
/// assert_eq!(
///     block.zones.iter().map(|z| z.as_str()).collect::<Vec<_>>(),
///     ["LEZ142", "LEZ143", "LEZ144", "LEZ145"],
/// );
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UgcBlock {
    /// Fully expanded zone list, in block order
    pub zones: Vec<UgcZone>,
    /// Day-of-month of the expiration tail
    pub expires_day: u32,
    /// UTC hour of the expiration tail
    pub expires_hour: u32,
    /// Minute of the expiration tail
    pub expires_minute: u32,
}

impl UgcBlock {
    /// Resolve the `DDHHMM` tail against a reference instant.
    ///
    /// The tail names a day of month without naming the month. Products are
    /// parsed close to their issuance, so the tail is interpreted in the
    /// reference month, rolling into the next month when the named day is
    /// far behind the reference day (end-of-month issuance expiring early
    /// next month).
    pub fn expiration_after(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        let in_month = |year: i32, month: u32| {
            Utc.with_ymd_and_hms(
                year,
                month,
                self.expires_day,
                self.expires_hour,
                self.expires_minute,
                0,
            )
            .single()
        };

        let candidate = in_month(reference.year(), reference.month());
        match candidate {
            Some(t) if t + Duration::days(15) >= reference => t,
            _ => {
                // Next month, handling year rollover and short months.
                let (year, month) = if reference.month() == 12 {
                    (reference.year() + 1, 1)
                } else {
                    (reference.year(), reference.month() + 1)
                };
                in_month(year, month).unwrap_or(reference)
            }
        }
    }

    fn push_range(
        zones: &mut Vec<UgcZone>,
        prefix: &str,
        from: u16,
        to: u16,
    ) -> Result<(), InvalidUgcError> {
        if to < from {
            return Err(InvalidUgcError::BackwardsRange(from, to));
        }
        for n in from..=to {
            zones.push(format!("{prefix}{n:03}").parse()?);
        }
        Ok(())
    }
}

impl FromStr for UgcBlock {
    type Err = InvalidUgcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut zones: Vec<UgcZone> = Vec::new();
        let mut prefix: Option<String> = None;
        let mut expiration: Option<(u32, u32, u32)> = None;

        let tokens = s
            .split_whitespace()
            .flat_map(|line| line.split('-'))
            .filter(|t| !t.is_empty());

        for token in tokens {
            if expiration.is_some() {
                // Nothing may follow the expiration tail.
                return Err(InvalidUgcError::InvalidToken(token.into()));
            }

            let is_digits = token.bytes().all(|b| b.is_ascii_digit());

            if is_digits && token.len() == 6 {
                let day: u32 = token[0..2].parse().unwrap();
                let hour: u32 = token[2..4].parse().unwrap();
                let minute: u32 = token[4..6].parse().unwrap();
                if day == 0 || day > 31 || hour > 23 || minute > 59 {
                    return Err(InvalidUgcError::InvalidExpiration { day, hour, minute });
                }
                expiration = Some((day, hour, minute));
                continue;
            }

            if is_digits && token.len() == 3 {
                let prefix = prefix
                    .as_deref()
                    .ok_or_else(|| InvalidUgcError::NumberWithoutPrefix(token.into()))?;
                zones.push(format!("{prefix}{token}").parse()?);
                continue;
            }

            // Range or plain token, with or without a fresh prefix.
            let (first, second) = match token.split_once('>') {
                Some((a, b)) => (a, Some(b)),
                None => (token, None),
            };

            let current_prefix = if first.len() == 6 {
                let zone: UgcZone = first.parse()?;
                let p = zone.as_str()[0..3].to_string();
                zones.push(zone);
                prefix = Some(p.clone());
                p
            } else if first.len() == 3 && first.bytes().all(|b| b.is_ascii_digit()) {
                let p = prefix
                    .clone()
                    .ok_or_else(|| InvalidUgcError::NumberWithoutPrefix(first.into()))?;
                zones.push(format!("{p}{first}").parse()?);
                p
            } else {
                return Err(InvalidUgcError::InvalidToken(token.into()));
            };

            if let Some(second) = second {
                if second.len() != 3 || !second.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(InvalidUgcError::InvalidToken(token.into()));
                }
                let from = zones
                    .last()
                    .expect("range start was just pushed")
                    .number()
                    + 1;
                let to: u16 = second.parse().unwrap();
                Self::push_range(&mut zones, &current_prefix, from, to)?;
            }
        }

        let (expires_day, expires_hour, expires_minute) =
            expiration.ok_or(InvalidUgcError::MissingExpiration)?;
        if zones.is_empty() {
            return Err(InvalidUgcError::Empty);
        }

        Ok(UgcBlock {
            zones,
            expires_day,
            expires_hour,
            expires_minute,
        })
    }
}
