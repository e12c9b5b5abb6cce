//! The central alert record.

use crate::event::{Phenomenon, Significance};
use crate::geo::Polygon;
use crate::threat::Threat;
use crate::ugc::UgcZone;
use crate::vtec::{EventKey, Vtec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::ops::Deref;
use std::str::FromStr;

/// The stable identity of one alert product.
///
/// `ProductId`s are strings with a reduced domain: non-empty, no internal
/// whitespace. They are composed from the issuing office, the product or
/// event code, the issue timestamp, and the event tracking number, which
/// makes an update to an event a *different* product than its original.
///
/// # Example
///
/// ```rust
/// use stormwire::alert::ProductId;
///
/// let id: ProductId = "KCLE-SV-W-0042-202512201815".parse().unwrap();
/// assert_eq!(id, "KCLE-SV-W-0042-202512201815");
///
/// assert!(ProductId::new("has whitespace").is_err());
/// assert!(ProductId::new("").is_err());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ProductId(String);

impl ProductId {
    /// Instantiate a new `ProductId`.
    pub fn new<S: Into<String>>(string: S) -> Result<Self, InvalidProductIdError> {
        let string = string.into();
        if string.is_empty() {
            Err(InvalidProductIdError::Empty)
        } else if string.chars().any(char::is_whitespace) {
            Err(InvalidProductIdError::ContainsWhitespace(string))
        } else {
            Ok(Self(string))
        }
    }

    /// Return the `ProductId` as a `&str`.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Compose the id for a product with a VTEC line.
    pub fn from_vtec(vtec: &Vtec, issued: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}-{:04}-{}",
            vtec.office,
            vtec.phenomenon,
            vtec.significance,
            vtec.event_number,
            issued.format("%Y%m%d%H%M"),
        ))
    }

    /// Compose the id for a VTEC-less product from its header fields.
    pub fn from_header(office: &str, product_code: &str, issued: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}",
            office,
            product_code,
            issued.format("%Y%m%d%H%M"),
        ))
    }
}

/// The error returned when a `ProductId` would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidProductIdError {
    /// The provided string is empty
    #[error("product id is empty")]
    Empty,
    /// Contains whitespace
    #[error("product id contains whitespace: {0:?}")]
    ContainsWhitespace(String),
}

impl FromStr for ProductId {
    type Err = InvalidProductIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for ProductId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl PartialEq<&str> for ProductId {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_str() == *other
    }
}

impl PartialEq<ProductId> for &str {
    fn eq(&self, other: &ProductId) -> bool {
        *self == other.0.as_str()
    }
}

impl Serialize for ProductId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        ProductId::new(string).map_err(serde::de::Error::custom)
    }
}

/// Which source delivered an alert.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// The NWWS-OI XMPP feed
    Push,
    /// The api.weather.gov active-alerts endpoint
    Pull,
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            AlertSource::Push => "push",
            AlertSource::Pull => "pull",
        })
    }
}

/// The lifecycle state of a stored alert.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// In effect, as first issued
    Active,
    /// In effect, updated by a follow-up product
    Updated,
    /// Cancelled by a `CAN` or `UPG` action
    Cancelled,
    /// Reached its expiration time
    Expired,
}

/// A normalized severe weather alert.
///
/// Produced by the product parser ([`crate::product::Product::parse`]) or the
/// pull-source normalizer; owned and mutated exclusively by the
/// [`crate::store::AlertStore`] after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identity, unique in the store at all times
    pub product_id: ProductId,

    /// Which source delivered this alert
    pub source: AlertSource,

    /// Decoded P-VTEC line, absent for some product types
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vtec: Option<Vtec>,

    /// Two-letter event-type code
    pub phenomenon: Phenomenon,

    /// One-letter severity class
    pub significance: Significance,

    /// Human label derived from `(phenomenon, significance)`
    pub event_name: String,

    /// Fixed display priority, lower is more urgent
    pub priority: u8,

    /// Product headline, when one was present
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headline: Option<String>,

    /// Free-form description block
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Call-to-action / precautionary text
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instruction: Option<String>,

    /// When the product was issued
    pub issued_time: DateTime<Utc>,

    /// When the hazard begins, when stated
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub effective_time: Option<DateTime<Utc>>,

    /// When the alert leaves the active set
    pub expiration_time: DateTime<Utc>,

    /// Affected counties and forecast zones, in product order, never empty
    pub affected_areas: Vec<UgcZone>,

    /// Human-readable rendering of `affected_areas`
    pub display_locations: String,

    /// Impact polygon, when the product carried one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub polygon: Option<Polygon>,

    /// Offices involved in issuing this product
    pub issuing_offices: BTreeSet<String>,

    /// Threat fields extracted from the prose
    pub threat: Threat,

    /// Lifecycle state, mutated only by the store
    pub status: AlertStatus,

    /// When this record was parsed
    pub parsed_at: DateTime<Utc>,

    /// When the store last touched this record
    pub last_updated: DateTime<Utc>,

    /// How many follow-up products have updated this record
    pub update_count: u32,
}

impl Alert {
    /// The event index tuple, when this alert carries a VTEC line.
    pub fn event_key(&self) -> Option<EventKey> {
        self.vtec.as_ref().map(Vtec::event_key)
    }

    /// True once the alert's expiration instant has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }

    /// True when any affected area touches one of `states`. An empty list
    /// accepts every alert.
    pub fn touches_states(&self, states: &[String]) -> bool {
        states.is_empty()
            || self
                .affected_areas
                .iter()
                .any(|zone| states.iter().any(|state| zone.state() == state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn product_id_rules() {
        assert!(ProductId::new("KCLE-SV-W-0042-202512201815").is_ok());
        assert!(ProductId::new("").is_err());
        assert!(ProductId::new("two words").is_err());
        assert_eq!(
            " KCLE-SPS-202512201815 ".parse::<ProductId>().unwrap(),
            "KCLE-SPS-202512201815"
        );
    }

    #[test]
    fn product_id_from_vtec() {
        let vtec: Vtec = "/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/"
            .parse()
            .unwrap();
        let issued = Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap();
        assert_eq!(
            ProductId::from_vtec(&vtec, issued),
            "KCLE-SV-W-0042-202512201815"
        );
    }

    #[test]
    fn product_id_from_header() {
        let issued = Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap();
        assert_eq!(
            ProductId::from_header("KCLE", "SPS", issued),
            "KCLE-SPS-202512201815"
        );
    }
}
