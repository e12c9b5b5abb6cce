//! Phenomenon and significance codes.
//!
//! Every alert product carries a two-letter phenomenon code and a one-letter
//! significance code, either inside its P-VTEC line or derived from the AWIPS
//! product class when no VTEC is present. Together they determine the human
//! event name ("Tornado Warning" vs. "Tornado Watch") and the fixed display
//! priority.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// A weather phenomenon, i.e. the two-letter event-type code carried in the
/// P-VTEC line.
///
/// Codes this crate does not know by name are preserved verbatim in
/// [`Phenomenon::Other`] rather than rejected; the upstream code list grows
/// over time and an unrecognized phenomenon is still a valid alert.
///
/// # Example
///
/// ```rust
/// use stormwire::event::Phenomenon;
///
/// let p: Phenomenon = "TO".parse().unwrap();
/// assert_eq!(p, Phenomenon::Tornado);
/// assert_eq!(p.as_code(), "TO");
///
/// let other: Phenomenon = "QQ".parse().unwrap();
/// assert_eq!(other.as_code(), "QQ");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Phenomenon {
    /// `TO` — tornado
    Tornado,
    /// `SV` — severe thunderstorm
    SevereThunderstorm,
    /// `FF` — flash flood
    FlashFlood,
    /// `FL` — flood
    Flood,
    /// `FA` — areal flood
    ArealFlood,
    /// `WS` — winter storm
    WinterStorm,
    /// `WW` — winter weather
    WinterWeather,
    /// `LE` — lake effect snow
    LakeEffectSnow,
    /// `WC` — wind chill
    WindChill,
    /// `EC` — extreme cold
    ExtremeCold,
    /// `IS` — ice storm
    IceStorm,
    /// `BZ` — blizzard
    Blizzard,
    /// `HW` — high wind
    HighWind,
    /// `WI` — wind
    Wind,
    /// `DS` — dust storm
    DustStorm,
    /// `SQ` — snow squall
    SnowSquall,
    /// `SPS` — special weather statement, which carries no VTEC line
    SpecialWeatherStatement,
    /// Any other code, preserved verbatim
    Other(String),
}

impl Phenomenon {
    /// The upstream code for this phenomenon.
    pub fn as_code(&self) -> &str {
        match self {
            Phenomenon::Tornado => "TO",
            Phenomenon::SevereThunderstorm => "SV",
            Phenomenon::FlashFlood => "FF",
            Phenomenon::Flood => "FL",
            Phenomenon::ArealFlood => "FA",
            Phenomenon::WinterStorm => "WS",
            Phenomenon::WinterWeather => "WW",
            Phenomenon::LakeEffectSnow => "LE",
            Phenomenon::WindChill => "WC",
            Phenomenon::ExtremeCold => "EC",
            Phenomenon::IceStorm => "IS",
            Phenomenon::Blizzard => "BZ",
            Phenomenon::HighWind => "HW",
            Phenomenon::Wind => "WI",
            Phenomenon::DustStorm => "DS",
            Phenomenon::SnowSquall => "SQ",
            Phenomenon::SpecialWeatherStatement => "SPS",
            Phenomenon::Other(code) => code,
        }
    }

    /// The human base name for this phenomenon, without a significance
    /// qualifier.
    pub fn base_name(&self) -> &str {
        match self {
            Phenomenon::Tornado => "Tornado",
            Phenomenon::SevereThunderstorm => "Severe Thunderstorm",
            Phenomenon::FlashFlood => "Flash Flood",
            Phenomenon::Flood => "Flood",
            Phenomenon::ArealFlood => "Areal Flood",
            Phenomenon::WinterStorm => "Winter Storm",
            Phenomenon::WinterWeather => "Winter Weather",
            Phenomenon::LakeEffectSnow => "Lake Effect Snow",
            Phenomenon::WindChill => "Wind Chill",
            Phenomenon::ExtremeCold => "Extreme Cold",
            Phenomenon::IceStorm => "Ice Storm",
            Phenomenon::Blizzard => "Blizzard",
            Phenomenon::HighWind => "High Wind",
            Phenomenon::Wind => "Wind",
            Phenomenon::DustStorm => "Dust Storm",
            Phenomenon::SnowSquall => "Snow Squall",
            Phenomenon::SpecialWeatherStatement => "Special Weather Statement",
            Phenomenon::Other(code) => code,
        }
    }
}

/// The error returned when a phenomenon code would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidPhenomenonError {
    /// The code is empty
    #[error("phenomenon code is empty")]
    Empty,
    /// The code contains characters other than uppercase ASCII letters
    #[error("phenomenon code is not uppercase ASCII: {0:?}")]
    NotUppercaseAscii(String),
}

impl FromStr for Phenomenon {
    type Err = InvalidPhenomenonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidPhenomenonError::Empty);
        }
        if !s.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(InvalidPhenomenonError::NotUppercaseAscii(s.into()));
        }
        Ok(match s {
            "TO" => Phenomenon::Tornado,
            "SV" => Phenomenon::SevereThunderstorm,
            "FF" => Phenomenon::FlashFlood,
            "FL" => Phenomenon::Flood,
            "FA" => Phenomenon::ArealFlood,
            "WS" => Phenomenon::WinterStorm,
            "WW" => Phenomenon::WinterWeather,
            "LE" => Phenomenon::LakeEffectSnow,
            "WC" => Phenomenon::WindChill,
            "EC" => Phenomenon::ExtremeCold,
            "IS" => Phenomenon::IceStorm,
            "BZ" => Phenomenon::Blizzard,
            "HW" => Phenomenon::HighWind,
            "WI" => Phenomenon::Wind,
            "DS" => Phenomenon::DustStorm,
            "SQ" => Phenomenon::SnowSquall,
            "SPS" => Phenomenon::SpecialWeatherStatement,
            other => Phenomenon::Other(other.into()),
        })
    }
}

impl std::fmt::Display for Phenomenon {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

impl Serialize for Phenomenon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for Phenomenon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The one-letter severity class of an alert product.
///
/// # Example
///
/// ```rust
/// use stormwire::event::Significance;
///
/// let s: Significance = "W".parse().unwrap();
/// assert_eq!(s, Significance::Warning);
/// assert_eq!(s.as_code(), "W");
/// assert_eq!(s.label(), "Warning");
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Significance {
    /// `W` — conditions pose a threat to life or property
    Warning,
    /// `A` — conditions are favorable for the hazard
    Watch,
    /// `Y` — less serious conditions that cause significant inconvenience
    Advisory,
    /// `S` — follow-up or special statement
    Statement,
    /// `F` — forecast product
    Forecast,
}

impl Significance {
    /// The upstream one-letter code.
    pub fn as_code(&self) -> &'static str {
        match self {
            Significance::Warning => "W",
            Significance::Watch => "A",
            Significance::Advisory => "Y",
            Significance::Statement => "S",
            Significance::Forecast => "F",
        }
    }

    /// The human label used in event names.
    pub fn label(&self) -> &'static str {
        match self {
            Significance::Warning => "Warning",
            Significance::Watch => "Watch",
            Significance::Advisory => "Advisory",
            Significance::Statement => "Statement",
            Significance::Forecast => "Forecast",
        }
    }
}

/// The error returned when a significance code would be invalid.
#[derive(thiserror::Error, Debug)]
#[error("unknown significance code: {0:?}")]
pub struct InvalidSignificanceError(pub String);

impl FromStr for Significance {
    type Err = InvalidSignificanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "W" => Ok(Significance::Warning),
            "A" => Ok(Significance::Watch),
            "Y" => Ok(Significance::Advisory),
            "S" => Ok(Significance::Statement),
            "F" => Ok(Significance::Forecast),
            other => Err(InvalidSignificanceError(other.into())),
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

impl Serialize for Significance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for Significance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The human event name for a `(phenomenon, significance)` pair.
///
/// The significance disambiguates otherwise identical phenomena: `TO`/`W` is
/// a "Tornado Warning" while `TO`/`A` is a "Tornado Watch". A special weather
/// statement is always named as such regardless of significance.
///
/// ```rust
/// use stormwire::event::{event_name, Phenomenon, Significance};
///
/// assert_eq!(event_name(&Phenomenon::Tornado, Significance::Warning), "Tornado Warning");
/// assert_eq!(event_name(&Phenomenon::Tornado, Significance::Watch), "Tornado Watch");
/// ```
pub fn event_name(phenomenon: &Phenomenon, significance: Significance) -> String {
    if *phenomenon == Phenomenon::SpecialWeatherStatement {
        return "Special Weather Statement".into();
    }
    format!("{} {}", phenomenon.base_name(), significance.label())
}

/// The fixed display priority for a `(phenomenon, significance)` pair.
///
/// Lower is more urgent. Tornado warnings outrank severe thunderstorm
/// warnings, which outrank flash flood warnings, which outrank every watch;
/// statements rank last.
pub fn priority(phenomenon: &Phenomenon, significance: Significance) -> u8 {
    use Phenomenon::*;
    use Significance::*;

    match (phenomenon, significance) {
        (Tornado, Warning) => 1,
        (SevereThunderstorm, Warning) => 2,
        (FlashFlood, Warning) => 3,
        (SnowSquall, Warning) => 4,
        (Blizzard | IceStorm | WinterStorm | HighWind | DustStorm, Warning) => 5,
        (_, Warning) => 6,
        (Tornado, Watch) => 7,
        (SevereThunderstorm, Watch) => 8,
        (_, Watch) => 9,
        (_, Advisory) => 10,
        (SpecialWeatherStatement, _) => 11,
        (_, Statement) => 12,
        (_, Forecast) => 13,
    }
}
