//! Threat-field extraction from free-form warning prose.
//!
//! The WHAT block of a warning describes its hazards in prose: "60 mph wind
//! gusts and quarter size hail", "up to 8 inches of snow", "MOVING EAST AT
//! 40 MPH". This module extracts those into typed fields.
//!
//! Extraction is two-staged. A scanner first tags every line with the hazard
//! vocabularies it mentions (`HAIL`, `WIND`, `SNOW`, `ICE`, `TORNADO`,
//! `MOTION`, `FLOOD`); the numeric patterns then run only against lines
//! carrying the matching tag. Tagging before matching is what keeps
//! "up to 1 inch of quick snow" from being read as one-inch hail.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

/// How a tornado was detected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TornadoDetection {
    /// Rotation seen on radar
    RadarIndicated,
    /// Spotter or public report
    Observed,
    /// Confirmed on the ground
    Confirmed,
}

/// A damage-threat qualifier carried by tornado and flash flood products.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageThreat {
    /// `CONSIDERABLE` damage threat
    Considerable,
    /// `CATASTROPHIC` damage threat
    Catastrophic,
}

/// An eight-point compass direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum CompassPoint {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
}

impl FromStr for CompassPoint {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORTH" => Ok(CompassPoint::North),
            "NORTHEAST" => Ok(CompassPoint::Northeast),
            "EAST" => Ok(CompassPoint::East),
            "SOUTHEAST" => Ok(CompassPoint::Southeast),
            "SOUTH" => Ok(CompassPoint::South),
            "SOUTHWEST" => Ok(CompassPoint::Southwest),
            "WEST" => Ok(CompassPoint::West),
            "NORTHWEST" => Ok(CompassPoint::Northwest),
            _ => Err(()),
        }
    }
}

/// Storm motion: direction of travel and forward speed.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormMotion {
    /// Direction the storm is moving toward
    pub direction: CompassPoint,
    /// Forward speed in miles per hour
    pub speed_mph: u16,
}

/// Threat fields extracted from a product's prose.
///
/// All fields are independent; a severe thunderstorm warning typically
/// carries wind and hail, a winter storm warning snow and ice, and most
/// products carry only a subset.
///
/// # Example
///
/// ```rust
/// use stormwire::threat::Threat;
///
/// let threat = Threat::extract(
///     "Severe thunderstorms with winds 40 to 50 mph, wind gusts up to \
///      70 mph, and quarter size hail, moving east at 40 mph.",
/// );
///
/// assert_eq!(threat.wind_min_mph, Some(40));
/// assert_eq!(threat.wind_max_mph, Some(50));
/// assert_eq!(threat.max_wind_gust_mph, Some(70));
/// assert_eq!(threat.max_hail_size_inches, Some(1.0));
/// assert!(threat.storm_motion.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Threat {
    /// How a tornado was detected, when one is in the product
    pub tornado_detection: Option<TornadoDetection>,
    /// Tornado damage-threat qualifier
    pub tornado_damage: Option<DamageThreat>,
    /// Low end of the sustained wind range, mph
    pub wind_min_mph: Option<u16>,
    /// High end of the sustained wind range, mph
    pub wind_max_mph: Option<u16>,
    /// Peak wind gust, mph
    pub max_wind_gust_mph: Option<u16>,
    /// Maximum hail diameter, inches
    pub max_hail_size_inches: Option<f32>,
    /// Low end of the snow accumulation range, inches
    pub snow_min_inches: Option<f32>,
    /// High end of the snow accumulation range, inches
    pub snow_max_inches: Option<f32>,
    /// Ice accumulation, inches
    pub ice_accumulation_inches: Option<f32>,
    /// Flash flood damage-threat qualifier
    pub flash_flood_damage: Option<DamageThreat>,
    /// Storm motion vector
    pub storm_motion: Option<StormMotion>,
}

/// Hazard vocabularies a line can mention.
#[derive(Debug, Copy, Clone, Default)]
struct LineTags {
    hail: bool,
    wind: bool,
    snow: bool,
    ice: bool,
    tornado: bool,
    motion: bool,
    flood: bool,
}

fn tag_line(line: &str) -> LineTags {
    fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
        cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
    }
    static HAIL: OnceLock<Regex> = OnceLock::new();
    static WIND: OnceLock<Regex> = OnceLock::new();
    static SNOW: OnceLock<Regex> = OnceLock::new();
    static ICE: OnceLock<Regex> = OnceLock::new();
    static TORNADO: OnceLock<Regex> = OnceLock::new();
    static MOTION: OnceLock<Regex> = OnceLock::new();
    static FLOOD: OnceLock<Regex> = OnceLock::new();

    LineTags {
        hail: re(&HAIL, r"\bHAIL|\bSIZE\b").is_match(line),
        wind: re(&WIND, r"\bWIND|\bGUST").is_match(line),
        snow: re(&SNOW, r"\bSNOW").is_match(line),
        ice: re(&ICE, r"\bICE\b").is_match(line),
        tornado: re(&TORNADO, r"\bTORNADO").is_match(line),
        motion: re(&MOTION, r"\bMOVING\b").is_match(line),
        flood: re(&FLOOD, r"\bFLASH\s+FLOOD").is_match(line),
    }
}

const NAMED_HAIL_SIZES: &[(&str, f32)] = &[
    ("SOFTBALL", 4.0),
    ("BASEBALL", 2.75),
    ("TENNIS BALL", 2.5),
    ("GOLF BALL", 1.75),
    ("PING PONG", 1.5),
    ("QUARTER", 1.0),
];

const ICE_FRACTIONS: &[(&str, f32)] = &[
    ("THREE QUARTERS OF AN INCH", 0.75),
    ("ONE HALF OF AN INCH", 0.5),
    ("HALF AN INCH", 0.5),
    ("ONE QUARTER OF AN INCH", 0.25),
    ("A QUARTER OF AN INCH", 0.25),
    ("ONE TENTH OF AN INCH", 0.1),
    ("A TENTH OF AN INCH", 0.1),
];

impl Threat {
    /// Extract threat fields from prose.
    ///
    /// `text` is typically the concatenation of a product's WHAT block and
    /// description. Matching is case-insensitive; the input is uppercased
    /// line by line.
    pub fn extract(text: &str) -> Threat {
        let mut threat = Threat::default();
        let lines: Vec<String> = text.lines().map(|l| l.to_ascii_uppercase()).collect();
        // `SOURCE...Radar indicated rotation.` carries the detection token
        // on a line that never says "tornado"; the token only means a
        // tornado detection when the product mentions one at all.
        let mentions_tornado = lines.iter().any(|l| l.contains("TORNADO"));
        for line in &lines {
            threat.scan_line(line, mentions_tornado);
        }
        threat
    }

    fn scan_line(&mut self, line: &str, mentions_tornado: bool) {
        let tags = tag_line(line);

        if tags.tornado || (mentions_tornado && line.starts_with("SOURCE...")) {
            self.scan_tornado(line);
        }
        if tags.wind {
            self.scan_wind(line);
        }
        if tags.hail {
            self.scan_hail(line, &tags);
        }
        if tags.snow {
            self.scan_snow(line);
        }
        if tags.ice {
            self.scan_ice(line);
        }
        if tags.flood {
            self.scan_flood(line);
        }
        if tags.motion {
            self.scan_motion(line);
        }
    }

    fn scan_tornado(&mut self, line: &str) {
        // Strongest detection wins when a product mentions several.
        let detection = if line.contains("CONFIRMED") {
            Some(TornadoDetection::Confirmed)
        } else if line.contains("OBSERVED") {
            Some(TornadoDetection::Observed)
        } else if line.contains("RADAR INDICATED") {
            Some(TornadoDetection::RadarIndicated)
        } else {
            None
        };
        match (self.tornado_detection, detection) {
            (None, Some(d)) => self.tornado_detection = Some(d),
            (Some(prev), Some(d)) if d > prev => self.tornado_detection = Some(d),
            _ => {}
        }

        if line.starts_with("TORNADO DAMAGE THREAT") {
            if line.contains("CATASTROPHIC") {
                self.tornado_damage = Some(DamageThreat::Catastrophic);
            } else if line.contains("CONSIDERABLE") {
                self.tornado_damage = Some(DamageThreat::Considerable);
            }
        }
    }

    fn scan_wind(&mut self, line: &str) {
        static SUSTAINED: OnceLock<Regex> = OnceLock::new();
        static GUST_TO: OnceLock<Regex> = OnceLock::new();
        static GUST_LEADING: OnceLock<Regex> = OnceLock::new();
        static GUST_TAG: OnceLock<Regex> = OnceLock::new();

        let sustained = SUSTAINED.get_or_init(|| {
            Regex::new(r"\bWINDS?\s+(\d{1,3})\s+TO\s+(\d{1,3})\s+MPH").expect("static regex")
        });
        // "gusts up to 70 mph" / "gusts to 70 mph"
        let gust_to = GUST_TO.get_or_init(|| {
            Regex::new(r"\bGUSTS?\s+(?:UP\s+)?TO\s+(\d{1,3})\s+MPH").expect("static regex")
        });
        // "70 mph wind gusts"
        let gust_leading = GUST_LEADING.get_or_init(|| {
            Regex::new(r"(\d{1,3})\s+MPH\s+WIND\s+GUSTS?\b").expect("static regex")
        });
        // "WIND...70 MPH" / "MAX WIND GUST...70 MPH" tag lines
        let gust_tag = GUST_TAG.get_or_init(|| {
            Regex::new(r"\b(?:MAX\s+)?WIND(?:\s+GUSTS?)?\s*\.\.\.\s*(\d{1,3})\s*MPH")
                .expect("static regex")
        });

        if let Some(captures) = sustained.captures(line) {
            self.wind_min_mph = captures[1].parse().ok();
            self.wind_max_mph = captures[2].parse().ok();
        }

        let gust: Option<u16> = gust_to
            .captures(line)
            .or_else(|| gust_leading.captures(line))
            .or_else(|| gust_tag.captures(line))
            .and_then(|captures| captures[1].parse().ok());
        if let Some(gust) = gust {
            // Several phrasings of the same hazard: the strongest stated
            // gust stands.
            self.max_wind_gust_mph = Some(self.max_wind_gust_mph.unwrap_or(0).max(gust));
        }
    }

    fn scan_hail(&mut self, line: &str, tags: &LineTags) {
        static ADJACENT: OnceLock<Regex> = OnceLock::new();
        static GENERIC: OnceLock<Regex> = OnceLock::new();

        // "HAIL...1.00 IN" / "MAX HAIL SIZE...1.00 IN" — amount directly
        // attached to the HAIL token.
        let adjacent = ADJACENT.get_or_init(|| {
            Regex::new(r"\bHAIL(?:\s+SIZE)?\b[.\s]*(\d+(?:\.\d+)?)\s*IN\b")
                .expect("static regex")
        });
        let generic = GENERIC
            .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*IN(?:CH(?:ES)?)?\b").expect("static regex"));

        let mut record = |size: f32| {
            let max = self.max_hail_size_inches.unwrap_or(0.0).max(size);
            self.max_hail_size_inches = Some(max);
        };

        if let Some(captures) = adjacent.captures(line) {
            if let Ok(size) = captures[1].parse() {
                record(size);
            }
            return;
        }

        for (name, size) in NAMED_HAIL_SIZES {
            if line.contains(name) {
                record(*size);
                return;
            }
        }

        // A free-standing inch amount counts as hail only when the line
        // cannot be claiming it for snow or ice.
        if !tags.snow && !tags.ice {
            if let Some(captures) = generic.captures(line) {
                if let Ok(size) = captures[1].parse() {
                    record(size);
                }
            }
        }
    }

    fn scan_snow(&mut self, line: &str) {
        static RANGE: OnceLock<Regex> = OnceLock::new();
        static UP_TO: OnceLock<Regex> = OnceLock::new();
        static SINGLE: OnceLock<Regex> = OnceLock::new();

        let range = RANGE.get_or_init(|| {
            Regex::new(r"(\d+(?:\.\d+)?)\s+TO\s+(\d+(?:\.\d+)?)\s+INCH(?:ES)?\b")
                .expect("static regex")
        });
        let up_to = UP_TO.get_or_init(|| {
            Regex::new(r"UP\s+TO\s+(\d+(?:\.\d+)?)\s+INCH(?:ES)?\b").expect("static regex")
        });
        let single = SINGLE.get_or_init(|| {
            Regex::new(r"(\d+(?:\.\d+)?)\s+INCH(?:ES)?\b").expect("static regex")
        });

        if let Some(captures) = range.captures(line) {
            self.snow_min_inches = captures[1].parse().ok();
            self.snow_max_inches = captures[2].parse().ok();
        } else if let Some(captures) = up_to.captures(line) {
            self.snow_max_inches = captures[1].parse().ok();
        } else if let Some(captures) = single.captures(line) {
            self.snow_max_inches = captures[1].parse().ok();
        }
    }

    fn scan_ice(&mut self, line: &str) {
        static NUMERIC: OnceLock<Regex> = OnceLock::new();

        let numeric = NUMERIC.get_or_init(|| {
            Regex::new(r"(\d+(?:\.\d+)?)\s*(?:OF AN\s+)?INCH(?:ES)?\b").expect("static regex")
        });

        if let Some(captures) = numeric.captures(line) {
            self.ice_accumulation_inches = captures[1].parse().ok();
            return;
        }
        for (phrase, amount) in ICE_FRACTIONS {
            if line.contains(phrase) {
                self.ice_accumulation_inches = Some(*amount);
                return;
            }
        }
    }

    fn scan_flood(&mut self, line: &str) {
        if line.contains("FLASH FLOOD DAMAGE THREAT") {
            if line.contains("CATASTROPHIC") {
                self.flash_flood_damage = Some(DamageThreat::Catastrophic);
            } else if line.contains("CONSIDERABLE") {
                self.flash_flood_damage = Some(DamageThreat::Considerable);
            }
        }
    }

    fn scan_motion(&mut self, line: &str) {
        static MOTION: OnceLock<Regex> = OnceLock::new();

        let motion = MOTION.get_or_init(|| {
            Regex::new(
                r"MOVING\s+(NORTHEAST|NORTHWEST|SOUTHEAST|SOUTHWEST|NORTH|SOUTH|EAST|WEST)\s+AT\s+(\d{1,3})\s+MPH",
            )
            .expect("static regex")
        });

        if let Some(captures) = motion.captures(line) {
            if let (Ok(direction), Ok(speed_mph)) =
                (captures[1].parse::<CompassPoint>(), captures[2].parse::<u16>())
            {
                self.storm_motion = Some(StormMotion {
                    direction,
                    speed_mph,
                });
            }
        }
    }
}

impl PartialOrd for TornadoDetection {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TornadoDetection {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(d: &TornadoDetection) -> u8 {
            match d {
                TornadoDetection::RadarIndicated => 0,
                TornadoDetection::Observed => 1,
                TornadoDetection::Confirmed => 2,
            }
        }
        rank(self).cmp(&rank(other))
    }
}
