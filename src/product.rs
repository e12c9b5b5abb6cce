//! The raw-product parser.
//!
//! A product is one text bulletin as delivered by the Weather Wire:
//!
//! ```text
//! WUUS53 KCLE 201815          <- WMO communication header
//! SVRCLE                      <- AWIPS product id
//! OHC085-201900-              <- UGC block
//! /O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/
//!
//! ...free-form and starred sections...
//!
//! LAT...LON 4119 8185 4121 8176 4112 8170 4111 8184
//!
//! $$
//! ```
//!
//! Parsing is pure, synchronous, and deterministic: a raw body plus its
//! received-at instant either becomes one [`Alert`] per segment or a typed
//! [`ParseError`]. Multi-segment products (one `$$`-terminated segment per
//! zone group) share the communication header.

use crate::alert::{Alert, AlertSource, AlertStatus, ProductId};
use crate::event::{self, Phenomenon, Significance};
use crate::geo::Polygon;
use crate::reference::ReferenceTable;
use crate::threat::Threat;
use crate::ugc::{InvalidUgcError, UgcBlock};
use crate::vtec::{InvalidVtecError, Vtec};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

#[cfg(test)]
mod tests;

/// The WMO abbreviated heading: the first line of every product.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WmoHeader {
    /// Six-character WMO product type, e.g. `WUUS53`
    pub ttaaii: String,
    /// Four-letter issuing office, e.g. `KCLE`
    pub office: String,
    /// Day-of-month of issuance
    pub day: u32,
    /// UTC hour of issuance
    pub hour: u32,
    /// Minute of issuance
    pub minute: u32,
}

impl WmoHeader {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let bad = || ParseError::MalformedHeader(line.into());

        let mut parts = line.split_whitespace();
        let (ttaaii, office, ddhhmm) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(o), Some(d)) => (t, o, d),
            _ => return Err(bad()),
        };
        // A fourth token is an optional correction tag (`CCA`, `RRB`, ...).
        if let Some(extra) = parts.next() {
            let is_tag = extra.len() == 3 && extra.chars().all(|c| c.is_ascii_uppercase());
            if !is_tag || parts.next().is_some() {
                return Err(bad());
            }
        }

        let ttaaii_ok = ttaaii.len() == 6
            && ttaaii[..2].chars().all(|c| c.is_ascii_uppercase())
            && ttaaii[2..4].chars().all(|c| c.is_ascii_alphanumeric())
            && ttaaii[4..].chars().all(|c| c.is_ascii_digit());
        let office_ok = office.len() == 4 && office.chars().all(|c| c.is_ascii_uppercase());
        let time_ok = ddhhmm.len() == 6 && ddhhmm.bytes().all(|b| b.is_ascii_digit());
        if !(ttaaii_ok && office_ok && time_ok) {
            return Err(bad());
        }

        let day: u32 = ddhhmm[0..2].parse().unwrap();
        let hour: u32 = ddhhmm[2..4].parse().unwrap();
        let minute: u32 = ddhhmm[4..6].parse().unwrap();
        if day == 0 || day > 31 || hour > 23 || minute > 59 {
            return Err(bad());
        }

        Ok(WmoHeader {
            ttaaii: ttaaii.into(),
            office: office.into(),
            day,
            hour,
            minute,
        })
    }

    /// Resolve the header's `DDHHMM` to a full instant near `received`.
    ///
    /// The header names a day of month without a month. Products arrive
    /// close to issuance, so the day is interpreted in the received month
    /// unless that would place issuance more than two days in the future
    /// (a product issued late on the last day of the previous month).
    pub fn issued_near(&self, received: DateTime<Utc>) -> DateTime<Utc> {
        let in_month = |year: i32, month: u32| {
            Utc.with_ymd_and_hms(year, month, self.day, self.hour, self.minute, 0)
                .single()
        };

        match in_month(received.year(), received.month()) {
            Some(t) if t <= received + Duration::days(2) => t,
            _ => {
                let (year, month) = if received.month() == 1 {
                    (received.year() - 1, 12)
                } else {
                    (received.year(), received.month() - 1)
                };
                in_month(year, month).unwrap_or(received)
            }
        }
    }
}

/// A fully parsed product: the shared header plus one alert per segment.
#[derive(Debug, Clone)]
pub struct Product {
    /// The WMO communication header
    pub wmo: WmoHeader,
    /// The AWIPS product id from the second header line, when present
    pub awips_id: Option<String>,
    /// One alert per successfully parsed segment
    pub alerts: Vec<Alert>,
}

/// The error returned when a product cannot be parsed.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// The product body is empty
    #[error("product body is empty")]
    EmptyBody,
    /// The first line is not a WMO communication header
    #[error("malformed communication header: {0:?}")]
    MalformedHeader(String),
    /// A segment's leading UGC block is absent or unusable
    #[error("segment has no usable UGC block: {0}")]
    MissingUgc(#[from] InvalidUgcError),
    /// A line that should be a VTEC string fails to decode
    #[error("invalid VTEC line: {0}")]
    InvalidVtec(#[from] InvalidVtecError),
}

/// AWIPS product classes this pipeline ingests. Everything else on the wire
/// (forecasts, observations, hydrology) is skipped without comment.
const ALERT_PRODUCT_CLASSES: &[&str] = &[
    "TOR", "SVR", "SVS", "FFW", "FFS", "FLW", "FLS", "SPS", "WSW", "WCN", "NPW", "EWW", "SMW",
];

impl Product {
    /// Cheap pre-filter: does this raw body look like an alert product?
    ///
    /// Checks the AWIPS product class on the second header line, falling
    /// back to the WMO heading's warning (`W`) type letter. Used by the
    /// ingest loop to skip the bulk of the wire without attempting (and
    /// diagnostically recording) a full parse.
    pub fn looks_like_alert(raw: &str) -> bool {
        let mut lines = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.chars().all(|c| c.is_control()))
            .skip_while(|l| l.bytes().all(|b| b.is_ascii_digit()));

        let Some(header) = lines.next() else {
            return false;
        };
        if let Some(pil) = lines.next() {
            if ALERT_PRODUCT_CLASSES
                .iter()
                .any(|class| pil.starts_with(class))
            {
                return true;
            }
        }
        header.starts_with('W')
    }

    /// Parse a raw product without a reference table; `display_locations`
    /// falls back to the raw zone codes.
    pub fn parse(raw: &str, received_at: DateTime<Utc>) -> Result<Product, ParseError> {
        Self::parse_with(raw, received_at, None)
    }

    /// Parse a raw product, rendering locations through `table` when given.
    pub fn parse_with(
        raw: &str,
        received_at: DateTime<Utc>,
        table: Option<&ReferenceTable>,
    ) -> Result<Product, ParseError> {
        let mut lines = raw
            .lines()
            .map(|l| l.trim_end())
            // Control characters and the LDM sequence number wrap the body
            // on some transports.
            .filter(|l| l.is_empty() || !l.chars().all(|c| c.is_control()))
            .skip_while(|l| {
                let t = l.trim();
                t.is_empty() || t.bytes().all(|b| b.is_ascii_digit())
            })
            .peekable();

        let header_line = lines.next().ok_or(ParseError::EmptyBody)?;
        let wmo = WmoHeader::parse(header_line.trim())?;

        // Second line: AWIPS product id (3-letter class + up to 3-char site).
        let awips_id = match lines.peek() {
            Some(line) => {
                let candidate = line.trim();
                let looks_like_pil = (3..=6).contains(&candidate.len())
                    && candidate.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                    && candidate.chars().take(3).all(|c| c.is_ascii_uppercase());
                if looks_like_pil {
                    lines.next();
                    Some(candidate.to_string())
                } else {
                    None
                }
            }
            None => None,
        };

        let body: Vec<&str> = lines.collect();
        if body.iter().all(|l| l.trim().is_empty()) {
            return Err(ParseError::EmptyBody);
        }

        // Split into `$$`-terminated segments; a product with no `$$` is a
        // single segment.
        let mut segments: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in body {
            if line.trim() == "$$" {
                segments.push(std::mem::take(&mut current));
            } else {
                current.push(line);
            }
        }
        if segments.is_empty() {
            segments.push(current);
        }

        let mut alerts = Vec::new();
        let mut first_error = None;
        for segment in segments {
            if segment.iter().all(|l| l.trim().is_empty()) {
                continue;
            }
            match parse_segment(&wmo, awips_id.as_deref(), &segment, received_at, table) {
                Ok(alert) => alerts.push(alert),
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }

        if alerts.is_empty() {
            return Err(first_error.unwrap_or(ParseError::EmptyBody));
        }

        Ok(Product {
            wmo,
            awips_id,
            alerts,
        })
    }
}

/// `(phenomenon, significance)` for VTEC-less products, from the AWIPS
/// product class.
fn fallback_codes(awips_id: Option<&str>) -> (Phenomenon, Significance) {
    let class = awips_id.map(|pil| &pil[..3.min(pil.len())]);
    match class {
        Some("SPS") => (Phenomenon::SpecialWeatherStatement, Significance::Statement),
        Some("TOR") => (Phenomenon::Tornado, Significance::Warning),
        Some("SVR") => (Phenomenon::SevereThunderstorm, Significance::Warning),
        Some("SVS") => (Phenomenon::SevereThunderstorm, Significance::Statement),
        Some("FFW") => (Phenomenon::FlashFlood, Significance::Warning),
        Some("FFS") => (Phenomenon::FlashFlood, Significance::Statement),
        Some("FLW") => (Phenomenon::Flood, Significance::Warning),
        Some("WSW") => (Phenomenon::WinterStorm, Significance::Warning),
        Some("WCN") => (Phenomenon::SevereThunderstorm, Significance::Watch),
        Some(other) => (
            Phenomenon::Other(other.into()),
            Significance::Statement,
        ),
        None => (Phenomenon::SpecialWeatherStatement, Significance::Statement),
    }
}

/// Starred and free-form text split out of a segment.
#[derive(Debug, Default)]
struct Sections {
    headline: Option<String>,
    starred: Vec<(String, String)>,
    precautionary: Option<String>,
    free_text: String,
}

impl Sections {
    fn starred_body(&self, heading: &str) -> Option<&str> {
        self.starred
            .iter()
            .find(|(h, _)| h == heading)
            .map(|(_, b)| b.as_str())
    }
}

/// True for `HAZARD...`, `HAIL...1.00 IN`, `TIME...MOT...LOC` style tag
/// lines: an all-caps label followed by `...`.
fn is_tag_line(line: &str) -> bool {
    match line.find("...") {
        Some(pos) if pos > 0 => line[..pos]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == ' ' || c == '/'),
        _ => false,
    }
}

/// Re-join hard-wrapped lines into one logical line per paragraph, so that
/// phrases broken across a wrap ("12 to\n18 inches") still match the threat
/// patterns. Blank lines, `*` headings, and tag lines each start a new
/// paragraph; tag lines stand alone so adjacent tags never bleed together.
fn unwrap_paragraphs(lines: &[&str]) -> String {
    let mut paragraphs: Vec<String> = vec![String::new()];
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !paragraphs.last().expect("non-empty").is_empty() {
                paragraphs.push(String::new());
            }
            continue;
        }
        let breaks = trimmed.starts_with('*') || is_tag_line(trimmed);
        if breaks && !paragraphs.last().expect("non-empty").is_empty() {
            paragraphs.push(String::new());
        }
        let last = paragraphs.last_mut().expect("non-empty");
        if !last.is_empty() {
            last.push(' ');
        }
        last.push_str(trimmed);
    }
    paragraphs.retain(|p| !p.is_empty());
    paragraphs.join("\n")
}

fn split_sections(lines: &[&str]) -> Sections {
    let mut sections = Sections::default();
    let mut headline_lines: Vec<&str> = Vec::new();
    let mut in_headline = false;
    let mut free_lines: Vec<&str> = Vec::new();
    let mut current_star: Option<(String, Vec<String>)> = None;
    let mut in_precautionary = false;
    let mut precautionary_lines: Vec<&str> = Vec::new();

    let mut finish_star =
        |current: &mut Option<(String, Vec<String>)>, sections: &mut Sections| {
            if let Some((heading, body)) = current.take() {
                sections.starred.push((heading, body.join(" ")));
            }
        };

    for raw_line in lines {
        let line = raw_line.trim();

        if in_precautionary {
            if line == "&&" {
                in_precautionary = false;
            } else if !line.is_empty() {
                precautionary_lines.push(line);
            }
            continue;
        }

        if line.starts_with("PRECAUTIONARY/PREPAREDNESS ACTIONS") {
            finish_star(&mut current_star, &mut sections);
            in_precautionary = true;
            continue;
        }

        if line == "&&" {
            finish_star(&mut current_star, &mut sections);
            continue;
        }

        if let Some(rest) = line.strip_prefix('*') {
            finish_star(&mut current_star, &mut sections);
            let rest = rest.trim();
            if let Some((heading, body)) = rest.split_once("...") {
                current_star = Some((
                    heading.trim().to_string(),
                    if body.trim().is_empty() {
                        Vec::new()
                    } else {
                        vec![body.trim().to_string()]
                    },
                ));
            } else {
                current_star = Some((rest.to_string(), Vec::new()));
            }
            continue;
        }

        if line.is_empty() {
            finish_star(&mut current_star, &mut sections);
            in_headline = false;
            continue;
        }

        if let Some((_, body)) = current_star.as_mut() {
            body.push(line.to_string());
            continue;
        }

        // A "...HEADLINE..." group, possibly wrapped, before any starred
        // section. The first such group wins.
        if sections.starred.is_empty() && headline_lines.is_empty() && line.starts_with("...") {
            headline_lines.push(line);
            in_headline = !line.ends_with("...") || line == "...";
            continue;
        }
        if in_headline {
            headline_lines.push(line);
            if line.ends_with("...") {
                in_headline = false;
            }
            continue;
        }

        free_lines.push(line);
    }
    finish_star(&mut current_star, &mut sections);

    if !headline_lines.is_empty() {
        let joined = headline_lines.join(" ");
        sections.headline = Some(joined.trim_matches('.').trim().to_string());
    }
    if !precautionary_lines.is_empty() {
        sections.precautionary = Some(precautionary_lines.join(" "));
    }
    sections.free_text = free_lines.join("\n");
    sections
}

fn parse_segment(
    wmo: &WmoHeader,
    awips_id: Option<&str>,
    segment: &[&str],
    received_at: DateTime<Utc>,
    table: Option<&ReferenceTable>,
) -> Result<Alert, ParseError> {
    // The first non-blank block must be UGC.
    let mut index = 0;
    while index < segment.len() && segment[index].trim().is_empty() {
        index += 1;
    }
    let first = segment.get(index).map(|l| l.trim()).unwrap_or("");
    let looks_like_ugc = first.len() >= 6
        && first.as_bytes()[0].is_ascii_uppercase()
        && first.as_bytes()[1].is_ascii_uppercase()
        && matches!(first.as_bytes()[2], b'C' | b'Z');
    if !looks_like_ugc {
        return Err(ParseError::MissingUgc(InvalidUgcError::Empty));
    }

    // The UGC block is the run of `-`-terminated lines starting here.
    let mut ugc_lines: Vec<&str> = Vec::new();
    while index < segment.len() {
        let line = segment[index].trim();
        if line.is_empty() || !line.ends_with('-') {
            break;
        }
        ugc_lines.push(line);
        index += 1;
        // The expiration tail closes the block.
        if line
            .rsplit('-')
            .find(|t| !t.is_empty())
            .is_some_and(|t| t.len() == 6 && t.bytes().all(|b| b.is_ascii_digit()))
        {
            break;
        }
    }
    let ugc: UgcBlock = ugc_lines.join("\n").parse()?;

    let rest = &segment[index..];

    // VTEC: the first line shaped like one must decode.
    let mut vtec: Option<Vtec> = None;
    let mut non_vtec_lines: Vec<&str> = Vec::new();
    for line in rest {
        let trimmed = line.trim();
        let candidate = trimmed.len() > 8
            && trimmed.starts_with('/')
            && matches!(trimmed.as_bytes()[1], b'O' | b'T' | b'E' | b'X')
            && trimmed.as_bytes()[2] == b'.';
        if candidate {
            // Only the first VTEC line binds; repeats in later follow-up
            // text are dropped.
            if vtec.is_none() {
                vtec = Some(trimmed.parse::<Vtec>()?);
            }
        } else {
            non_vtec_lines.push(line);
        }
    }

    let issued_time = wmo.issued_near(received_at);

    // Polygon: a LAT...LON line plus purely numeric continuation lines.
    let mut polygon: Option<Polygon> = None;
    let mut prose_lines: Vec<&str> = Vec::new();
    let mut in_polygon = false;
    let mut polygon_lines: Vec<&str> = Vec::new();
    for line in &non_vtec_lines {
        let trimmed = line.trim();
        if trimmed.starts_with("LAT...LON") {
            in_polygon = true;
            polygon_lines.push(trimmed);
            continue;
        }
        if in_polygon {
            let numeric = !trimmed.is_empty()
                && trimmed
                    .split_whitespace()
                    .all(|t| t.bytes().all(|b| b.is_ascii_digit()));
            if numeric {
                polygon_lines.push(trimmed);
                continue;
            }
            in_polygon = false;
        }
        prose_lines.push(line);
    }
    if !polygon_lines.is_empty() {
        // A malformed polygon forfeits the polygon, not the alert.
        polygon = Polygon::from_lat_lon_block(&polygon_lines.join("\n")).ok();
    }

    // TIME...MOT...LOC and the closing forecaster signature are prose to the
    // scanner and harmless.
    let sections = split_sections(&prose_lines);

    let (phenomenon, significance) = match &vtec {
        Some(v) => (v.phenomenon.clone(), v.significance),
        None => fallback_codes(awips_id),
    };

    let mut description_parts: Vec<String> = Vec::new();
    for heading in ["WHAT", "WHERE", "WHEN", "ADDITIONAL DETAILS"] {
        if let Some(body) = sections.starred_body(heading) {
            description_parts.push(format!("{heading}...{body}"));
        }
    }
    if description_parts.is_empty() && !sections.free_text.is_empty() {
        description_parts.push(sections.free_text.clone());
    }
    let description = if description_parts.is_empty() {
        None
    } else {
        Some(description_parts.join("\n\n"))
    };

    let mut instruction_parts: Vec<String> = Vec::new();
    if let Some(body) = sections.starred_body("IMPACTS") {
        instruction_parts.push(format!("IMPACTS...{body}"));
    }
    if let Some(precautionary) = &sections.precautionary {
        instruction_parts.push(precautionary.clone());
    }
    let instruction = if instruction_parts.is_empty() {
        None
    } else {
        Some(instruction_parts.join("\n\n"))
    };

    // Threat extraction sees everything the sections saw, one logical line
    // per paragraph, so tagged lines outside starred blocks
    // ("HAIL...1.00 IN") and phrases broken by hard wraps both count.
    let threat_source = unwrap_paragraphs(&prose_lines);
    let threat = Threat::extract(&threat_source);

    let expiration_time = vtec
        .as_ref()
        .and_then(|v| v.end)
        .unwrap_or_else(|| ugc.expiration_after(issued_time));
    let effective_time = vtec.as_ref().and_then(|v| v.begin);

    let mut issuing_offices = BTreeSet::new();
    issuing_offices.insert(wmo.office.clone());
    if let Some(v) = &vtec {
        issuing_offices.insert(v.office.clone());
    }

    let product_id = match &vtec {
        Some(v) => ProductId::from_vtec(v, issued_time),
        None => ProductId::from_header(
            &wmo.office,
            awips_id.unwrap_or(&wmo.ttaaii),
            issued_time,
        ),
    };

    let display_locations = match table {
        Some(table) => table.display_locations(&ugc.zones),
        None => ugc
            .zones
            .iter()
            .map(|z| z.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    };

    let event_name = event::event_name(&phenomenon, significance);
    let priority = event::priority(&phenomenon, significance);

    Ok(Alert {
        product_id,
        source: AlertSource::Push,
        vtec,
        phenomenon,
        significance,
        event_name,
        priority,
        headline: sections.headline,
        description,
        instruction,
        issued_time,
        effective_time,
        expiration_time,
        affected_areas: ugc.zones,
        display_locations,
        polygon,
        issuing_offices,
        threat,
        status: AlertStatus::Active,
        parsed_at: received_at,
        last_updated: received_at,
        update_count: 0,
    })
}

/// One retained parse failure.
#[derive(Debug, Clone, Serialize)]
pub struct ParseFailure {
    /// When the offending product was received
    pub received_at: DateTime<Utc>,
    /// The rendered parse error
    pub error: String,
    /// The raw product body
    pub raw: String,
}

/// A bounded ring buffer of recent parse failures, for diagnostic queries.
///
/// Offending raw bodies are retained so an operator can ask "what did we
/// fail to parse lately" without grepping logs.
#[derive(Debug)]
pub struct ParseFailureLog {
    capacity: usize,
    inner: Mutex<VecDeque<ParseFailure>>,
}

impl ParseFailureLog {
    /// A log retaining at most `capacity` failures; the oldest fall out.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a failure, evicting the oldest at capacity.
    pub fn record(&self, raw: &str, error: &ParseError, received_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("parse failure log poisoned");
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(ParseFailure {
            received_at,
            error: error.to_string(),
            raw: raw.to_string(),
        });
    }

    /// The retained failures, oldest first.
    pub fn recent(&self) -> Vec<ParseFailure> {
        self.inner
            .lock()
            .expect("parse failure log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// How many failures are currently retained.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("parse failure log poisoned").len()
    }

    /// True when no failures are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParseFailureLog {
    fn default() -> Self {
        Self::new(64)
    }
}
