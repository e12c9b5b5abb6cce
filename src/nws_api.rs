//! The pull source: a periodic fetcher of the api.weather.gov active-alert
//! list.
//!
//! The REST feed is the authoritative backstop for the push source: it
//! reports the complete set of currently active alerts, already structured
//! as GeoJSON features. Each feature is normalized through the same typed
//! decoders the raw-product parser uses (VTEC line, UGC codes, threat
//! extraction over the description), so both sources meet the store with
//! identical semantics.

use crate::alert::{Alert, AlertSource, AlertStatus, ProductId};
use crate::event::{self, Phenomenon, Significance};
use crate::geo::{Point, Polygon};
use crate::nwws::SourceHealth;
use crate::reference::ReferenceTable;
use crate::store::AlertStore;
use crate::threat::Threat;
use crate::ugc::UgcZone;
use crate::vtec::Vtec;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_INITIAL: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;

/// The error returned when the active-alert feed cannot be fetched.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The configured base URL is unusable
    #[error("invalid API base url {0:?}")]
    BadBaseUrl(String),
    /// The HTTP client could not be built
    #[error("http client: {0}")]
    Client(reqwest::Error),
    /// All retries exhausted on transient failures
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted {
        /// How many attempts were made
        attempts: u32,
        /// The final failure
        last: String,
    },
    /// A non-retryable HTTP status
    #[error("request rejected: HTTP {0}")]
    Rejected(u16),
    /// The response body is not the expected document
    #[error("malformed response: {0}")]
    Malformed(#[from] reqwest::Error),
}

/// A client for the active-alerts endpoint.
#[derive(Debug, Clone)]
pub struct NwsApiClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl NwsApiClient {
    /// Build a client for `base_url`, sending `user_agent` with every
    /// request (the upstream service requires an identifying agent).
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, ApiError> {
        let base: Url = base_url
            .parse()
            .map_err(|_| ApiError::BadBaseUrl(base_url.into()))?;
        let endpoint = base
            .join("alerts/active")
            .map_err(|_| ApiError::BadBaseUrl(base_url.into()))?;

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self { client, endpoint })
    }

    /// Fetch the full current list, retrying transient failures.
    ///
    /// Up to three attempts with exponential backoff (1 s doubling) on
    /// connection errors, HTTP 5xx, and 429. Any other 4xx is fatal for
    /// the poll.
    pub async fn active_alerts(&self) -> Result<ActiveAlerts, ApiError> {
        let mut delay = RETRY_INITIAL;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once().await {
                Ok(response) => return Ok(response),
                Err(FetchError::Transient(e)) => {
                    debug!(attempt, error = %e, "transient fetch failure");
                    last_error = e;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(FetchError::Fatal(e)) => return Err(e),
            }
        }

        Err(ApiError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last: last_error,
        })
    }

    async fn fetch_once(&self) -> Result<ActiveAlerts, FetchError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/geo+json")
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(FetchError::Fatal(ApiError::Rejected(status.as_u16())));
        }

        response
            .json::<ActiveAlerts>()
            .await
            .map_err(|e| FetchError::Fatal(ApiError::Malformed(e)))
    }
}

enum FetchError {
    Transient(String),
    Fatal(ApiError),
}

/// The active-alerts document: a GeoJSON feature collection.
#[derive(Debug, Deserialize)]
pub struct ActiveAlerts {
    /// One feature per active alert
    #[serde(default)]
    pub features: Vec<AlertFeature>,
}

/// One alert feature.
#[derive(Debug, Deserialize)]
pub struct AlertFeature {
    /// Alert properties
    pub properties: AlertProperties,
    /// Impact polygon, when the product carried one
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// The properties object of an alert feature.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertProperties {
    /// Upstream alert identifier
    pub id: String,
    /// Human event name as reported upstream
    #[serde(default)]
    pub event: Option<String>,
    /// Headline text
    #[serde(default)]
    pub headline: Option<String>,
    /// Description text
    #[serde(default)]
    pub description: Option<String>,
    /// Call-to-action text
    #[serde(default)]
    pub instruction: Option<String>,
    /// When the product was sent
    #[serde(default)]
    pub sent: Option<DateTime<FixedOffset>>,
    /// When the hazard begins
    #[serde(default)]
    pub effective: Option<DateTime<FixedOffset>>,
    /// When the product expires
    #[serde(default)]
    pub expires: Option<DateTime<FixedOffset>>,
    /// When the hazard ends, when distinct from `expires`
    #[serde(default)]
    pub ends: Option<DateTime<FixedOffset>>,
    /// Geographic codes
    #[serde(default)]
    pub geocode: Geocode,
    /// Free-form parameters; `VTEC` carries the P-VTEC line
    #[serde(default)]
    pub parameters: HashMap<String, Vec<serde_json::Value>>,
}

/// The geocode block of an alert feature.
#[derive(Debug, Default, Deserialize)]
pub struct Geocode {
    /// UGC county/zone codes
    #[serde(rename = "UGC", default)]
    pub ugc: Vec<String>,
}

/// A GeoJSON geometry limited to what the alert feed emits.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// A polygon: rings of `[longitude, latitude]` positions
    Polygon {
        /// Outer ring first
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    /// Anything else the feed may emit; ignored
    #[serde(other)]
    Other,
}

impl AlertFeature {
    /// Normalize this feature into an [`Alert`], or `None` when it lacks
    /// the essentials (geography, expiration).
    pub fn normalize(self, now: DateTime<Utc>, table: &ReferenceTable) -> Option<Alert> {
        let properties = self.properties;

        let vtec: Option<Vtec> = properties
            .parameters
            .get("VTEC")
            .and_then(|values| values.first())
            .and_then(|value| value.as_str())
            .and_then(|s| s.trim().parse().ok());

        let affected_areas: Vec<UgcZone> = properties
            .geocode
            .ugc
            .iter()
            .filter_map(|code| code.parse().ok())
            .collect();
        if affected_areas.is_empty() {
            debug!(id = %properties.id, "feature without usable geography");
            return None;
        }

        let issued_time = properties
            .sent
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        let expiration_time = properties
            .ends
            .or(properties.expires)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| vtec.as_ref().and_then(|v| v.end))?;
        let effective_time = properties
            .effective
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| vtec.as_ref().and_then(|v| v.begin));

        let (phenomenon, significance) = match &vtec {
            Some(v) => (v.phenomenon.clone(), v.significance),
            None => codes_from_event_name(properties.event.as_deref().unwrap_or_default()),
        };

        let product_id = match &vtec {
            Some(v) => ProductId::from_vtec(v, issued_time),
            None => {
                // No VTEC: derive a stable id from the upstream identifier.
                let tail = properties
                    .id
                    .rsplit('.')
                    .next()
                    .filter(|t| !t.is_empty())
                    .unwrap_or(&properties.id);
                ProductId::new(format!(
                    "{}-{}",
                    phenomenon.as_code(),
                    tail.replace(char::is_whitespace, "")
                ))
                .ok()?
            }
        };

        let threat = Threat::extract(properties.description.as_deref().unwrap_or_default());

        let polygon = self.geometry.and_then(|geometry| match geometry {
            Geometry::Polygon { coordinates } => {
                let ring = coordinates.into_iter().next()?;
                let points: Vec<Point> = ring
                    .into_iter()
                    .filter_map(|[longitude, latitude]| Point::new(latitude, longitude).ok())
                    .collect();
                Polygon::try_from(points).ok()
            }
            Geometry::Other => None,
        });

        let mut issuing_offices = BTreeSet::new();
        if let Some(v) = &vtec {
            issuing_offices.insert(v.office.clone());
        }

        let event_name = properties
            .event
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| event::event_name(&phenomenon, significance));
        let priority = event::priority(&phenomenon, significance);
        let display_locations = table.display_locations(&affected_areas);

        Some(Alert {
            product_id,
            source: AlertSource::Pull,
            vtec,
            phenomenon,
            significance,
            event_name,
            priority,
            headline: properties.headline,
            description: properties.description,
            instruction: properties.instruction,
            issued_time,
            effective_time,
            expiration_time,
            affected_areas,
            display_locations,
            polygon,
            issuing_offices,
            threat,
            status: AlertStatus::Active,
            parsed_at: now,
            last_updated: now,
            update_count: 0,
        })
    }
}

/// Recover `(phenomenon, significance)` from an upstream event name for
/// features with no VTEC parameter.
fn codes_from_event_name(event: &str) -> (Phenomenon, Significance) {
    let significance = if event.ends_with("Warning") {
        Significance::Warning
    } else if event.ends_with("Watch") {
        Significance::Watch
    } else if event.ends_with("Advisory") {
        Significance::Advisory
    } else {
        Significance::Statement
    };

    let phenomenon = if event.starts_with("Tornado") {
        Phenomenon::Tornado
    } else if event.starts_with("Severe Thunderstorm") {
        Phenomenon::SevereThunderstorm
    } else if event.starts_with("Flash Flood") {
        Phenomenon::FlashFlood
    } else if event.starts_with("Flood") {
        Phenomenon::Flood
    } else if event.starts_with("Winter Storm") {
        Phenomenon::WinterStorm
    } else if event.starts_with("Winter Weather") {
        Phenomenon::WinterWeather
    } else if event.starts_with("Lake Effect Snow") {
        Phenomenon::LakeEffectSnow
    } else if event.starts_with("Blizzard") {
        Phenomenon::Blizzard
    } else if event.starts_with("Ice Storm") {
        Phenomenon::IceStorm
    } else if event.starts_with("High Wind") {
        Phenomenon::HighWind
    } else if event.starts_with("Special Weather Statement") {
        Phenomenon::SpecialWeatherStatement
    } else {
        // Preserve the upstream name through the code escape hatch.
        let abbrev: String = event
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Phenomenon::Other(if abbrev.is_empty() { "XX".into() } else { abbrev })
    };

    (phenomenon, significance)
}

/// The polling loop driving [`AlertStore::reconcile`].
pub struct PullSource {
    client: NwsApiClient,
    poll_interval: Duration,
    health: Arc<SourceHealth>,
}

impl PullSource {
    /// Build a poller and the health handle that outlives it.
    pub fn new(client: NwsApiClient, poll_interval: Duration) -> (Self, Arc<SourceHealth>) {
        let health = Arc::new(SourceHealth::default());
        (
            Self {
                client,
                poll_interval,
                health: health.clone(),
            },
            health,
        )
    }

    /// Poll until shutdown. Each successful cycle normalizes the full list
    /// and reconciles the store against it; the pull result prevails over
    /// the push view within one cycle.
    pub async fn run(
        self,
        store: Arc<AlertStore>,
        table: Arc<ReferenceTable>,
        filter_states: Vec<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            let now = Utc::now();
            match self.client.active_alerts().await {
                Ok(response) => {
                    self.health.set_connected(true);
                    self.health.count_received();

                    let alerts: Vec<Alert> = response
                        .features
                        .into_iter()
                        .filter_map(|feature| feature.normalize(now, &table))
                        .filter(|alert| alert.touches_states(&filter_states))
                        .collect();
                    let total = alerts.len();
                    let summary = store.reconcile(alerts, now);
                    info!(
                        total,
                        added = summary.added,
                        updated = summary.updated,
                        removed = summary.removed,
                        "pull cycle reconciled"
                    );
                }
                Err(e) => {
                    self.health.set_connected(false);
                    warn!(error = %e, "pull cycle failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
