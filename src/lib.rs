//! Ingestion, normalization, and real-time distribution of National Weather
//! Service severe weather products.
//!
//! Stormwire consumes raw meteorological text products from two asymmetric
//! sources — the push-based NWWS-OI XMPP feed and the pull-based
//! api.weather.gov active-alerts endpoint — reconstructs a deduplicated view
//! of the set of alerts active right now, and streams incremental changes to
//! WebSocket subscribers.
//!
//! # Example
//!
//! ```rust
//! use stormwire::product::Product;
//!
//! let raw = "\
//! WUUS53 KCLE 201815
//! SVRCLE
//! OHC085-201900-
//! /O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/
//!
//! Severe Thunderstorm Warning for Lake County...
//!
//! * WHAT...Severe thunderstorms with wind gusts up to 70 mph and
//!   quarter size hail.
//!
//! $$
//! ";
//!
//! let received_at = chrono::Utc::now();
//! let product = Product::parse(raw, received_at).expect("parse product");
//! let alert = &product.alerts[0];
//!
//! assert_eq!(alert.event_name, "Severe Thunderstorm Warning");
//! assert_eq!(alert.threat.max_wind_gust_mph, Some(70));
//! assert_eq!(alert.threat.max_hail_size_inches, Some(1.0));
//! ```
//!
//! # Architecture
//!
//! Data flows in one direction:
//!
//! ```text
//! nwws (push) ──┐
//!               ├─> product parser ─> alert store ─> hub ─> subscribers
//! nws_api (pull)┘
//! ```
//!
//! The [`store::AlertStore`] is the sole mutator of the active set. Both
//! sources hand it parsed [`Alert`]s; it imposes a total order on changes and
//! fans them out to subscribers registered through
//! [`subscribe`](store::AlertStore::subscribe).

#![forbid(unsafe_code)]

pub mod alert;
pub mod config;
pub mod event;
pub mod geo;
pub mod hub;
pub mod http;
pub mod nws_api;
pub mod nwws;
pub mod product;
pub mod reference;
pub mod store;
pub mod threat;
pub mod ugc;
pub mod vtec;

pub use alert::{Alert, AlertSource, AlertStatus, ProductId};
pub use event::{Phenomenon, Significance};
pub use store::AlertStore;
pub use threat::Threat;
pub use ugc::UgcZone;
pub use vtec::{Vtec, VtecAction};
