//! Pull-source behavior against a mock active-alerts endpoint.

use stormwire::nws_api::{ApiError, NwsApiClient};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACTIVE_ALERTS: &str = r#"{
    "features": [
        {
            "properties": {
                "id": "urn:oid:2.49.0.1.840.0.abc.001.1",
                "event": "Severe Thunderstorm Warning",
                "headline": "Severe Thunderstorm Warning issued for Lake County OH",
                "description": "At 615 PM EST, a severe thunderstorm was located near Mentor. Wind gusts up to 70 mph and quarter size hail.",
                "instruction": "Move to an interior room on the lowest floor.",
                "sent": "2025-12-20T18:15:00+00:00",
                "effective": "2025-12-20T18:15:00+00:00",
                "expires": "2025-12-20T19:00:00+00:00",
                "geocode": {"UGC": ["OHC085"]},
                "parameters": {"VTEC": ["/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/"]}
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-81.85, 41.19], [-81.76, 41.21], [-81.70, 41.12], [-81.85, 41.19]]]
            }
        },
        {
            "properties": {
                "id": "urn:oid:2.49.0.1.840.0.abc.002.1",
                "event": "Winter Weather Advisory",
                "description": "Snow accumulations up to 3 inches.",
                "sent": "2025-12-20T12:00:00+00:00",
                "expires": "2025-12-21T00:00:00+00:00",
                "geocode": {"UGC": ["NYZ010"]},
                "parameters": {"VTEC": ["/O.CON.KBUF.WW.Y.0042.251220T1200Z-251221T0000Z/"]}
            },
            "geometry": null
        }
    ]
}"#;

#[tokio::test]
async fn fetches_and_decodes_active_alerts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ACTIVE_ALERTS, "application/geo+json"))
        .mount(&server)
        .await;

    let client = NwsApiClient::new(&server.uri(), "stormwire-test/0.1").unwrap();
    let response = client.active_alerts().await.unwrap();
    assert_eq!(response.features.len(), 2);

    let table = stormwire::reference::ReferenceTable::load("data/ugc_zones.json").unwrap();
    let now = chrono::Utc::now();
    let alerts: Vec<_> = response
        .features
        .into_iter()
        .filter_map(|feature| feature.normalize(now, &table))
        .collect();
    assert_eq!(alerts.len(), 2);

    assert_eq!(alerts[0].product_id, "KCLE-SV-W-0042-202512201815");
    assert_eq!(alerts[0].threat.max_wind_gust_mph, Some(70));
    assert!(alerts[0].polygon.is_some());
    assert_eq!(alerts[0].display_locations, "Lake County, OH");

    assert_eq!(alerts[1].event_name, "Winter Weather Advisory");
    assert_eq!(alerts[1].threat.snow_max_inches, Some(3.0));
    assert!(alerts[1].polygon.is_none());
}

#[tokio::test]
async fn retries_transient_errors_then_succeeds() {
    let server = MockServer::start().await;
    // Two failures, then success, inside the three-attempt budget.
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"features": []}"#, "application/geo+json"),
        )
        .mount(&server)
        .await;

    let client = NwsApiClient::new(&server.uri(), "stormwire-test/0.1").unwrap();
    let response = client.active_alerts().await.unwrap();
    assert!(response.features.is_empty());
}

#[tokio::test]
async fn gives_up_after_three_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = NwsApiClient::new(&server.uri(), "stormwire-test/0.1").unwrap();
    match client.active_alerts().await {
        Err(ApiError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_are_fatal_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let client = NwsApiClient::new(&server.uri(), "stormwire-test/0.1").unwrap();
    match client.active_alerts().await {
        Err(ApiError::Rejected(status)) => assert_eq!(status, 403),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limiting_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/alerts/active"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"features": []}"#, "application/geo+json"),
        )
        .mount(&server)
        .await;

    let client = NwsApiClient::new(&server.uri(), "stormwire-test/0.1").unwrap();
    assert!(client.active_alerts().await.is_ok());
}
