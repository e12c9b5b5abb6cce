use super::*;
use crate::reference::ReferenceTable;
use crate::threat::TornadoDetection;
use chrono::TimeZone;

fn received() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap()
}

const SEVERE_THUNDERSTORM: &str = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/

Severe Thunderstorm Warning for...
Lake County in northeast Ohio...

* Until 700 PM EST.

* At 615 PM EST, a severe thunderstorm was located near Mentor,
  moving east at 40 mph.

  HAZARD...70 mph wind gusts and quarter size hail.

  SOURCE...Radar indicated.

HAIL...1.00 IN
WIND...70 MPH

LAT...LON 4119 8185 4121 8176 4112 8170 4111 8184
TIME...MOT...LOC 2315Z 270DEG 35KT 4117 8182

$$
";

#[test]
fn parses_severe_thunderstorm_warning() {
    let product = Product::parse(SEVERE_THUNDERSTORM, received()).unwrap();

    assert_eq!(product.wmo.ttaaii, "WUUS53");
    assert_eq!(product.wmo.office, "KCLE");
    assert_eq!(product.awips_id.as_deref(), Some("SVRCLE"));
    assert_eq!(product.alerts.len(), 1);

    let alert = &product.alerts[0];
    assert_eq!(alert.product_id, "KCLE-SV-W-0042-202512201815");
    assert_eq!(alert.event_name, "Severe Thunderstorm Warning");
    assert_eq!(alert.phenomenon, Phenomenon::SevereThunderstorm);
    assert_eq!(alert.significance, Significance::Warning);
    assert_eq!(
        alert.issued_time,
        Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap()
    );
    assert_eq!(
        alert.expiration_time,
        Utc.with_ymd_and_hms(2025, 12, 20, 19, 0, 0).unwrap()
    );
    assert_eq!(alert.affected_areas.len(), 1);
    assert_eq!(alert.affected_areas[0], "OHC085");
    assert!(alert.issuing_offices.contains("KCLE"));

    assert_eq!(alert.threat.max_wind_gust_mph, Some(70));
    assert_eq!(alert.threat.max_hail_size_inches, Some(1.0));
    assert!(alert.threat.storm_motion.is_some());

    let polygon = alert.polygon.as_ref().unwrap();
    assert_eq!(polygon.len(), 5);
}

#[test]
fn renders_locations_through_reference_table() {
    let table = ReferenceTable::from_json(
        r#"[{"code": "OHC085", "name": "Lake County, OH", "state": "OH", "kind": "C"}]"#,
    )
    .unwrap();
    let product = Product::parse_with(SEVERE_THUNDERSTORM, received(), Some(&table)).unwrap();
    assert_eq!(product.alerts[0].display_locations, "Lake County, OH");
}

const TORNADO_WARNING: &str = "\
WFUS53 KCLE 201820
TORCLE
OHC085-093-201900-
/O.NEW.KCLE.TO.W.0019.251220T1820Z-251220T1900Z/

The National Weather Service in Cleveland has issued a

* Tornado Warning for...
  Lake County in northeast Ohio...
  Lorain County in northeast Ohio...

* Until 700 PM EST.

* At 620 PM EST, a confirmed tornado was located near Mentor, moving
  northeast at 25 mph.

TORNADO...OBSERVED
TORNADO DAMAGE THREAT...CONSIDERABLE
HAIL...1.75 IN

LAT...LON 4119 8185 4121 8176 4112 8170 4111 8184

$$
";

#[test]
fn parses_tornado_warning_threat_tags() {
    let product = Product::parse(TORNADO_WARNING, received()).unwrap();
    let alert = &product.alerts[0];

    assert_eq!(alert.event_name, "Tornado Warning");
    // CONFIRMED in prose outranks the OBSERVED tag line
    assert_eq!(
        alert.threat.tornado_detection,
        Some(TornadoDetection::Confirmed)
    );
    assert_eq!(
        alert.threat.tornado_damage,
        Some(crate::threat::DamageThreat::Considerable)
    );
    assert_eq!(alert.threat.max_hail_size_inches, Some(1.75));
    assert_eq!(alert.affected_areas.len(), 2);
}

const SPECIAL_WEATHER_STATEMENT: &str = "\
WWUS81 KCLE 201830
SPSCLE
OHZ011-012-202030-

Special Weather Statement

...STRONG THUNDERSTORMS WILL IMPACT LAKE AND GEAUGA COUNTIES THROUGH
730 PM EST...

At 628 PM EST, strong thunderstorms were located along a line
extending from Willowick to Chardon. Wind gusts to 55 mph and up to
1 inch of quick snow are possible.

$$
";

#[test]
fn special_weather_statement_without_vtec() {
    let product = Product::parse(SPECIAL_WEATHER_STATEMENT, received()).unwrap();
    let alert = &product.alerts[0];

    assert!(alert.vtec.is_none());
    assert_eq!(alert.phenomenon, Phenomenon::SpecialWeatherStatement);
    assert_eq!(alert.event_name, "Special Weather Statement");
    assert_eq!(alert.product_id, "KCLE-SPSCLE-202512201830");

    let headline = alert.headline.as_deref().unwrap();
    assert!(headline.starts_with("STRONG THUNDERSTORMS"));

    // Cross-term disambiguation: snow, not hail
    assert_eq!(alert.threat.snow_max_inches, Some(1.0));
    assert_eq!(alert.threat.max_hail_size_inches, None);
    assert_eq!(alert.threat.max_wind_gust_mph, Some(55));

    // Expiration comes from the UGC tail when there is no VTEC
    assert_eq!(
        alert.expiration_time,
        Utc.with_ymd_and_hms(2025, 12, 20, 20, 30, 0).unwrap()
    );
}

const WINTER_STORM_MULTI_SEGMENT: &str = "\
WWUS43 KBUF 180900
WSWBUF
NYZ001-003>005-181800-
/O.NEW.KBUF.LE.W.0011.251218T0900Z-251219T1200Z/

...LAKE EFFECT SNOW WARNING IN EFFECT UNTIL 7 AM EST FRIDAY...

* WHAT...Heavy lake effect snow. Total snow accumulations of 12 to
  18 inches in the most persistent bands.

* WHERE...Niagara, Orleans, Monroe and Wayne counties.

* WHEN...Until 7 AM EST Friday.

* IMPACTS...Travel could be very difficult to impossible.

PRECAUTIONARY/PREPAREDNESS ACTIONS...

If you must travel, keep an extra flashlight, food, and water in
your vehicle in case of an emergency.

&&

$$

NYZ010-181800-
/O.NEW.KBUF.WW.Y.0042.251218T0900Z-251219T0000Z/

...WINTER WEATHER ADVISORY IN EFFECT UNTIL 7 PM EST THURSDAY...

* WHAT...Lake effect snow. Additional snow accumulations up to 3
  inches.

* WHERE...Genesee county.

* WHEN...Until 7 PM EST Thursday.

$$
";

#[test]
fn multi_segment_yields_one_alert_per_segment() {
    let received = Utc.with_ymd_and_hms(2025, 12, 18, 9, 1, 0).unwrap();
    let product = Product::parse(WINTER_STORM_MULTI_SEGMENT, received).unwrap();
    assert_eq!(product.alerts.len(), 2);

    let warning = &product.alerts[0];
    assert_eq!(warning.event_name, "Lake Effect Snow Warning");
    assert_eq!(warning.affected_areas.len(), 4);
    assert_eq!(warning.threat.snow_min_inches, Some(12.0));
    assert_eq!(warning.threat.snow_max_inches, Some(18.0));
    assert!(warning
        .description
        .as_deref()
        .unwrap()
        .starts_with("WHAT...Heavy lake effect snow."));
    assert!(warning
        .instruction
        .as_deref()
        .unwrap()
        .contains("IMPACTS...Travel could be very difficult"));
    assert!(warning
        .instruction
        .as_deref()
        .unwrap()
        .contains("extra flashlight"));

    let advisory = &product.alerts[1];
    assert_eq!(advisory.event_name, "Winter Weather Advisory");
    assert_eq!(advisory.affected_areas[0], "NYZ010");
    assert_eq!(advisory.threat.snow_max_inches, Some(3.0));
}

#[test]
fn correction_tag_in_header_is_accepted() {
    let raw = SEVERE_THUNDERSTORM.replacen("WUUS53 KCLE 201815", "WUUS53 KCLE 201815 CCA", 1);
    let product = Product::parse(&raw, received()).unwrap();
    assert_eq!(product.alerts.len(), 1);
}

#[test]
fn ldm_preamble_is_skipped() {
    let raw = format!("\n743\n\n{SEVERE_THUNDERSTORM}");
    let product = Product::parse(&raw, received()).unwrap();
    assert_eq!(product.alerts.len(), 1);
}

#[test]
fn empty_body() {
    assert!(matches!(
        Product::parse("", received()),
        Err(ParseError::EmptyBody)
    ));
    assert!(matches!(
        Product::parse("\n\n  \n", received()),
        Err(ParseError::EmptyBody)
    ));
    assert!(matches!(
        Product::parse("WUUS53 KCLE 201815\nSVRCLE\n\n", received()),
        Err(ParseError::EmptyBody)
    ));
}

#[test]
fn malformed_header() {
    assert!(matches!(
        Product::parse("not a header at all, clearly", received()),
        Err(ParseError::MalformedHeader(_))
    ));
    assert!(matches!(
        Product::parse("WUUS53 KCLE 329999\nSVRCLE\nOHC085-201900-\nbody\n$$\n", received()),
        Err(ParseError::MalformedHeader(_))
    ));
}

#[test]
fn missing_ugc() {
    let raw = "\
WUUS53 KCLE 201815
SVRCLE

A product whose first block is prose, not geography.

$$
";
    assert!(matches!(
        Product::parse(raw, received()),
        Err(ParseError::MissingUgc(_))
    ));
}

#[test]
fn invalid_vtec_is_an_error_not_a_skip() {
    let raw = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.BOGUS.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/

text

$$
";
    assert!(matches!(
        Product::parse(raw, received()),
        Err(ParseError::InvalidVtec(_))
    ));
}

#[test]
fn issuance_day_resolves_across_month_boundary() {
    let header = WmoHeader {
        ttaaii: "WUUS53".into(),
        office: "KCLE".into(),
        day: 31,
        hour: 23,
        minute: 50,
    };
    let received = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
    assert_eq!(
        header.issued_near(received),
        Utc.with_ymd_and_hms(2025, 12, 31, 23, 50, 0).unwrap()
    );
}

#[test]
fn parse_failure_log_is_bounded() {
    let log = ParseFailureLog::new(2);
    let error = ParseError::EmptyBody;
    log.record("one", &error, received());
    log.record("two", &error, received());
    log.record("three", &error, received());

    let recent = log.recent();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].raw, "two");
    assert_eq!(recent[1].raw, "three");
}

#[test]
fn round_trips_structured_fields() {
    // VTEC line + UGC block + LAT...LON block are sufficient to
    // reconstruct the structured identity of a parsed alert.
    let product = Product::parse(SEVERE_THUNDERSTORM, received()).unwrap();
    let alert = &product.alerts[0];

    let vtec = alert.vtec.as_ref().unwrap();
    let reparsed: Vtec = vtec.to_string().parse().unwrap();
    assert_eq!(&reparsed, vtec);

    let polygon = alert.polygon.as_ref().unwrap();
    let reparsed: Polygon = polygon.to_string().parse().unwrap();
    assert_eq!(&reparsed, polygon);

    let ugc_block: UgcBlock = "OHC085-201900-".parse().unwrap();
    assert_eq!(ugc_block.zones, alert.affected_areas);
}
