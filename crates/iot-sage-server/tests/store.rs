//! Metrics stores: in-memory, remote service client, and the simulator.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use iot_sage::{MetricSample, TimeRange};
use iot_sage_server::config::SimulatorConfig;
use iot_sage_server::store::{
    simulator, MemoryStore, MetricsStore, RemoteMetricsStore, SampleFilter, Simulator, StoreStats,
};
use iot_sage_server::types::StoreError;

fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn hour_window() -> TimeRange {
    TimeRange::new(at(11, 0), at(12, 0))
}

fn remote(server: &MockServer) -> RemoteMetricsStore {
    RemoteMetricsStore::new(&server.uri(), Duration::from_secs(2), 1000).unwrap()
}

// ─────────────────────── memory ───────────────────────

#[tokio::test]
async fn test_memory_find_filters_and_bounds() {
    let store = MemoryStore::with_samples(vec![
        MetricSample::new("device_003", "Kitchen", "temperature", 23.0, at(11, 30)),
        MetricSample::new("device_003", "Kitchen", "humidity", 55.0, at(11, 30)),
        MetricSample::new("device_002", "Bedroom", "temperature", 19.0, at(11, 40)),
        MetricSample::new("device_003", "Kitchen", "temperature", 22.0, at(11, 0)),
        MetricSample::new("device_003", "Kitchen", "temperature", 24.0, at(12, 0)),
        MetricSample::new("device_003", "Kitchen", "temperature", 30.0, at(10, 59)),
    ]);

    let filter = SampleFilter::new(Some("kitchen".into()), Some("Temperature".into()));
    let found = store.find(&filter, &hour_window()).await.unwrap();

    let values: Vec<f64> = found.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![22.0, 23.0, 24.0]);

    let everything = store
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap();
    assert_eq!(everything.len(), 5);
}

#[tokio::test]
async fn test_memory_insert_keeps_order() {
    let store = MemoryStore::new();
    assert!(store.is_empty().await);

    store
        .insert(MetricSample::new("d", "Kitchen", "temperature", 2.0, at(11, 20)))
        .await;
    store
        .insert(MetricSample::new("d", "Kitchen", "temperature", 1.0, at(11, 10)))
        .await;
    store
        .extend(vec![MetricSample::new("d", "Kitchen", "temperature", 3.0, at(11, 30))])
        .await;

    let found = store
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap();
    let values: Vec<f64> = found.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
    assert_eq!(store.len().await, 3);
}

#[test]
fn test_stats_from_samples() {
    let samples = vec![
        MetricSample::new("device_003", "Kitchen", "temperature", 23.0, at(11, 30)),
        MetricSample::new("device_003", "Kitchen", "humidity", 55.0, at(11, 50)),
        MetricSample::new("device_002", "Bedroom", "temperature", 19.0, at(11, 10)),
    ];

    let stats = StoreStats::from_samples(samples.iter());

    assert_eq!(stats.total_samples, 3);
    assert_eq!(stats.device_count, 2);
    assert_eq!(stats.locations, vec!["Bedroom".to_string(), "Kitchen".to_string()]);
    assert_eq!(stats.metric_counts["temperature"], 2);
    assert_eq!(stats.first_reading, Some(at(11, 10)));
    assert_eq!(stats.last_reading, Some(at(11, 50)));
    assert_eq!(stats.latest.map(|s| s.value), Some(55.0));

    assert_eq!(StoreStats::from_samples(std::iter::empty()), StoreStats::default());
}

// ─────────────────────── remote ───────────────────────

#[tokio::test]
async fn test_remote_find_sends_filters_and_sorts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .and(query_param("location", "Kitchen"))
        .and(query_param("metric_type", "temperature"))
        .and(query_param("start_time", "2024-03-01T11:00:00"))
        .and(query_param("end_time", "2024-03-01T12:00:00"))
        .and(query_param("skip", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "data": [
                {
                    "device_id": "device_003",
                    "device_name": "Kitchen Sensor",
                    "location": "Kitchen",
                    "type": "temperature",
                    "value": 24.5,
                    "unit": "C",
                    "timestamp": "2024-03-01T11:50:00.123456"
                },
                {
                    "device_id": "device_003",
                    "location": "Kitchen",
                    "type": "temperature",
                    "value": 23.0,
                    "unit": "C",
                    "timestamp": "2024-03-01T11:20:00Z"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filter = SampleFilter::new(Some("Kitchen".into()), Some("temperature".into()));
    let found = remote(&server).find(&filter, &hour_window()).await.unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].value, 23.0);
    assert_eq!(found[0].timestamp, at(11, 20));
    assert_eq!(found[1].device_name.as_deref(), Some("Kitchen Sensor"));
    assert_eq!(found[1].metric_type, "temperature");
    assert_eq!(found[1].display_unit(), "°C");
}

#[tokio::test]
async fn test_remote_unsuccessful_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "database offline",
            "data": null
        })))
        .mount(&server)
        .await;

    let err = remote(&server)
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap_err();

    match err {
        StoreError::InvalidResponse(message) => assert_eq!(message, "database offline"),
        other => panic!("expected invalid response, got {other}"),
    }
}

#[tokio::test]
async fn test_remote_server_error_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = remote(&server)
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)));
}

#[tokio::test]
async fn test_remote_bad_timestamp_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{
                "device_id": "device_001",
                "location": "Living Room",
                "type": "humidity",
                "value": 40.0,
                "timestamp": "yesterday"
            }]
        })))
        .mount(&server)
        .await;

    let err = remote(&server)
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_remote_stats_scans_without_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [
                {
                    "device_id": "device_001",
                    "location": "Living Room",
                    "metric_type": "humidity",
                    "value": 40.0,
                    "timestamp": "2024-03-01T11:00:00"
                },
                {
                    "device_id": "device_005",
                    "location": "Garden",
                    "type": "temperature",
                    "value": 12.5,
                    "timestamp": "2024-03-01T11:05:00"
                }
            ]
        })))
        .mount(&server)
        .await;

    let stats = remote(&server).stats().await.unwrap();

    assert_eq!(stats.total_samples, 2);
    assert_eq!(stats.device_count, 2);
    assert_eq!(stats.last_reading, Some(at(11, 5)));
}

#[tokio::test]
async fn test_remote_unreachable() {
    let store = RemoteMetricsStore::new("http://127.0.0.1:9", Duration::from_secs(1), 10).unwrap();

    let err = store
        .find(&SampleFilter::default(), &hour_window())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)));
}

// ─────────────────────── simulator ───────────────────────

#[test]
fn test_simulator_is_deterministic_per_seed() {
    let end = at(12, 0);
    let config = SimulatorConfig::default();

    let first = Simulator::new(config.clone()).history(end);
    let second = Simulator::new(config.clone()).history(end);
    assert_eq!(first, second);

    let other = Simulator::new(SimulatorConfig {
        seed: 7,
        ..config
    })
    .history(end);
    assert_ne!(first, other);
}

#[test]
fn test_simulator_history_shape() {
    let end = at(12, 0);
    let config = SimulatorConfig {
        history: Duration::from_secs(60 * 60),
        interval: Duration::from_secs(5 * 60),
        ..SimulatorConfig::default()
    };

    let samples = Simulator::new(config).history(end);

    // 13 ticks from 11:00 to 12:00 inclusive, two metrics per device.
    assert_eq!(samples.len(), 13 * Simulator::device_count() * 2);
    assert_eq!(samples.first().map(|s| s.timestamp), Some(at(11, 0)));
    assert_eq!(samples.last().map(|s| s.timestamp), Some(end));
    assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(samples
        .iter()
        .filter(|s| s.metric_type == "humidity")
        .all(|s| (0.0..=100.0).contains(&s.value)));
}

#[test]
fn test_simulator_spikes_only_when_enabled() {
    let end = at(12, 0);
    let calm = SimulatorConfig {
        spike_rate: 0.0,
        ..SimulatorConfig::default()
    };
    // Highest indoor and outdoor ranges top out at 27 and 37 degrees.
    let max_temp = Simulator::new(calm)
        .history(end)
        .iter()
        .filter(|s| s.metric_type == "temperature")
        .map(|s| s.value)
        .fold(f64::MIN, f64::max);
    assert!(max_temp <= 37.0, "{max_temp}");

    let stormy = SimulatorConfig {
        spike_rate: 1.0,
        ..SimulatorConfig::default()
    };
    let indoor_max = Simulator::new(stormy)
        .history(end)
        .iter()
        .filter(|s| s.metric_type == "temperature" && s.location == "Bedroom")
        .map(|s| s.value)
        .fold(f64::MIN, f64::max);
    assert!(indoor_max > 30.0, "{indoor_max}");
}

#[tokio::test]
async fn test_seeded_store_covers_all_devices() {
    let store = simulator::seeded_store(&SimulatorConfig::default());
    let stats = store.stats().await.unwrap();

    assert_eq!(stats.device_count, 5);
    assert_eq!(stats.location_count, 5);
    assert_eq!(stats.metric_counts.len(), 2);
    assert!(stats.total_samples >= 288 * 10);
}
