//! Deterministic sensor simulator used to seed the in-memory store.
//!
//! Five household devices each report temperature and humidity. Values are
//! drawn from per-location ranges around a 22 °C / 50 % baseline, with an
//! occasional temperature spike.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use iot_sage::MetricSample;

use super::MemoryStore;
use crate::config::SimulatorConfig;

const BASE_TEMPERATURE: f64 = 22.0;
const BASE_HUMIDITY: f64 = 50.0;

struct Device {
    id: &'static str,
    name: &'static str,
    location: &'static str,
    /// Offset range added to the temperature baseline.
    temperature: (f64, f64),
    /// Offset range added to the humidity baseline.
    humidity: (f64, f64),
}

const DEVICES: &[Device] = &[
    Device {
        id: "device_001",
        name: "Living Room Sensor",
        location: "Living Room",
        temperature: (-2.0, 3.0),
        humidity: (-10.0, 10.0),
    },
    Device {
        id: "device_002",
        name: "Bedroom Sensor",
        location: "Bedroom",
        temperature: (-3.0, 1.0),
        humidity: (-15.0, 5.0),
    },
    Device {
        id: "device_003",
        name: "Kitchen Sensor",
        location: "Kitchen",
        temperature: (0.0, 5.0),
        humidity: (0.0, 20.0),
    },
    Device {
        id: "device_004",
        name: "Bathroom Sensor",
        location: "Bathroom",
        temperature: (-1.0, 4.0),
        humidity: (10.0, 30.0),
    },
    Device {
        id: "device_005",
        name: "Outdoor Sensor",
        location: "Garden",
        temperature: (-10.0, 15.0),
        humidity: (-20.0, 40.0),
    },
];

pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn device_count() -> usize {
        DEVICES.len()
    }

    /// One temperature and one humidity reading per device at `ts`.
    pub fn readings_at(&mut self, ts: DateTime<Utc>) -> Vec<MetricSample> {
        let mut batch = Vec::with_capacity(DEVICES.len() * 2);
        for device in DEVICES {
            let mut temperature = BASE_TEMPERATURE + self.offset(device.temperature);
            if self.config.spike_rate > 0.0 && self.rng.gen_bool(self.config.spike_rate.min(1.0)) {
                temperature += self.rng.gen_range(12.0..20.0);
            }
            let humidity = (BASE_HUMIDITY + self.offset(device.humidity)).clamp(0.0, 100.0);

            batch.push(reading(device, "temperature", round1(temperature), "C", ts));
            batch.push(reading(device, "humidity", round1(humidity), "%", ts));
        }
        batch
    }

    /// History covering `config.history` and ending at `end`, oldest first.
    pub fn history(&mut self, end: DateTime<Utc>) -> Vec<MetricSample> {
        let interval = self.step();
        let steps = self.config.history.as_secs() / interval.num_seconds().max(1) as u64;
        let steps = i32::try_from(steps).unwrap_or(i32::MAX);

        let mut samples = Vec::new();
        for i in (0..=steps).rev() {
            let Some(ts) = interval
                .checked_mul(i)
                .and_then(|back| end.checked_sub_signed(back))
            else {
                continue;
            };
            samples.extend(self.readings_at(ts));
        }
        samples
    }

    fn step(&self) -> chrono::Duration {
        let secs = self.config.interval.as_secs().clamp(1, i64::MAX as u64) as i64;
        chrono::Duration::seconds(secs)
    }

    fn offset(&mut self, (low, high): (f64, f64)) -> f64 {
        self.rng.gen_range(low..=high)
    }
}

fn reading(
    device: &Device,
    metric_type: &str,
    value: f64,
    unit: &str,
    ts: DateTime<Utc>,
) -> MetricSample {
    MetricSample {
        device_id: device.id.to_string(),
        device_name: Some(device.name.to_string()),
        location: device.location.to_string(),
        metric_type: metric_type.to_string(),
        value,
        unit: Some(unit.to_string()),
        timestamp: ts,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Build a store holding simulated history up to now.
pub fn seeded_store(config: &SimulatorConfig) -> MemoryStore {
    let mut simulator = Simulator::new(config.clone());
    let samples = simulator.history(Utc::now());
    tracing::info!(
        samples = samples.len(),
        devices = DEVICES.len(),
        seed = config.seed,
        "Seeded in-memory store from simulator"
    );
    MemoryStore::with_samples(samples)
}

/// Append a fresh batch every interval until the task is dropped.
pub async fn run_feed(store: Arc<MemoryStore>, config: SimulatorConfig) {
    // Offset the seed so the live feed does not replay the seeded history.
    let mut simulator = Simulator::new(SimulatorConfig {
        seed: config.seed.wrapping_add(1),
        ..config
    });
    let mut ticker = tokio::time::interval(simulator.config.interval.max(std::time::Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let batch = simulator.readings_at(Utc::now());
        tracing::debug!(count = batch.len(), "Simulator feed appended readings");
        store.extend(batch).await;
    }
}
