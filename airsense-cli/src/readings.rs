//! Sensor readings the CLI sends: the fixed sample set, random plausible
//! readings and readings replayed from a JSON file.

use std::path::Path;

use airsense_core::models::SensorReading;
use anyhow::{bail, Context, Result};
use rand::Rng;

/// Readings used by `simulate`, from polluted and crowded to clean and empty.
pub const SAMPLE_READINGS: [SensorReading; 4] = [
    SensorReading {
        temperature: 28.0,
        humidity: 70.0,
        co2: 1800.0,
        pm25: 80.0,
        pm10: 120.0,
        tvoc: 400.0,
        occupancy: 50.0,
    },
    SensorReading {
        temperature: 30.0,
        humidity: 50.0,
        co2: 500.0,
        pm25: 10.0,
        pm10: 15.0,
        tvoc: 50.0,
        occupancy: 5.0,
    },
    SensorReading {
        temperature: 22.0,
        humidity: 45.0,
        co2: 400.0,
        pm25: 8.0,
        pm10: 12.0,
        tvoc: 30.0,
        occupancy: 0.0,
    },
    SensorReading {
        temperature: 24.0,
        humidity: 55.0,
        co2: 1200.0,
        pm25: 40.0,
        pm10: 60.0,
        tvoc: 250.0,
        occupancy: 30.0,
    },
];

/// Ground truth for `SAMPLE_READINGS`: 0 = ventilate, 1 = leave off.
pub const SAMPLE_GROUND_TRUTH: [i64; 4] = [0, 0, 1, 0];

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A random reading within plausible indoor ranges.
pub fn random_reading<R: Rng + ?Sized>(rng: &mut R) -> SensorReading {
    SensorReading {
        temperature: one_decimal(rng.gen_range(18.0..=32.0)),
        humidity: one_decimal(rng.gen_range(30.0..=80.0)),
        co2: rng.gen_range(300..=2000) as f64,
        pm25: one_decimal(rng.gen_range(5.0..=80.0)),
        pm10: one_decimal(rng.gen_range(10.0..=150.0)),
        tvoc: rng.gen_range(10..=500) as f64,
        occupancy: rng.gen_range(0..=60) as f64,
    }
}

/// Parse a JSON document holding one reading or a list of readings.
pub fn parse_readings(raw: &str) -> Result<Vec<SensorReading>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid JSON")?;
    let readings = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).with_context(|| format!("entry {i} is not a reading"))
            })
            .collect::<Result<Vec<SensorReading>>>()?,
        serde_json::Value::Object(_) => {
            vec![serde_json::from_value(value).context("object is not a reading")?]
        }
        _ => bail!("expected a reading object or a list of readings"),
    };
    if readings.is_empty() {
        bail!("no readings found");
    }
    Ok(readings)
}

pub fn load_readings(path: &Path) -> Result<Vec<SensorReading>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_readings(&raw).with_context(|| format!("cannot parse {}", path.display()))
}
