//! Built-in simulated drivers. Each produces uniformly distributed readings in
//! the range its physical counterpart reports under normal indoor conditions.

use crate::source::{Reading, SensorSource};
use rand::Rng;
use std::ops::Range;

pub const METRIC_TEMPERATURE: &str = "temperature";
pub const METRIC_HUMIDITY: &str = "humidity";
pub const METRIC_PRESSURE: &str = "pressure";
pub const METRIC_CO: &str = "co";

const TEMPERATURE_C: Range<f64> = 20.0..25.0;
const HUMIDITY_PCT: Range<f64> = 30.0..50.0;
const PRESSURE_HPA: Range<f64> = 1015.0..1025.0;
const CO_PPM: Range<f64> = 0.5..1.1;

/// Temperature/humidity probe.
#[derive(Debug, Default)]
pub struct ClimateSensor;

impl ClimateSensor {
    pub const METRICS: [&'static str; 2] = [METRIC_TEMPERATURE, METRIC_HUMIDITY];
}

impl SensorSource for ClimateSensor {
    fn name(&self) -> &str {
        "climate"
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        let mut rng = rand::thread_rng();
        Ok(Reading::from([
            (METRIC_TEMPERATURE.to_string(), rng.gen_range(TEMPERATURE_C)),
            (METRIC_HUMIDITY.to_string(), rng.gen_range(HUMIDITY_PCT)),
        ]))
    }
}

/// Ambient pressure sensor.
#[derive(Debug, Default)]
pub struct Barometer;

impl Barometer {
    pub const METRICS: [&'static str; 1] = [METRIC_PRESSURE];
}

impl SensorSource for Barometer {
    fn name(&self) -> &str {
        "barometer"
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        let pressure = rand::thread_rng().gen_range(PRESSURE_HPA);
        Ok(Reading::from([(METRIC_PRESSURE.to_string(), pressure)]))
    }
}

/// Carbon monoxide analyzer.
#[derive(Debug, Default)]
pub struct GasAnalyzer;

impl GasAnalyzer {
    pub const METRICS: [&'static str; 1] = [METRIC_CO];
}

impl SensorSource for GasAnalyzer {
    fn name(&self) -> &str {
        "gas"
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        let co = rand::thread_rng().gen_range(CO_PPM);
        Ok(Reading::from([(METRIC_CO.to_string(), co)]))
    }
}
