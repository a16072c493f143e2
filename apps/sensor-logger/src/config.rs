use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MAX_INTERVAL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Climate,
    Barometer,
    Gas,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "climate" => Ok(Self::Climate),
            "barometer" => Ok(Self::Barometer),
            "gas" => Ok(Self::Gas),
            other => Err(anyhow!("unknown sensor source {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub flush_interval: Duration,
    pub sample_timeout: Option<Duration>,
    pub sources: Vec<SourceKind>,
    pub climate_interval: Duration,
    pub barometer_interval: Duration,
    pub gas_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(env_string(&lookup, "SENSOR_LOGGER_DATA_DIR", Some("data".to_string()))?);

        let flush_interval = interval_secs(&lookup, "SENSOR_LOGGER_FLUSH_INTERVAL_SECS", 60)?;

        // 0 disables the timeout.
        let sample_timeout = match env_u64(&lookup, "SENSOR_LOGGER_SAMPLE_TIMEOUT_MS", Some(5000))? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let sources_raw = env_string(
            &lookup,
            "SENSOR_LOGGER_SOURCES",
            Some("climate,barometer,gas".to_string()),
        )?;
        let sources = parse_sources(&sources_raw).context("invalid SENSOR_LOGGER_SOURCES")?;

        let climate_interval = interval_secs(&lookup, "SENSOR_LOGGER_CLIMATE_INTERVAL_SECS", 10)?;
        let barometer_interval = interval_secs(&lookup, "SENSOR_LOGGER_BAROMETER_INTERVAL_SECS", 10)?;
        let gas_interval = interval_secs(&lookup, "SENSOR_LOGGER_GAS_INTERVAL_SECS", 10)?;

        Ok(Self {
            data_dir,
            flush_interval,
            sample_timeout,
            sources,
            climate_interval,
            barometer_interval,
            gas_interval,
        })
    }

    pub fn interval_for(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Climate => self.climate_interval,
            SourceKind::Barometer => self.barometer_interval,
            SourceKind::Gas => self.gas_interval,
        }
    }
}

fn parse_sources(raw: &str) -> Result<Vec<SourceKind>> {
    let mut sources = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let kind = part.parse::<SourceKind>()?;
        if sources.contains(&kind) {
            bail!("sensor source {part:?} listed twice");
        }
        sources.push(kind);
    }
    if sources.is_empty() {
        bail!("at least one sensor source is required");
    }
    Ok(sources)
}

fn interval_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = env_u64(lookup, key, Some(default))?;
    if secs == 0 || secs > MAX_INTERVAL_SECS {
        bail!("{key} must be between 1 and {MAX_INTERVAL_SECS} seconds");
    }
    Ok(Duration::from_secs(secs))
}

fn env_string<F>(lookup: &F, key: &str, default: Option<String>) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match env_optional(lookup, key) {
        Some(value) => Ok(value),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64<F>(lookup: &F, key: &str, default: Option<u64>) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match env_optional(lookup, key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
