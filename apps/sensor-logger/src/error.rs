use crate::window::WindowKey;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A sensor tick that produced no usable reading. The tick is skipped.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("{sensor}: driver error: {source:#}")]
    Driver {
        sensor: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{sensor}: sample timed out after {timeout:?}")]
    Timeout { sensor: String, timeout: Duration },

    #[error("{sensor}: previous sample still running after {timeout:?} timeout")]
    Busy { sensor: String, timeout: Duration },

    #[error("{sensor}: sampling task aborted: {message}")]
    Aborted { sensor: String, message: String },

    #[error("{sensor}: reading is missing metric {metric}")]
    MissingMetric { sensor: String, metric: String },

    #[error("{sensor}: metric {metric} is not finite ({value})")]
    NonFinite {
        sensor: String,
        metric: String,
        value: f64,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlushError {
    #[error("window {window} was stored without any samples")]
    EmptyWindow { window: WindowKey },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read header of {}: {source}", .path.display())]
    ReadHeader {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write row to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to flush {}: {source}", .path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
