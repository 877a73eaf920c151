//! The domain value type: a single named metric, either a gauge or a counter.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};


/// Kind of a metric. The kind decides which scalar field is populated and how
/// updates merge: gauges replace, counters accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            _ => Err(MetricError::UnsupportedType),
        }
    }
}

/// A metric as it travels over the wire and lives in the repositories.
///
/// Exactly one of `delta`/`value` is populated, depending on `kind`. The pair
/// `(kind, id)` is the identity: `gauge:foo` and `counter:foo` are distinct
/// metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Metric {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(crate) delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(crate) value: Option<f64>,
}

impl Metric {
    pub(crate) fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub(crate) fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// The stored scalar as plain text: the integer sum for counters, the
    /// shortest round-trip float representation for gauges.
    pub(crate) fn scalar_text(&self) -> String {
        match self.kind {
            MetricKind::Counter => self.delta.unwrap_or(0).to_string(),
            MetricKind::Gauge => self.value.unwrap_or(0.0).to_string(),
        }
    }
}

/// Errors surfaced at the use-case boundary. Transports map these onto status
/// codes without inspecting error strings.
#[derive(Debug, thiserror::Error)]
pub(crate) enum MetricError {
    #[error("value for update metric is nil")]
    NilValue,

    #[error("unsupported metric type")]
    UnsupportedType,

    #[error("unsupported metric value type")]
    UnsupportedValueType,

    #[error("can't find metric")]
    NotFound,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}
