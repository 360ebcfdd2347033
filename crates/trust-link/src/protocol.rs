//! Controller wire protocol (JSON text frames).

#![allow(missing_docs)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::LinkError;

/// Default controller telemetry port.
pub const DEFAULT_PORT: u16 = 4444;

/// Messages sent to a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Replace the controller-side subscription with `variables` under `path`.
    Subscribe {
        variables: Vec<SmolStr>,
        path: SmolStr,
    },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, LinkError> {
        serde_json::to_string(self)
            .map_err(|err| LinkError::Protocol(format!("encode outbound: {err}").into()))
    }
}

/// Messages streamed by a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<RuntimeStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variables: Option<IndexMap<SmolStr, Vec<VariableSample>>>,
    },
    Deployment {
        path: SmolStr,
    },
    /// Any other `type`; tolerated and ignored.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Scan statistics reported by a running controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default)]
    pub scan_time: Option<f64>,
    #[serde(default)]
    pub last_scan: Option<serde_json::Value>,
    #[serde(default)]
    pub variable_count: Option<u64>,
    #[serde(default)]
    pub task_count: Option<u64>,
    #[serde(default)]
    pub status: Option<SmolStr>,
}

/// One reported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VariableSample {
    pub name: SmolStr,
    #[serde(default)]
    pub value: SampleValue,
    #[serde(default, rename = "Type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

/// Raw sample value as reported on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// Structured values (arrays, struct members) are carried through untouched.
    Other(serde_json::Value),
}

impl SampleValue {
    /// Numeric coercion used for charting.
    ///
    /// Numbers pass through, booleans map to 1/0 and strings are parsed after
    /// trimming. Anything else, including non-finite results, yields `None`.
    #[must_use]
    pub fn as_numeric(&self) -> Option<f64> {
        let value = match self {
            Self::Number(number) => number.as_f64()?,
            Self::Bool(flag) => f64::from(u8::from(*flag)),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
            Self::Null | Self::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for SampleValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// OPC-style quality flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

impl From<String> for Quality {
    fn from(text: String) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "good" => Self::Good,
            "bad" => Self::Bad,
            _ => Self::Uncertain,
        }
    }
}
