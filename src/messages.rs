use log::warn;
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use serde_json::Value;

/// One server-reported state record for one device.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_report: Option<String>,
    /// Opaque update token; an activation counts once per distinct value.
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_updated: Option<String>,
    #[serde(default, deserialize_with = "lenient_signal")]
    pub signal_strength: Option<String>,
    #[serde(default, deserialize_with = "lenient_distance")]
    pub distance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub power: bool,
}

impl DeviceSnapshot {
    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::classify(self.signal_strength.as_deref())
    }
}

/// Turn a status response body into a roster.
///
/// Anything other than a JSON array yields an empty roster. Elements that
/// cannot be read as a snapshot (no string `name`) are skipped.
pub fn parse_roster(payload: Value) -> Vec<DeviceSnapshot> {
    let Value::Array(items) = payload else {
        warn!("Status payload is not a list, treating roster as empty");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match DeviceSnapshot::deserialize(item) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("Skipping unreadable device entry: {}", err);
                None
            }
        })
        .collect()
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_signal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_distance<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok().filter(|v: &f64| v.is_finite()),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(matches!(Option::<Value>::deserialize(d)?, Some(Value::Bool(true))))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Activate,
    Deactivate,
}

impl ControlAction {
    /// Path segment understood by the device agent proxy.
    pub fn verb(self) -> &'static str {
        match self {
            ControlAction::Activate => "wake",
            ControlAction::Deactivate => "sleep",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl SignalQuality {
    /// Classify an RSSI reading in dBm.
    pub fn classify(raw: Option<&str>) -> Self {
        match raw.and_then(|r| r.trim().parse::<i64>().ok()) {
            Some(v) if v >= -50 => SignalQuality::Good,
            Some(v) if v >= -70 => SignalQuality::Fair,
            Some(_) => SignalQuality::Poor,
            None => SignalQuality::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignalQuality::Good => "good",
            SignalQuality::Fair => "fair",
            SignalQuality::Poor => "poor",
            SignalQuality::Unknown => "N/A",
        }
    }
}

/// A device reporting `report` under update token `token`.
#[cfg(test)]
pub fn snapshot(name: &str, report: &str, token: &str) -> DeviceSnapshot {
    DeviceSnapshot {
        name: name.to_string(),
        last_report: Some(report.to_string()),
        last_updated: Some(token.to_string()),
        ..Default::default()
    }
}
