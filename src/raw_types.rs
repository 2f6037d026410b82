//! Upstream shapes as the provider sends them, once the payload has been
//! decrypted. Field names follow the provider; nothing here is cleaned up.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct RawStationsApiResponse {
    #[serde(rename = "StationsDataResponse")]
    pub stations_data_response: Option<StationsDataResponse>,
}

#[derive(Debug, Deserialize)]
pub struct StationsDataResponse {
    pub error: Option<UpstreamErrorBody>,
    pub features: Option<Vec<Feature>>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RawTrainsApiResponse {
    pub features: Vec<Feature>,
}

/// A GeoJSON-like feature. `properties` stays untyped so the whole record
/// can be retained as the entity's raw payload.
#[derive(Debug, Deserialize)]
pub struct Feature {
    pub properties: Value,
}

#[derive(Debug, Deserialize)]
pub struct RawStationProperties {
    #[serde(rename = "Code", deserialize_with = "string_or_number")]
    pub code: String,
    #[serde(rename = "StationName", default)]
    pub station_name: Option<String>,
    #[serde(rename = "Address1", default)]
    pub address1: Option<String>,
    #[serde(rename = "Address2", default)]
    pub address2: Option<String>,
    #[serde(rename = "City", default)]
    pub city: Option<String>,
    #[serde(rename = "State", default)]
    pub state: Option<String>,
    #[serde(rename = "Zipcode", default, deserialize_with = "opt_string_or_number")]
    pub zipcode: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: f64,
}

/// Fixed part of a train record. The `StationN` keys are read separately
/// from the untyped properties.
#[derive(Debug, Deserialize)]
pub struct RawTrainData {
    #[serde(rename = "ID", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "Heading", default)]
    pub heading: Option<String>,
    #[serde(rename = "TrainNum", deserialize_with = "string_or_number")]
    pub train_num: String,
    #[serde(rename = "RouteName", default)]
    pub route_name: Option<String>,
}

/// One `StationN` value.
#[derive(Debug, Deserialize)]
pub struct RawStationData {
    #[serde(deserialize_with = "string_or_number")]
    pub code: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub bus: bool,
    #[serde(default)]
    pub tz: Option<String>,
    pub postdep: Option<String>,
    pub schdep: Option<String>,
    pub estdep: Option<String>,
    pub postarr: Option<String>,
    pub scharr: Option<String>,
    pub estarr: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

// Coordinates sometimes arrive as numeric strings.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("coordinate out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected coordinate, got {other}"
        ))),
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|n| n != 0)),
        Value::String(s) => Ok(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "y" | "yes"
        )),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_record_accepts_string_flags_and_missing_times() {
        let raw = json!({"code": "SEA", "bus": "true", "tz": "P", "schdep": "10/19/2026 09:50:00"});
        let stop: RawStationData = serde_json::from_value(raw).unwrap();
        assert_eq!(stop.code, "SEA");
        assert!(stop.bus);
        assert_eq!(stop.schdep.as_deref(), Some("10/19/2026 09:50:00"));
        assert!(stop.postdep.is_none());
    }

    #[test]
    fn train_ids_may_be_numeric() {
        let raw = json!({"ID": 118284, "TrainNum": "11", "RouteName": "Coast Starlight"});
        let train = RawTrainData::deserialize(&raw).unwrap();
        assert_eq!(train.id, "118284");
        assert_eq!(train.train_num, "11");
        assert!(train.heading.is_none());
    }

    #[test]
    fn station_coordinates_may_be_strings() {
        let raw = json!({"Code": "LAX", "StationName": "Los Angeles", "lat": "34.0559", "lon": -118.2357, "Zipcode": 90012});
        let props = RawStationProperties::deserialize(&raw).unwrap();
        assert!((props.lat - 34.0559).abs() < 1e-9);
        assert_eq!(props.zipcode.as_deref(), Some("90012"));
    }
}
