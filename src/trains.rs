use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{RouteStation, StationTable, Train};
use crate::raw_types::{RawStationData, RawTrainData, RawTrainsApiResponse};
use crate::status::{derive_stop, zone_for};

static STOP_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Station(\d+)$").expect("static regex")
});

/// Builds every train in a decoded trains response. Any record that cannot
/// be read fails the batch; unknown station codes and bad timestamps only
/// degrade the affected stop.
pub fn normalize_trains(decoded: Value, stations: &StationTable) -> Result<Vec<Train>> {
    let response = RawTrainsApiResponse::deserialize(&decoded)
        .map_err(|e| Error::Upstream(format!("unexpected trains response shape: {e}")))?;

    let trains = response
        .features
        .into_iter()
        .map(|feature| train_from_properties(feature.properties, stations))
        .collect::<Result<Vec<_>>>()?;

    debug!("normalized {} trains", trains.len());
    Ok(trains)
}

fn train_from_properties(properties: Value, stations: &StationTable) -> Result<Train> {
    let data = RawTrainData::deserialize(&properties)?;
    let number = data.train_num.trim().parse::<u32>().map_err(|_| {
        Error::MalformedPayload(format!(
            "train {} has non-numeric TrainNum {:?}",
            data.id, data.train_num
        ))
    })?;

    let Value::Object(props) = &properties else {
        return Err(Error::MalformedPayload(format!(
            "train {} properties are not an object",
            data.id
        )));
    };

    let stops = ordered_stop_records(&data.id, props)?
        .into_iter()
        .map(|value| route_station(&data.id, value, stations))
        .collect::<Result<Vec<_>>>()?;

    Ok(Train {
        id: CompactString::from(data.id),
        heading: data.heading.unwrap_or_default(),
        number,
        route: data.route_name.unwrap_or_default(),
        stations: stops,
        raw: properties,
    })
}

/// Collects the `StationN` values and orders them by `N`, whatever order the
/// properties were enumerated in. A stop key whose index cannot be read fails
/// the record rather than losing that stop.
fn ordered_stop_records<'a>(train_id: &str, props: &'a Map<String, Value>) -> Result<Vec<&'a Value>> {
    let mut indexed = Vec::new();
    for (key, value) in props {
        let Some(digits) = STOP_KEY.captures(key).and_then(|c| c.get(1)) else {
            continue;
        };
        let index: u32 = digits.as_str().parse().map_err(|_| {
            Error::MalformedPayload(format!("train {train_id} has unreadable stop key {key:?}"))
        })?;
        indexed.push((index, value));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, value)| value).collect())
}

fn route_station(train_id: &str, value: &Value, stations: &StationTable) -> Result<RouteStation> {
    // Stop records usually arrive as JSON-encoded strings.
    let record: Value = match value {
        Value::String(encoded) => serde_json::from_str(encoded)?,
        other => other.clone(),
    };
    let raw = RawStationData::deserialize(&record)?;
    let code = CompactString::from(raw.code.trim());

    let tz_code = raw.tz.as_deref().unwrap_or_default();
    let tz = zone_for(tz_code).unwrap_or_else(|| {
        warn!(train = train_id, station = %code, tz = tz_code, "unknown timezone, using UTC");
        chrono_tz::UTC
    });

    let derived = derive_stop(&raw, tz);
    for rejected in &derived.rejected {
        warn!(train = train_id, station = %code, "dropping timestamp: {}", rejected);
    }

    let station = stations.get(&code).cloned();
    if station.is_none() {
        warn!(train = train_id, station = %code, "no metadata for station");
    }

    Ok(RouteStation {
        code,
        bus: raw.bus,
        times: derived.times,
        status: derived.status,
        timezone: tz.name().to_string(),
        station,
        raw: Some(record),
    })
}
