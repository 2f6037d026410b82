use compact_str::CompactString;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{StationMetadata, StationTable};
use crate::raw_types::{RawStationProperties, RawStationsApiResponse};

/// Builds the station table from a decoded stations response. An upstream
/// error or an unexpected top-level shape fails the whole table.
pub fn normalize_stations(decoded: Value) -> Result<StationTable> {
    let response = RawStationsApiResponse::deserialize(&decoded)
        .map_err(|e| Error::Upstream(format!("unexpected stations response shape: {e}")))?;

    let body = response
        .stations_data_response
        .ok_or_else(|| Error::Upstream("missing StationsDataResponse".to_string()))?;

    if let Some(error) = body.error {
        return Err(Error::Upstream(error.message));
    }

    let features = body
        .features
        .ok_or_else(|| Error::Upstream("stations response carries no features".to_string()))?;

    let mut table = StationTable::with_capacity(features.len());

    for feature in features {
        let station = station_from_properties(feature.properties)?;
        if table.contains_key(&station.code) {
            warn!(code = %station.code, "duplicate station record ignored");
            continue;
        }
        table.insert(station.code.clone(), station);
    }

    debug!("normalized {} stations", table.len());
    Ok(table)
}

fn station_from_properties(properties: Value) -> Result<StationMetadata> {
    let props = RawStationProperties::deserialize(&properties)?;

    Ok(StationMetadata {
        code: CompactString::from(props.code.trim()),
        name: props.station_name.unwrap_or_default(),
        address1: props.address1.unwrap_or_default(),
        address2: props.address2.unwrap_or_default(),
        city: props.city.unwrap_or_default(),
        state: props.state.unwrap_or_default(),
        zip: props.zipcode.unwrap_or_default(),
        lat: props.lat,
        lon: props.lon,
        raw: properties,
    })
}
