//! Travel status and lateness, inferred from the six optional per-stop
//! timestamps. The provider never sends an explicit status.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result, TimestampField};
use crate::model::{StationStatus, StopTimes};
use crate::raw_types::RawStationData;

// Naive forms are local to the stop's zone.
const NAIVE_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Maps the provider's single-letter zone codes to IANA zones. Full IANA
/// names pass through. `None` means the zone is unknown.
pub fn zone_for(code: &str) -> Option<Tz> {
    let code = code.trim();
    let tz = match code.to_ascii_uppercase().as_str() {
        "E" => Tz::America__New_York,
        "C" => Tz::America__Chicago,
        "M" => Tz::America__Denver,
        "P" => Tz::America__Los_Angeles,
        "A" => Tz::America__Anchorage,
        "H" => Tz::Pacific__Honolulu,
        _ => return code.parse::<Tz>().ok(),
    };
    Some(tz)
}

/// Parses one timestamp field into the stop's zone. Blank values are absent.
pub fn parse_timestamp(
    field: TimestampField,
    value: Option<&str>,
    tz: Tz,
) -> Result<Option<DateTime<FixedOffset>>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let invalid = || Error::InvalidTimestamp {
        field,
        value: value.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.with_timezone(&tz).fixed_offset()));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(invalid)?;

    // Ambiguous wall times (DST fall-back) resolve to the later instant,
    // nonexistent ones (spring-forward gap) are rejected.
    tz.from_local_datetime(&naive)
        .latest()
        .map(|dt| Some(dt.fixed_offset()))
        .ok_or_else(invalid)
}

/// Priority order: actual departure, actual arrival, any estimate, schedule.
pub fn derive_status(times: &StopTimes) -> StationStatus {
    if times.departure_actual.is_some() {
        StationStatus::Departed
    } else if times.arrival_actual.is_some() {
        StationStatus::Arrived
    } else if times.arrival_estimated.is_some() || times.departure_estimated.is_some() {
        StationStatus::Enroute
    } else {
        StationStatus::Scheduled
    }
}

/// Result of deriving one stop. `rejected` lists the fields that were
/// present but unparseable; those fields are absent from `times`.
#[derive(Debug)]
pub struct DerivedStop {
    pub times: StopTimes,
    pub status: StationStatus,
    pub rejected: Vec<Error>,
}

pub fn derive_stop(raw: &RawStationData, tz: Tz) -> DerivedStop {
    let mut rejected = Vec::new();
    let mut take = |field: TimestampField, value: &Option<String>| {
        parse_timestamp(field, value.as_deref(), tz).unwrap_or_else(|e| {
            rejected.push(e);
            None
        })
    };

    let times = StopTimes {
        arrival_actual: take(TimestampField::ArrivalActual, &raw.postarr),
        arrival_estimated: take(TimestampField::ArrivalEstimated, &raw.estarr),
        arrival_scheduled: take(TimestampField::ArrivalScheduled, &raw.scharr),
        departure_actual: take(TimestampField::DepartureActual, &raw.postdep),
        departure_estimated: take(TimestampField::DepartureEstimated, &raw.estdep),
        departure_scheduled: take(TimestampField::DepartureScheduled, &raw.schdep),
    };

    // A bad field pins the status to scheduled. The fields that did parse are
    // kept, so known flags and lateness still reflect them.
    let status = if rejected.is_empty() {
        derive_status(&times)
    } else {
        StationStatus::Scheduled
    };

    DerivedStop {
        times,
        status,
        rejected,
    }
}

/// Lateness of one stop. `None` on a leg means on time, early, or unknown;
/// it serializes as `false`.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Delay {
    #[serde(serialize_with = "string_or_false")]
    pub arrival: Option<String>,
    #[serde(serialize_with = "string_or_false")]
    pub departure: Option<String>,
}

fn string_or_false<S>(value: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_bool(false),
    }
}

pub fn compute_delay(times: &StopTimes) -> Delay {
    Delay {
        arrival: lateness(times.arrival_best(), times.arrival_scheduled),
        departure: lateness(times.departure_best(), times.departure_scheduled),
    }
}

/// Whole minutes late, or `None` when either side is missing or the train
/// is not at least one minute behind.
pub fn lateness(
    best: Option<DateTime<FixedOffset>>,
    scheduled: Option<DateTime<FixedOffset>>,
) -> Option<String> {
    let minutes = (best? - scheduled?).num_minutes();
    (minutes > 0).then(|| format_lateness(minutes))
}

fn format_lateness(minutes: i64) -> String {
    let (hours, rest) = (minutes / 60, minutes % 60);
    match (hours, rest) {
        (0, m) => format!("{m} min late"),
        (h, 0) => format!("{h} hr late"),
        (h, m) => format!("{h} hr {m} min late"),
    }
}
