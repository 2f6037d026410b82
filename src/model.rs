use chrono::{DateTime, FixedOffset};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StationMetadata {
    pub code: CompactString,
    pub name: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "_raw")]
    pub raw: Value,
}

/// Station code -> metadata. Built once per run and only read afterwards.
pub type StationTable = HashMap<CompactString, StationMetadata>;

/// Travel state of one train at one stop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    #[default]
    Scheduled,
    Enroute,
    Arrived,
    Departed,
}

impl StationStatus {
    /// The train has physically reached this stop.
    pub fn reached(&self) -> bool {
        matches!(self, StationStatus::Arrived | StationStatus::Departed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StationStatus::Scheduled => "Scheduled",
            StationStatus::Enroute => "En Route",
            StationStatus::Arrived => "Arrived",
            StationStatus::Departed => "Departed",
        }
    }
}

/// Timestamps of one stop, all expressed in the stop's own UTC offset.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopTimes {
    pub arrival_actual: Option<DateTime<FixedOffset>>,
    pub arrival_estimated: Option<DateTime<FixedOffset>>,
    pub arrival_scheduled: Option<DateTime<FixedOffset>>,
    pub departure_actual: Option<DateTime<FixedOffset>>,
    pub departure_estimated: Option<DateTime<FixedOffset>>,
    pub departure_scheduled: Option<DateTime<FixedOffset>>,
}

impl StopTimes {
    pub fn arrival_best(&self) -> Option<DateTime<FixedOffset>> {
        self.arrival_actual.or(self.arrival_estimated)
    }

    pub fn departure_best(&self) -> Option<DateTime<FixedOffset>> {
        self.departure_actual.or(self.departure_estimated)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStation {
    pub code: CompactString,
    pub bus: bool,
    #[serde(flatten)]
    pub times: StopTimes,
    pub status: StationStatus,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<StationMetadata>,
    #[serde(rename = "_raw", skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Train {
    pub id: CompactString,
    pub heading: String,
    pub number: u32,
    pub route: String,
    pub stations: Vec<RouteStation>,
    #[serde(rename = "_raw")]
    pub raw: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub route: String,
    pub trains: Vec<Train>,
}

/// Groups trains by route name. Routes come out sorted by name and the trains
/// inside each by number, then id, so the grouping is stable across runs.
pub fn group_routes(trains: Vec<Train>) -> Vec<Route> {
    let mut by_name: std::collections::BTreeMap<String, Vec<Train>> = Default::default();
    for train in trains {
        by_name.entry(train.route.clone()).or_default().push(train);
    }

    by_name
        .into_iter()
        .map(|(route, mut trains)| {
            trains.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
            Route { route, trains }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train(id: &str, number: u32, route: &str) -> Train {
        Train {
            id: id.into(),
            heading: "N".into(),
            number,
            route: route.into(),
            stations: vec![],
            raw: Value::Null,
        }
    }

    #[test]
    fn routes_are_grouped_and_ordered() {
        let routes = group_routes(vec![
            train("3", 14, "Coast Starlight"),
            train("1", 5, "California Zephyr"),
            train("2", 11, "Coast Starlight"),
            train("4", 11, "Coast Starlight"),
        ]);

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].route, "California Zephyr");
        let ids: Vec<&str> = routes[1].trains.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4", "3"]);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StationStatus::Enroute).unwrap(),
            "\"enroute\""
        );
        assert!(StationStatus::Arrived.reached());
        assert!(!StationStatus::Enroute.reached());
    }

    #[test]
    fn route_station_flattens_times() {
        let stop = RouteStation {
            code: "SEA".into(),
            bus: false,
            times: StopTimes::default(),
            status: StationStatus::Scheduled,
            timezone: "America/Los_Angeles".into(),
            station: None,
            raw: None,
        };
        let json = serde_json::to_value(&stop).unwrap();
        assert!(json.get("arrivalActual").unwrap().is_null());
        assert!(json.get("station").is_none());
        assert_eq!(json["status"], "scheduled");
    }
}
