//! View model for the static site. Everything here is a pure projection of
//! normalized routes; the only clock input is the `now` handed to
//! [`SiteBuilder::build`].

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::model::{Route, RouteStation, StationStatus, Train};
use crate::status::{Delay, compute_delay};

const TRAVELED: &str = "#2e7d32";
const UPCOMING: &str = "#b0bec5";
const BUS_DOT: &str = "#6a1b9a";

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Tag {
    pub text: String,
    pub bg: String,
    pub color: String,
}

impl Tag {
    fn new(text: impl Into<String>, bg: &str, color: &str) -> Self {
        Self {
            text: text.into(),
            bg: bg.to_string(),
            color: color.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SpacerColors {
    pub before: String,
    pub after: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteStation {
    #[serde(flatten)]
    pub stop: RouteStation,
    pub name: String,
    pub arrival_known: bool,
    pub departure_known: bool,
    pub delay: Delay,
    pub tag: Tag,
    pub dot_color: String,
    pub spacer_colors: SpacerColors,
    pub arrival: String,
    pub departure: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Where a whole run stands, as opposed to a single stop.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum TrainProgress {
    Predeparture,
    Active,
    Complete,
}

impl TrainProgress {
    fn of(train: &Train) -> Self {
        match train.stations.last() {
            Some(last) if last.status.reached() => TrainProgress::Complete,
            _ if train.stations.iter().any(|s| s.status.reached()) => TrainProgress::Active,
            _ => TrainProgress::Predeparture,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TrainProgress::Predeparture => "Predeparture",
            TrainProgress::Active => "Active",
            TrainProgress::Complete => "Complete",
        }
    }

    fn track_color(&self) -> &'static str {
        match self {
            TrainProgress::Predeparture => UPCOMING,
            TrainProgress::Active => TRAVELED,
            TrainProgress::Complete => "#455a64",
        }
    }

    fn tag(&self) -> Tag {
        match self {
            TrainProgress::Predeparture => Tag::new(self.label(), "#eceff1", "#37474f"),
            TrainProgress::Active => Tag::new(self.label(), "#e8f5e9", "#1b5e20"),
            TrainProgress::Complete => Tag::new(self.label(), "#cfd8dc", "#263238"),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteTrain {
    pub id: String,
    pub route: String,
    pub number: u32,
    pub heading: String,
    pub filepath: String,
    pub url: String,
    pub info: String,
    pub status: String,
    pub track_color: String,
    pub tag: Tag,
    pub stations: Vec<SiteStation>,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SiteRoute {
    pub name: String,
    pub filepath: String,
    pub url: String,
    pub trains: Vec<SiteTrain>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct IndexTrain {
    pub number: u32,
    pub url: String,
    pub status: String,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct IndexRoute {
    pub name: String,
    pub url: String,
    pub trains: Vec<IndexTrain>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteIndex {
    pub generated_at: DateTime<Utc>,
    pub routes: Vec<IndexRoute>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub index: SiteIndex,
    pub routes: Vec<SiteRoute>,
}

pub struct SiteBuilder {
    base_url: String,
}

impl SiteBuilder {
    pub fn new(base_url: &str) -> Self {
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }

    pub fn build(&self, routes: &[Route], now: DateTime<Utc>) -> Site {
        let mut taken = HashSet::new();
        let routes: Vec<SiteRoute> = routes
            .iter()
            .map(|r| {
                let slug = claim(&mut taken, slugify(&r.route, "unnamed-route"));
                self.site_route(r, &slug)
            })
            .collect();

        let index = SiteIndex {
            generated_at: now,
            routes: routes
                .iter()
                .map(|route| IndexRoute {
                    name: route.name.clone(),
                    url: route.url.clone(),
                    trains: route
                        .trains
                        .iter()
                        .map(|t| IndexTrain {
                            number: t.number,
                            url: t.url.clone(),
                            status: t.status.clone(),
                            from: t.from.clone(),
                            to: t.to.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };

        Site { index, routes }
    }

    fn site_route(&self, route: &Route, slug: &str) -> SiteRoute {
        let mut taken = HashSet::new();
        SiteRoute {
            name: route.route.clone(),
            filepath: format!("{slug}/index.json"),
            url: format!("{}{slug}", self.base_url),
            trains: route
                .trains
                .iter()
                .map(|t| {
                    let name = claim(&mut taken, format!("{}-{}", t.number, slugify(&t.id, "train")));
                    self.site_train(slug, &name, t)
                })
                .collect(),
        }
    }

    fn site_train(&self, route_slug: &str, name: &str, train: &Train) -> SiteTrain {
        let stations: Vec<SiteStation> = train.stations.iter().map(site_station).collect();
        let progress = TrainProgress::of(train);
        let path = format!("{route_slug}/{name}");

        SiteTrain {
            id: train.id.to_string(),
            route: train.route.clone(),
            number: train.number,
            heading: train.heading.clone(),
            filepath: format!("{path}.json"),
            url: format!("{}{path}", self.base_url),
            info: train_info(progress, &stations),
            status: progress.label().to_string(),
            track_color: progress.track_color().to_string(),
            tag: progress.tag(),
            from: stations.first().map(|s| s.name.clone()).unwrap_or_default(),
            to: stations.last().map(|s| s.name.clone()).unwrap_or_default(),
            stations,
        }
    }
}

pub fn site_station(stop: &RouteStation) -> SiteStation {
    let times = &stop.times;
    let name = stop
        .station
        .as_ref()
        .map(|meta| meta.name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| stop.code.to_string());

    SiteStation {
        name,
        arrival_known: times.arrival_best().is_some(),
        departure_known: times.departure_best().is_some(),
        delay: compute_delay(times),
        tag: station_tag(stop.status, stop.bus),
        dot_color: dot_color(stop.status, stop.bus).to_string(),
        spacer_colors: spacer_colors(stop.status),
        arrival: display_time(times.arrival_best().or(times.arrival_scheduled)),
        departure: display_time(times.departure_best().or(times.departure_scheduled)),
        info: stop.bus.then(|| "Bus connection".to_string()),
        stop: stop.clone(),
    }
}

fn station_tag(status: StationStatus, bus: bool) -> Tag {
    if bus {
        return Tag::new(format!("{} (bus)", status.label()), "#ede7f6", "#4527a0");
    }
    match status {
        StationStatus::Scheduled => Tag::new(status.label(), "#eceff1", "#37474f"),
        StationStatus::Enroute => Tag::new(status.label(), "#fff8e1", "#8d6e00"),
        StationStatus::Arrived => Tag::new(status.label(), "#e3f2fd", "#0d47a1"),
        StationStatus::Departed => Tag::new(status.label(), "#e8f5e9", "#1b5e20"),
    }
}

fn dot_color(status: StationStatus, bus: bool) -> &'static str {
    if bus {
        return BUS_DOT;
    }
    match status {
        StationStatus::Scheduled => UPCOMING,
        StationStatus::Enroute => "#f9a825",
        StationStatus::Arrived => "#1565c0",
        StationStatus::Departed => TRAVELED,
    }
}

/// The segment into a stop is done once the train is there; the segment out
/// of it only once the train has left.
fn spacer_colors(status: StationStatus) -> SpacerColors {
    let color = |done: bool| (if done { TRAVELED } else { UPCOMING }).to_string();
    SpacerColors {
        before: color(status.reached()),
        after: color(status == StationStatus::Departed),
    }
}

fn display_time(time: Option<DateTime<FixedOffset>>) -> String {
    time.map(|t| t.format("%-I:%M %p").to_string())
        .unwrap_or_default()
}

fn train_info(progress: TrainProgress, stations: &[SiteStation]) -> String {
    match progress {
        TrainProgress::Complete => match stations.last() {
            Some(last) => format!("Arrived at {}", last.name),
            None => String::new(),
        },
        TrainProgress::Predeparture => match stations.first() {
            Some(first) if !first.departure.is_empty() => {
                format!("Departs {} at {}", first.name, first.departure)
            }
            Some(first) => format!("Departs {}", first.name),
            None => "No stops reported".to_string(),
        },
        TrainProgress::Active => {
            let last_reached = stations
                .iter()
                .rposition(|s| s.stop.status.reached())
                .unwrap_or(0);
            match stations[last_reached..].iter().find(|s| !s.stop.status.reached()) {
                Some(next) => match &next.delay.arrival {
                    Some(late) => format!("Next stop: {}, {}", next.name, late),
                    None => format!("Next stop: {}", next.name),
                },
                None => String::new(),
            }
        }
    }
}

/// Returns `slug`, or the first `slug-N` not yet taken, and marks it taken.
fn claim(taken: &mut HashSet<String>, slug: String) -> String {
    let mut candidate = slug.clone();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{slug}-{n}");
        n += 1;
    }
    candidate
}

/// Lowercase ASCII alphanumerics separated by single dashes.
fn slugify(text: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}
