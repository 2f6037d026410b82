use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::decoder::KeySource;

const STATIONS_URL: &str = "https://maps.amtrak.com/services/MapDataService/stations/trainStations";
const TRAINS_URL: &str = "https://maps.amtrak.com/services/MapDataService/trains/getTrainsData";
const ROUTES_LIST_URL: &str = "https://maps.amtrak.com/rttl/js/RoutesList.json";
const ROUTES_LIST_V_URL: &str = "https://maps.amtrak.com/rttl/js/RoutesList.v.json";

#[derive(Clone, Debug)]
pub struct Config {
    pub stations_url: String,
    pub trains_url: String,
    pub key_source: KeySource,
    pub out_dir: PathBuf,
    pub base_url: String,
    pub fetch_timeout: Duration,
    /// `None` runs once and exits.
    pub refresh: Option<Duration>,
    /// Serve `out_dir` over HTTP when set.
    pub port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let fetch_timeout: u64 = or("RAILSTATUS_FETCH_TIMEOUT_SECS", "30")
            .parse()
            .context("Invalid RAILSTATUS_FETCH_TIMEOUT_SECS")?;
        let refresh: u64 = or("RAILSTATUS_REFRESH_SECS", "0")
            .parse()
            .context("Invalid RAILSTATUS_REFRESH_SECS")?;
        let port = get("PORT")
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("Invalid PORT env variable")?;

        Ok(Self {
            stations_url: or("RAILSTATUS_STATIONS_URL", STATIONS_URL),
            trains_url: or("RAILSTATUS_TRAINS_URL", TRAINS_URL),
            key_source: KeySource {
                routes_list_url: or("RAILSTATUS_ROUTES_LIST_URL", ROUTES_LIST_URL),
                key_list_url: or("RAILSTATUS_ROUTES_LIST_V_URL", ROUTES_LIST_V_URL),
            },
            out_dir: PathBuf::from(or("RAILSTATUS_OUT_DIR", "./site")),
            base_url: or("RAILSTATUS_BASE_URL", "/"),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            refresh: (refresh > 0).then(|| Duration::from_secs(refresh)),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_run_once_without_server() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.refresh, None);
        assert_eq!(config.port, None);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.out_dir, PathBuf::from("./site"));
        assert_eq!(config.trains_url, TRAINS_URL);
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("RAILSTATUS_REFRESH_SECS", "180"),
            ("PORT", "8080"),
            ("RAILSTATUS_BASE_URL", "https://trains.example/"),
        ]))
        .unwrap();
        assert_eq!(config.refresh, Some(Duration::from_secs(180)));
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.base_url, "https://trains.example/");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RAILSTATUS_FETCH_TIMEOUT_SECS", "-1")])).is_err());
    }
}
