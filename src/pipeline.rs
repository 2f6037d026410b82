use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::decoder::PayloadDecoder;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::model::{Route, group_routes};
use crate::site::{Site, SiteBuilder};
use crate::stations::normalize_stations;
use crate::trains::normalize_trains;

pub struct RunOutput {
    pub site: Site,
    pub stations: usize,
    pub trains: usize,
}

/// Fetch, decode, normalize, derive and build, for one run at a time.
pub struct Pipeline<F, D> {
    fetcher: Arc<F>,
    decoder: D,
    stations_url: String,
    trains_url: String,
    timeout: Duration,
    builder: SiteBuilder,
}

impl<F: Fetch, D: PayloadDecoder> Pipeline<F, D> {
    pub fn new(
        fetcher: Arc<F>,
        decoder: D,
        stations_url: &str,
        trains_url: &str,
        timeout: Duration,
        base_url: &str,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            stations_url: stations_url.to_string(),
            trains_url: trains_url.to_string(),
            timeout,
            builder: SiteBuilder::new(base_url),
        }
    }

    /// Key material and both bodies are fetched concurrently; nothing is
    /// normalized until both bodies have been decoded. Giving up on the
    /// timeout drops everything fetched so far.
    pub async fn fetch_routes(&self) -> Result<(Vec<Route>, usize)> {
        let decoded = async {
            let ((), stations_body, trains_body) = tokio::try_join!(
                self.decoder.prepare(),
                self.fetcher.fetch(&self.stations_url),
                self.fetcher.fetch(&self.trains_url),
            )?;
            let decoded = tokio::try_join!(
                self.decoder.decode(&stations_body),
                self.decoder.decode(&trains_body),
            )?;
            Ok::<_, Error>(decoded)
        };

        let (stations, trains) = tokio::time::timeout(self.timeout, decoded)
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let stations = normalize_stations(stations)?;
        let trains = normalize_trains(trains, &stations)?;
        Ok((group_routes(trains), stations.len()))
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunOutput> {
        let (routes, stations) = self.fetch_routes().await?;
        let trains = routes.iter().map(|r| r.trains.len()).sum();
        let site = self.builder.build(&routes, now);
        info!(
            "built site: {} stations, {} trains, {} routes",
            stations,
            trains,
            routes.len()
        );
        Ok(RunOutput {
            site,
            stations,
            trains,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Decoder, EnvelopeCipher, KeyMaterial, KeySource, KeyStore, PlainDecoder};
    use crate::fetch::testing::StaticFetcher;
    use crate::model::StationStatus;
    use chrono::TimeZone;
    use serde_json::json;

    const STATIONS: &str = "https://feed.test/stations";
    const TRAINS: &str = "https://feed.test/trains";

    fn stations_doc() -> serde_json::Value {
        json!({"StationsDataResponse": {"features": [
            {"properties": {"Code": "NYP", "StationName": "New York Penn", "lat": 40.75, "lon": -73.99}},
            {"properties": {"Code": "WAS", "StationName": "Washington Union", "lat": 38.89, "lon": -77.0}},
        ]}})
    }

    fn trains_doc() -> serde_json::Value {
        let stop = |v: serde_json::Value| serde_json::Value::String(v.to_string());
        json!({"features": [{"properties": {
            "ID": 5501, "TrainNum": "2150", "RouteName": "Acela", "Heading": "S",
            "Station2": stop(json!({"code": "WAS", "tz": "E", "scharr": "10/19/2026 08:55:00", "estarr": "10/19/2026 09:03:00"})),
            "Station1": stop(json!({"code": "NYP", "tz": "E", "schdep": "10/19/2026 06:00:00", "postdep": "10/19/2026 06:01:00"})),
        }}]})
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 30, 0).unwrap()
    }

    fn pipeline<D: PayloadDecoder>(fetcher: Arc<StaticFetcher>, decoder: D) -> Pipeline<StaticFetcher, D> {
        Pipeline::new(fetcher, decoder, STATIONS, TRAINS, Duration::from_secs(5), "/")
    }

    #[tokio::test]
    async fn plain_feed_end_to_end() {
        let fetcher = Arc::new(
            StaticFetcher::default()
                .with(STATIONS, stations_doc().to_string())
                .with(TRAINS, trains_doc().to_string()),
        );
        let out = pipeline(fetcher, PlainDecoder).run(now()).await.unwrap();

        assert_eq!(out.stations, 2);
        assert_eq!(out.trains, 1);
        let train = &out.site.routes[0].trains[0];
        assert_eq!(train.from, "New York Penn");
        assert_eq!(train.to, "Washington Union");
        assert_eq!(train.stations[0].stop.status, StationStatus::Departed);
        assert_eq!(train.stations[1].stop.status, StationStatus::Enroute);
        assert_eq!(train.stations[1].delay.arrival.as_deref(), Some("8 min late"));
        assert_eq!(train.info, "Next stop: Washington Union, 8 min late");
    }

    #[tokio::test]
    async fn encrypted_feed_end_to_end() {
        let keys = KeyMaterial {
            public_key: "public".into(),
            salt: vec![1, 2, 3, 4],
            iv: vec![7; 16],
        };
        let cipher = EnvelopeCipher::default();
        let seal = |doc: serde_json::Value| {
            cipher
                .seal(doc.to_string().as_bytes(), "private", &keys)
                .unwrap()
        };

        let fetcher = Arc::new(
            StaticFetcher::default()
                .with(STATIONS, seal(stations_doc()))
                .with(TRAINS, seal(trains_doc())),
        );
        let source = KeySource {
            routes_list_url: "unused".into(),
            key_list_url: "unused".into(),
        };
        let decoder = Decoder::new(
            fetcher.clone(),
            KeyStore::with_material(source, keys.clone()),
            cipher.clone(),
        );

        let out = pipeline(fetcher, decoder).run(now()).await.unwrap();
        assert_eq!(out.site.routes[0].name, "Acela");
        assert_eq!(out.site.routes[0].trains[0].number, 2150);
    }

    #[tokio::test]
    async fn upstream_error_aborts_the_run() {
        let fetcher = Arc::new(
            StaticFetcher::default()
                .with(
                    STATIONS,
                    json!({"StationsDataResponse": {"error": {"message": "maintenance"}}}).to_string(),
                )
                .with(TRAINS, trains_doc().to_string()),
        );
        let res = pipeline(fetcher, PlainDecoder).run(now()).await;
        assert!(matches!(res, Err(Error::Upstream(msg)) if msg == "maintenance"));
    }

    #[tokio::test]
    async fn missing_body_aborts_the_run() {
        let fetcher = Arc::new(StaticFetcher::default().with(STATIONS, stations_doc().to_string()));
        let res = pipeline(fetcher, PlainDecoder).run(now()).await;
        assert!(matches!(res, Err(Error::Fetch { url, .. }) if url == TRAINS));
    }

    struct StalledFetcher;

    impl Fetch for StalledFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_upstream_times_out() {
        let pipeline = Pipeline::new(
            Arc::new(StalledFetcher),
            PlainDecoder,
            STATIONS,
            TRAINS,
            Duration::from_secs(30),
            "/",
        );
        let res = pipeline.run(now()).await;
        assert!(matches!(res, Err(Error::Timeout(d)) if d == Duration::from_secs(30)));
    }
}
