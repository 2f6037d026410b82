use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// The only network seam: URL in, response body out.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Fetch {
                url: String::new(),
                reason: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let failed = |e: reqwest::Error| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?
            .text()
            .await
            .map_err(failed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies and counts requests per URL.
    #[derive(Default)]
    pub struct StaticFetcher {
        bodies: Mutex<HashMap<String, String>>,
        hits: Mutex<HashMap<String, usize>>,
    }

    impl StaticFetcher {
        pub fn with(self, url: &str, body: impl Into<String>) -> Self {
            self.set(url, body);
            self
        }

        pub fn set(&self, url: &str, body: impl Into<String>) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.into());
        }

        pub fn hits(&self, url: &str) -> usize {
            self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl Fetch for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Fetch {
                    url: url.to_string(),
                    reason: "404 Not Found".to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use warp::Filter;
    use warp::http::StatusCode;

    fn serve_status(status: StatusCode) -> SocketAddr {
        let route = warp::any().map(move || warp::reply::with_status("upstream says no", status));
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn server_error_is_a_fetch_error() {
        let addr = serve_status(StatusCode::INTERNAL_SERVER_ERROR);
        let url = format!("http://{addr}/trains");

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let res = fetcher.fetch(&url).await;

        match res {
            Err(Error::Fetch { url: failed, reason }) => {
                assert_eq!(failed, url);
                assert!(reason.contains("500"), "{reason}");
            }
            other => panic!("expected a fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_returns_the_body() {
        let addr = serve_status(StatusCode::OK);
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let body = fetcher.fetch(&format!("http://{addr}/stations")).await.unwrap();
        assert_eq!(body, "upstream says no");
    }
}
