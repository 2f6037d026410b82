use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use railstatus::config::Config;
use railstatus::decoder::{Decoder, EnvelopeCipher, KeyStore, PayloadDecoder};
use railstatus::emit::write_site;
use railstatus::fetch::{Fetch, HttpFetcher};
use railstatus::pipeline::Pipeline;

fn init_logger() {
    let default_level = LevelFilter::INFO;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|err| {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            eprintln!(
                "invalid {}, falling back to level '{}' - {}",
                EnvFilter::DEFAULT_ENV,
                default_level,
                err,
            );
        }
        EnvFilter::new(default_level.to_string())
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let config = Config::from_env()?;
    info!("writing site to {}", config.out_dir.display());

    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let decoder = Decoder::new(
        fetcher.clone(),
        KeyStore::new(config.key_source.clone()),
        EnvelopeCipher::default(),
    );
    let pipeline = Pipeline::new(
        fetcher,
        decoder,
        &config.stations_url,
        &config.trains_url,
        config.fetch_timeout,
        &config.base_url,
    );

    // Optional preview server over the emitted files.
    let server = config.port.map(|port| {
        let files = warp::fs::dir(config.out_dir.clone());
        info!("Server running at http://localhost:{}", port);
        tokio::spawn(warp::serve(files).run(([0, 0, 0, 0], port)))
    });

    match config.refresh {
        None => {
            regenerate(&pipeline, &config.out_dir).await?;
            if let Some(server) = server {
                server.await.context("server task failed")?;
            }
        }
        Some(period) => loop {
            if let Err(e) = regenerate(&pipeline, &config.out_dir).await {
                // The previous site stays in place until a run succeeds.
                error!("{:#}", e);
            }
            tokio::time::sleep(period).await;
        },
    }

    Ok(())
}

async fn regenerate<F: Fetch, D: PayloadDecoder>(
    pipeline: &Pipeline<F, D>,
    out_dir: &Path,
) -> Result<()> {
    let started = Instant::now();
    let output = pipeline
        .run(Utc::now())
        .await
        .context("site generation failed")?;
    let files = write_site(&output.site, out_dir)
        .with_context(|| format!("writing site to {}", out_dir.display()))?;
    info!(
        "regenerated {} trains ({} files) in {:?}",
        output.trains,
        files,
        started.elapsed()
    );
    Ok(())
}
