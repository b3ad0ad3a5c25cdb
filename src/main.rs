// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;

use placematch_lib::orchestrator::{MatchJob, MatchRunner};
use placematch_lib::search::EsSearchClient;
use placematch_lib::{MatcherConfig, PlaceType, SearchBackendConfig};

fn parse_jobs(args: &[String]) -> Result<Vec<MatchJob>> {
    if args.is_empty() || args.len() % 3 != 0 {
        bail!(
            "Usage: placematch <place_type> <input.ndjson> <output.ndjson> [...]\n\
             place_type is one of: high_school, university, company.\n\
             Repeat the triple to run several jobs in one process."
        );
    }

    args.chunks(3)
        .map(|triple| {
            let place_type = PlaceType::parse(&triple[0])
                .with_context(|| format!("Unknown place type {:?}", triple[0]))?;
            Ok(MatchJob {
                place_type,
                input: PathBuf::from(&triple[1]),
                output: PathBuf::from(&triple[2]),
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let jobs = parse_jobs(&std::env::args().skip(1).collect::<Vec<_>>())?;

    let config = MatcherConfig::from_env().context("Invalid matcher configuration")?;
    let backend = SearchBackendConfig::from_env().context("Invalid backend configuration")?;
    info!(
        "Matching against {} (index {}), chunk={} batch={} pool={}",
        backend.base_url, backend.index, config.chunk_size, config.batch_size, config.pool_size
    );

    let client = Arc::new(EsSearchClient::new(&backend)?);
    let runner = MatchRunner::new(config, client);
    let stats = runner.run_jobs(&jobs).await?;

    info!("All jobs complete: {}", stats);
    Ok(())
}
