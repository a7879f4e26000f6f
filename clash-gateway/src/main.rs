//! # SoundClash Battle Gateway (clash-gateway)
//!
//! Stateful HTTP gateway for text-to-music A/B evaluation: prompt
//! moderation and routing, weighted pair sampling, parallel worker
//! generation with retries, artifact and metadata persistence, and vote
//! reconciliation. Audio synthesis, ranking, and the browser UI are
//! external collaborators.

use anyhow::{bail, Context, Result};
use clap::Parser;
use clash_common::chat::resolve_backend;
use clash_common::registry::load_registry;
use clash_common::salt::UserSalt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clash_gateway::bucket::{Bucket, LocalBucket, RemoteBucket};
use clash_gateway::cache::BattleCache;
use clash_gateway::config::{parse_systems_spec, parse_weights_spec, resolve_catalog};
use clash_gateway::generator::{gateway_version, BattleGenerator};
use clash_gateway::probe::FfprobeProbe;
use clash_gateway::state::{load_prebaked, AppState};
use clash_gateway::worker::WorkerClient;
use clash_gateway::api;

#[derive(Parser, Debug)]
#[command(name = "clash-gateway")]
#[command(about = "SoundClash battle gateway - A/B evaluation for text-to-music systems")]
#[command(version)]
struct Args {
    /// Systems to serve: tag:variant[:port] entries, comma separated
    #[arg(long, env = "SOUNDCLASH_SYSTEMS")]
    systems: String,

    /// Pair weights: a:b/c:d/weight entries, comma separated.
    /// Default: all combinations, equal weight.
    #[arg(long, env = "SOUNDCLASH_WEIGHTS")]
    weights: Option<String>,

    /// URL prefix for workers; the per-system port is appended
    #[arg(long, default_value = "http://localhost", env = "SOUNDCLASH_SYSTEMS_BASE_URL")]
    systems_base_url: String,

    /// Remote object-store endpoint; required when a remote bucket is named
    #[arg(long, env = "SOUNDCLASH_BUCKET_ENDPOINT")]
    bucket_endpoint: Option<String>,

    /// Remote audio bucket name; empty for the local filesystem adapter
    #[arg(long, env = "SOUNDCLASH_BUCKET_AUDIO")]
    bucket_audio: Option<String>,

    /// Remote metadata bucket name; empty for the local filesystem adapter
    #[arg(long, env = "SOUNDCLASH_BUCKET_METADATA")]
    bucket_metadata: Option<String>,

    /// Public URL prefix for artifacts stored by the local adapter
    /// (served by an external file server, not by this process)
    #[arg(long, env = "SOUNDCLASH_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Chat backend selector for moderation and routing
    #[arg(long, default_value = "gpt4o-v0", env = "SOUNDCLASH_ROUTE_CONFIG")]
    route_config: String,

    /// Fraction of requests to fail synthetically (chaos testing)
    #[arg(long, default_value_t = 0.0, env = "SOUNDCLASH_FLAKINESS")]
    flakiness: f64,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// System registry TOML file
    #[arg(long, default_value = "registry.toml", env = "SOUNDCLASH_REGISTRY")]
    registry: PathBuf,

    /// Prebaked prompt JSON file (absent file means an empty map)
    #[arg(long, default_value = "prebaked.json", env = "SOUNDCLASH_PREBAKED")]
    prebaked: PathBuf,

    /// Root directory for the local bucket adapter
    #[arg(long, default_value = "clash-data", env = "SOUNDCLASH_DATA_DIR")]
    data_dir: PathBuf,

    /// Battle cache capacity; 0 means unbounded
    #[arg(long, default_value_t = 0, env = "SOUNDCLASH_BATTLE_CACHE_SIZE")]
    battle_cache_size: usize,

    /// Extra generate attempts per worker after the first
    #[arg(long, default_value_t = 1, env = "SOUNDCLASH_NUM_RETRIES")]
    num_retries: u32,
}

fn build_bucket(
    name: &Option<String>,
    endpoint: &Option<String>,
    local_root: PathBuf,
    public_base_url: Option<String>,
) -> Result<Bucket> {
    match name {
        Some(bucket_name) => {
            let endpoint = endpoint
                .as_ref()
                .context("--bucket-endpoint is required when a remote bucket is named")?;
            Ok(Bucket::Remote(
                RemoteBucket::from_env(endpoint.clone(), bucket_name.clone())
                    .map_err(|e| anyhow::anyhow!("remote bucket: {}", e))?,
            ))
        }
        None => Ok(Bucket::Local(
            LocalBucket::new(local_root, public_base_url).context("local bucket root")?,
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clash_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    info!(
        version = %gateway_version(),
        built = env!("BUILD_TIMESTAMP"),
        "starting SoundClash battle gateway"
    );

    if !(0.0..=1.0).contains(&args.flakiness) {
        bail!("flakiness must be in [0, 1], got {}", args.flakiness);
    }

    let (systems, port_overrides) = parse_systems_spec(&args.systems)?;
    info!(count = systems.len(), "configured systems");

    let weights = args
        .weights
        .as_deref()
        .map(parse_weights_spec)
        .transpose()?;

    let registry = load_registry(&args.registry)?;
    let (catalog, ports) = resolve_catalog(&registry, &systems, &port_overrides)?;
    let catalog = Arc::new(catalog);

    let salt = Arc::new(UserSalt::from_env_or_random());

    let worker = WorkerClient::new(
        args.systems_base_url.clone(),
        ports,
        args.num_retries,
        Arc::new(FfprobeProbe::default()),
    )?;

    let chat = resolve_backend(&args.route_config)?;
    info!(route_config = %args.route_config, "chat backend ready");

    let generator = Arc::new(BattleGenerator::new(
        Arc::clone(&catalog),
        weights,
        worker,
        chat,
    )?);

    let public = |suffix: &str| {
        args.public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), suffix))
    };
    let bucket_audio = build_bucket(
        &args.bucket_audio,
        &args.bucket_endpoint,
        args.data_dir.join("audio"),
        public("audio"),
    )?;
    let bucket_metadata = build_bucket(
        &args.bucket_metadata,
        &args.bucket_endpoint,
        args.data_dir.join("metadata"),
        public("metadata"),
    )?;

    let prebaked = Arc::new(load_prebaked(&args.prebaked)?);

    let state = AppState {
        generator,
        bucket_audio: Arc::new(bucket_audio),
        bucket_metadata: Arc::new(bucket_metadata),
        battles: Arc::new(Mutex::new(BattleCache::new(args.battle_cache_size))),
        prebaked,
        salt,
        flakiness: args.flakiness,
    };

    api::run(&args.host, args.port, state).await?;

    info!("SoundClash battle gateway shutting down");
    Ok(())
}
