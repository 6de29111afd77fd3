use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap_verbosity_flag::InfoLevel;

use attic_core::Partition;
use attic_server::auth::Auth;
use attic_server::config::{FileConfig, ServerConfig};
use attic_server::{AppState, server};
use attic_store_local::{LocalStore, LocalStoreConfig};

#[derive(Parser)]
#[command(version, about = "attic content-addressed blob server", long_about = None)]
struct Cli {
    /// Listen address
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:3179")]
    listen: String,

    /// Blob store root directory
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Queue partition to fan uploads out to (repeatable)
    #[arg(long = "queue", value_name = "NAME")]
    queues: Vec<String>,

    /// Owner credentials: "userpass:<user>:<pass>" or "token:<value>".
    /// Falls back to CAMLI_AUTH / CAMLI_PASSWORD.
    #[arg(long, value_name = "SPEC")]
    auth: Option<String>,

    /// TOML config file; flags take precedence over its fields
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.tracing_level_filter())
        .init();

    let file: FileConfig = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).context("could not parse config file")?
        }
        None => FileConfig::default(),
    };

    let auth = match cli.auth.as_deref().or(file.auth.as_deref()) {
        Some(spec) => Auth::parse(spec)?,
        None => Auth::from_env()?
            .context("no owner credentials configured (--auth, config file or CAMLI_AUTH)")?,
    };

    let root = cli
        .root
        .clone()
        .or_else(|| file.store.as_ref().map(|s| PathBuf::from(&s.root)))
        .context("no blob root configured (--root or config file)")?;
    let mut queue_partitions: Vec<Partition> = cli
        .queues
        .iter()
        .map(|name| Partition::parse(name))
        .collect::<Result<_, _>>()?;
    if queue_partitions.is_empty()
        && let Some(store) = &file.store
    {
        queue_partitions = store.queue_partitions.clone();
    }

    let storage = LocalStore::create(LocalStoreConfig {
        base_path: root.to_string_lossy().into_owned(),
        queue_partitions,
    })?;

    let mut config = ServerConfig::default();
    if let Some(max) = file.max_upload_size {
        config.max_upload_size = max;
    }

    let listen = match (cli.listen.as_str(), &file.listen) {
        // the flag default only yields when the file names an address
        ("0.0.0.0:3179", Some(addr)) => addr.clone(),
        (flag, _) => flag.to_owned(),
    };

    let state = AppState::new(Arc::new(storage), auth, config);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    server::serve(state, listener).await
}
