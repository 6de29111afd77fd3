use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap_verbosity_flag::InfoLevel;
use tokio_util::sync::CancellationToken;

use attic_client::{ClientAuth, HttpStore, HttpStoreConfig};
use attic_core::Storage;
use attic_store_local::{LocalStore, LocalStoreConfig};
use attic_sync::stdout::StdoutSink;
use attic_sync::{SyncOpts, run};

#[derive(Parser)]
#[command(name = "attic-sync", version, about = "Synchronize blobs between two attic stores")]
struct Cli {
    /// Source store: a directory path or an http(s) blob-server URL
    #[arg(long, value_name = "URL|DIR")]
    src: String,

    /// Credentials for a remote source ("<pass>" or "<user>:<pass>")
    #[arg(long, value_name = "PASS")]
    srcpassword: Option<String>,

    /// Destination store: a directory path, an http(s) URL, or "stdout"
    #[arg(long, value_name = "URL|DIR|stdout")]
    dest: String,

    /// Credentials for a remote destination ("<pass>" or "<user>:<pass>")
    #[arg(long, value_name = "PASS")]
    destpassword: Option<String>,

    /// Keep running, draining the source continuously
    #[arg(long = "loop")]
    loop_forever: bool,

    /// Remove each blob from the source once stored downstream
    #[arg(long)]
    removesrc: bool,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(2),
            };
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.tracing_level_filter())
        .init();

    if cli.loop_forever && !cli.removesrc {
        eprintln!("error: --loop drains a queue and requires --removesrc");
        return ExitCode::from(2);
    }

    let src = match open_endpoint(&cli.src, cli.srcpassword.as_deref()) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("error: source {}: {err}", cli.src);
            return ExitCode::from(2);
        }
    };
    let dst: Arc<dyn Storage> = if cli.dest == "stdout" {
        Arc::new(StdoutSink)
    } else {
        match open_endpoint(&cli.dest, cli.destpassword.as_deref()) {
            Ok(store) => store,
            Err(err) => {
                eprintln!("error: destination {}: {err}", cli.dest);
                return ExitCode::from(2);
            }
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing in-flight copies");
                cancel.cancel();
            }
        });
    }

    let opts = SyncOpts {
        remove_source: cli.removesrc,
        ..SyncOpts::default()
    };
    match run(src, dst, opts, cli.loop_forever, cancel).await {
        Ok(stats) => {
            tracing::info!(
                copied = stats.blobs_copied,
                bytes = stats.bytes_copied,
                errors = stats.error_count,
                "sync finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "sync failed");
            ExitCode::from(1)
        }
    }
}

fn open_endpoint(spec: &str, password: Option<&str>) -> anyhow::Result<Arc<dyn Storage>> {
    if spec.starts_with("http://") || spec.starts_with("https://") {
        let auth = password.map(|p| match p.split_once(':') {
            Some((user, password)) => ClientAuth::UserPass {
                user: user.to_owned(),
                password: password.to_owned(),
            },
            None => ClientAuth::UserPass {
                user: String::new(),
                password: p.to_owned(),
            },
        });
        let store = HttpStore::create(HttpStoreConfig::new(spec, auth))?;
        Ok(Arc::new(store))
    } else {
        let store = LocalStore::create(LocalStoreConfig {
            base_path: spec.to_owned(),
            queue_partitions: Vec::new(),
        })?;
        Ok(Arc::new(store))
    }
}
