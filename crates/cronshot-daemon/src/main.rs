use std::sync::Arc;

use clap::Parser;
use cronshot_core::config::CronshotConfig;
use cronshot_oneshot::Reaper;
use cronshot_scheduler::JobStore;
use tracing::{info, warn};

/// cronshotd - reaps parked one-shot jobs and prunes run history
#[derive(Parser, Debug)]
#[command(name = "cronshotd", version)]
struct Args {
    /// Config file (default ~/.cronshot/cronshot.toml)
    #[arg(long, env = "CRONSHOT_CONFIG")]
    config: Option<String>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,

    /// Only reap descriptors whose name matches this LIKE pattern
    #[arg(long)]
    pattern: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronshotd=info,cronshot_oneshot=info,cronshot_scheduler=info".into()
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = CronshotConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CronshotConfig::default()
    });
    if args.pattern.is_some() {
        config.reaper.name_pattern = args.pattern.clone();
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let store = JobStore::open(db_path)?;

    let reaper = Reaper::new(Arc::new(store), &config.reaper);

    if args.once {
        let report = reaper.sweep();
        info!(reaped = report.reaped, pruned = report.pruned, "sweep complete");
        return Ok(());
    }

    if let Some(pattern) = &config.reaper.name_pattern {
        info!(%pattern, "reaping only matching descriptors");
    } else {
        info!("reaping every parked descriptor");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");
    let _ = shutdown_tx.send(true);
    reaper_task.await?;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
