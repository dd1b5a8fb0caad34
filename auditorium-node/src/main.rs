// Auditorium node daemon: log, links, discovery for one precinct machine.

use std::sync::Arc;

use anyhow::Context;
use auditorium_core::{DirKeyStore, Expr};
use auditorium_node::{config, Host, HostError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("auditoriumd {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load().context("loading configuration")?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .context("parsing log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let keystore = Arc::new(DirKeyStore::new(cfg.keys_directory.clone()));
        let host = Host::start(cfg, keystore)
            .await
            .context("starting host")?;

        match host.discover().await {
            Ok(peers) => {
                for peer in peers {
                    if let Err(e) = host.join(&peer).await {
                        warn!(%peer, "join failed: {e}");
                    }
                }
            }
            Err(e) => warn!("discovery failed: {e}"),
        }

        let listener = host.clone();
        tokio::spawn(async move {
            loop {
                match listener.listen().await {
                    Ok(m) => info!(from = %m.from(), seq = m.sequence(), datum = %m.datum(), "delivered"),
                    Err(HostError::Released) => break,
                    Err(e) => warn!("listen: {e}"),
                }
            }
        });

        let announcer = host.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = announcer.announce(Expr::atom(line)) {
                    warn!("announce failed: {e}");
                    break;
                }
            }
        });

        shutdown_signal().await?;
        host.stop();
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
