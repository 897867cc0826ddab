use crate::{
    admin,
    dispatch::{self, DispatchMetrics, EventSinks},
    eventual::{DeleteSessions, EventualConfig, EventualEventer, EventualMetrics},
    metrics,
    seed::Seed,
};
use anyhow::{bail, Result};
use clap::Parser;
use overlay_policy_index::{
    check_integrity, repair_integrity, Index, PolicyKind, API_SESSION_DELETED,
};
use overlay_policy_store::Db;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[clap(name = "overlay-policy", about = "An overlay network policy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "overlay=info,warn",
        env = "OVERLAY_POLICY_CONTROLLER_LOG"
    )]
    log_level: String,

    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// A JSON document of entities and policies to load at startup.
    #[clap(long, env = "OVERLAY_POLICY_CONTROLLER_SEED")]
    seed: Option<PathBuf>,

    /// Checks every policy kind for drift at startup, logging what is found.
    #[clap(long)]
    check_integrity: bool,

    /// Checks every policy kind for drift at startup and repairs it.
    #[clap(long)]
    fix_integrity: bool,

    #[clap(long, default_value = "1000")]
    eventual_interval_ms: u64,

    #[clap(long, default_value = "250")]
    eventual_batch_size: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid log format: {0}; expected plain or json")]
pub struct InvalidLogFormat(String);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin_addr,
            seed,
            check_integrity,
            fix_integrity,
            eventual_interval_ms,
            eventual_batch_size,
        } = self;

        log_format.try_init(&log_level)?;
        if eventual_batch_size == 0 {
            bail!("--eventual-batch-size must be at least 1");
        }

        let mut prom = <Registry>::default();
        let prom_root = prom.sub_registry_with_prefix("overlay_policy");
        let dispatch_metrics =
            DispatchMetrics::register(prom_root.sub_registry_with_prefix("service_events"));
        let eventual_metrics =
            EventualMetrics::register(prom_root.sub_registry_with_prefix("eventual_events"));

        // Committed service events flow through the sinks to the dispatcher task.
        let (events_tx, events_rx) = dispatch::channel();
        let sinks = EventSinks::default();
        sinks.register(Arc::new(events_tx));
        let index = Index::new(Arc::new(sinks));
        let db = Arc::new(Db::new(index.schema()));
        metrics::register(prom_root.sub_registry_with_prefix("index"), db.clone());

        let (drain_tx, drain_rx) = drain::channel();
        tokio::spawn(
            dispatch::run(events_rx, dispatch_metrics, drain_rx.clone())
                .instrument(info_span!("dispatch")),
        );

        if let Some(path) = seed {
            Seed::read(&path)?.apply(&index, &db)?;
        }
        if check_integrity || fix_integrity {
            integrity(&db, fix_integrity)?;
        }

        let mut eventer = EventualEventer::new(
            db.clone(),
            index.clone(),
            EventualConfig {
                interval: Duration::from_millis(eventual_interval_ms),
                batch_size: eventual_batch_size,
            },
            eventual_metrics,
        );
        eventer.add_listener(API_SESSION_DELETED, Arc::new(DeleteSessions::default()));
        tokio::spawn(eventer.run(drain_rx.clone()).instrument(info_span!("eventual")));

        let (ready_tx, ready_rx) = watch::channel(false);
        let admin = tokio::spawn(
            admin::serve(admin_addr, ready_rx, Arc::new(prom), drain_rx)
                .instrument(info_span!("admin")),
        );
        let _ = ready_tx.send(true);
        info!("Ready");

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Received shutdown signal");
            }
            res = admin => {
                // The admin server only completes early if it fails.
                res??;
                bail!("admin server stopped unexpectedly");
            }
        }

        let _ = ready_tx.send(false);
        drain_tx.drain().await;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Checks, and optionally repairs, every policy kind. Returns the number of discrepancies found.
fn integrity(db: &Db, fix: bool) -> Result<usize> {
    let mut found = 0;
    for kind in PolicyKind::all() {
        let mut report = |error: overlay_policy_core::Error, fixed: bool| {
            found += 1;
            warn!(%kind, %error, fixed, "Integrity violation");
        };
        if fix {
            db.update(|tx| repair_integrity(tx, kind, &mut report))?;
        } else {
            check_integrity(&db.view(), kind, &mut report)?;
        }
    }
    info!(discrepancies = found, repaired = fix, "Checked integrity");
    Ok(found)
}

// === impl LogFormat ===

impl LogFormat {
    /// Installs the global subscriber.
    pub fn try_init(self, filter: &str) -> Result<()> {
        let filter = EnvFilter::try_new(filter)?;
        let registry = tracing_subscriber::registry().with(filter);
        match self {
            Self::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
            Self::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?,
        }
        Ok(())
    }
}

impl FromStr for LogFormat {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("plain") {
            Ok(Self::Plain)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(InvalidLogFormat(s.to_string()))
        }
    }
}
