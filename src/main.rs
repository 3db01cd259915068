use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_report_server::delivery::{LogOnlyDelivery, ReportDelivery, SmtpDelivery};
use fleet_report_server::job_store::{MailJobStore, SqliteMailJobStore};
use fleet_report_server::report::collectors::SchedulerActivityCollector;
use fleet_report_server::report::CollectorRegistry;
use fleet_report_server::scheduler::create_scheduler;
use fleet_report_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use tokio_util::sync::CancellationToken;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite mail job database file.
    #[clap(value_parser = parse_path)]
    pub job_db: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// SMTP relay host for report delivery. Without it, rendered reports
    /// are logged and dropped.
    #[clap(long)]
    pub smtp_host: Option<String>,

    /// SMTP relay port.
    #[clap(long, default_value_t = 25)]
    pub smtp_port: u16,

    /// Sender address for report e-mails.
    #[clap(long, default_value = "fleet-reports@localhost")]
    pub mail_from: String,

    /// Do not arm scheduled jobs at startup; wait for POST /scheduler/init.
    #[clap(long)]
    pub skip_scheduler_autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!("Opening mail job database at {:?}...", cli_args.job_db);
    let job_store: Arc<dyn MailJobStore> = Arc::new(SqliteMailJobStore::new(&cli_args.job_db)?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let mut collectors = CollectorRegistry::new();
    collectors.register(
        "scheduler-activity",
        Arc::new(SchedulerActivityCollector::new(Arc::clone(&job_store))),
    );
    info!(
        "Registered report collectors: {}",
        collectors.report_type_ids().join(", ")
    );

    let delivery: Arc<dyn ReportDelivery> = match &cli_args.smtp_host {
        Some(host) => {
            info!("SMTP relay configured at {}:{}", host, cli_args.smtp_port);
            Arc::new(SmtpDelivery::new(
                host,
                cli_args.smtp_port,
                cli_args.mail_from.clone(),
            ))
        }
        None => {
            info!("No SMTP relay configured; report delivery is log-only");
            Arc::new(LogOnlyDelivery)
        }
    };

    let shutdown = CancellationToken::new();
    let (mut engine, scheduler) = create_scheduler(
        Arc::clone(&job_store),
        Arc::new(collectors),
        delivery,
        shutdown.clone(),
    );

    let engine_task = tokio::spawn(async move {
        engine.run().await;
    });

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, shutting down...");
                shutdown.cancel();
            }
        });
    }

    if cli_args.skip_scheduler_autostart {
        info!("Scheduler autostart skipped; waiting for POST /scheduler/init");
    } else {
        match scheduler.initialize().await {
            Ok(armed) => info!("Scheduler armed {} jobs at startup", armed),
            Err(e) => error!("Scheduler initialization failed: {}", e),
        }
    }

    let config = ServerConfig {
        requests_logging_level: cli_args.logging_level,
        port: cli_args.port,
    };

    info!("Ready to serve at port {}!", config.port);
    run_server(job_store, scheduler, config, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = engine_task.await;
    Ok(())
}
