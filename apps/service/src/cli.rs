use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::monitoring::types::ReportStatus;
use crate::monitoring::Monitor;
use crate::notification::Notifier;
use crate::output;
use crate::scheduler::{self, Handler, Scheduler};

const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_INTERNAL_ERROR: u8 = 4;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Monitors a server fleet for failed scheduled jobs")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one monitoring cycle and print the report
    Check {
        /// Check a single server by name
        #[arg(long)]
        server: Option<String>,

        /// Override the lookback window in hours
        #[arg(long)]
        lookback: Option<u32>,

        /// Push a webhook notification when failed jobs are found
        #[arg(long)]
        notify: bool,

        /// Output format for the report
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,

        /// Only print the summary line
        #[arg(short, long)]
        quiet: bool,
    },

    /// Run the scheduler service loop until interrupted
    Run,

    /// Print the next scheduled check time
    NextRun,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Dispatch the parsed command line and return the process exit code.
pub async fn run(cli: Cli) -> u8 {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    logger::init(&config.logging.level, &config.logging.format);

    match cli.command {
        Command::Check { server, lookback, notify, output, quiet } => {
            check(config, server, lookback, notify, output, quiet).await
        }
        Command::Run => run_service(config).await,
        Command::NextRun => next_run(&config),
        Command::Config { command: ConfigCommand::Show } => {
            print!("{config}");
            0
        }
        Command::Config { command: ConfigCommand::Validate } => {
            // Load already validated; reaching this point means the file
            // is usable.
            println!("Configuration is valid");
            0
        }
    }
}

async fn check(
    mut config: Config,
    server: Option<String>,
    lookback: Option<u32>,
    notify: bool,
    format: OutputFormat,
    quiet: bool,
) -> u8 {
    if let Some(hours) = lookback {
        config.monitoring.lookback_hours = hours;
    }

    let cancel = CancellationToken::new();
    spawn_force_abort(cancel.clone());

    let notification = config.notification.clone();
    let monitor = Monitor::new(Arc::new(config));

    let report = match &server {
        Some(name) => match monitor.check_server(name, &cancel).await {
            Ok(report) => report,
            Err(e) => {
                eprintln!("{e}");
                return EXIT_CONFIG_ERROR;
            }
        },
        None => monitor.check_all(&cancel).await,
    };

    if notify && report.has_failed_jobs() {
        match Notifier::new(notification) {
            Ok(notifier) => {
                if let Err(e) = notifier.notify(&report).await {
                    warn!("notification failed: {e}");
                }
            }
            Err(e) => warn!("notification skipped: {e}"),
        }
    }

    if quiet {
        println!("{}", report.summary);
    } else {
        match format {
            OutputFormat::Text => print!("{}", output::render_text(&report)),
            OutputFormat::Json => match output::render_json(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    error!("failed to render report: {e}");
                    return EXIT_INTERNAL_ERROR;
                }
            },
        }
    }

    report.exit_code()
}

async fn run_service(config: Config) -> u8 {
    let config = Arc::new(config);
    let monitor = Arc::new(Monitor::new(config.clone()));

    let notifier = if config.notification.enabled {
        match Notifier::new(config.notification.clone()) {
            Ok(notifier) => Some(Arc::new(notifier)),
            Err(e) => {
                eprintln!("{e}");
                return EXIT_CONFIG_ERROR;
            }
        }
    } else {
        None
    };

    let handler: Handler = Arc::new(move |cancel| {
        let monitor = monitor.clone();
        let notifier = notifier.clone();
        Box::pin(async move {
            let report = monitor.check_all(&cancel).await;

            if report.has_failed_jobs() {
                if let Some(notifier) = &notifier {
                    if let Err(e) = notifier.notify(&report).await {
                        warn!("notification failed: {e}");
                    }
                }
            }

            if report.status == ReportStatus::Error {
                anyhow::bail!("{}", report.summary);
            }
            Ok(())
        })
    });

    let mut scheduler = match Scheduler::new(&config.scheduler, handler) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    if let Err(e) = scheduler.start() {
        eprintln!("{e}");
        return EXIT_CONFIG_ERROR;
    }

    if let Ok(next) = scheduler.next_run() {
        info!("next check at {}", next.to_rfc3339());
    }

    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to listen for shutdown signal");
        return EXIT_INTERNAL_ERROR;
    }
    info!("shutdown requested, waiting for running cycle");

    let cycle = scheduler.cycle_token();
    let stop = scheduler.stop();
    tokio::pin!(stop);
    tokio::select! {
        _ = &mut stop => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("forcing shutdown, aborting in-flight cycle");
            cycle.cancel();
            stop.await;
        }
    }

    0
}

fn next_run(config: &Config) -> u8 {
    match scheduler::next_run_from_config(&config.scheduler) {
        Ok(next) => {
            let minutes = (next - chrono::Utc::now()).num_minutes();
            println!("Next check: {} (in {} minutes)", next.to_rfc3339(), minutes);
            0
        }
        Err(e) => {
            eprintln!("{e}");
            EXIT_CONFIG_ERROR
        }
    }
}

/// Cancel the cycle token on ctrl-c so a one-shot check can be aborted.
fn spawn_force_abort(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting check");
            cancel.cancel();
        }
    });
}
