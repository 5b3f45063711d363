//! diskwatch - disk-pressure watchdog for a Jenkins build node.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use dw_config::Settings;
use dw_core::exit_codes::ExitCode;
use dw_core::log_event;
use dw_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LogConfig, LogContext, LogFormat,
    LogLevel, Stage,
};
use dw_core::reclaim::{DockerCli, HostReclaimer};
use dw_core::sample::StatvfsProbe;
use dw_core::scheduler::{JenkinsEndpoint, SchedulerNodeController};
use dw_core::watchdog::{SignalListener, Watchdog};
use serde_json::json;

#[derive(Parser)]
#[command(name = "diskwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides DW_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format on stderr (overrides DW_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch disk usage and clean up when over threshold
    Run {
        /// Run a single iteration and exit
        #[arg(long)]
        once: bool,

        /// Sample and report only; never touch the node or the disk
        #[arg(long)]
        dry_run: bool,
    },

    /// Sample monitored paths once and print a JSON summary
    Check,

    /// Print the resolved configuration (password redacted)
    Config,
}

fn main() {
    let cli = Cli::parse();

    init_logging(&LogConfig::from_env(cli.log_level, cli.log_format));

    let exit_code = match Settings::from_env() {
        Ok(settings) => {
            let context = LogContext::new(generate_run_id(), get_host_id())
                .with_node(&settings.scheduler.node);
            let _span = context.span().entered();
            log_event!(
                DEBUG,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "configuration loaded",
                threshold = settings.watch.threshold_percent,
                interval_minutes = settings.watch.interval_minutes
            );

            match cli.command {
                Commands::Run { once, dry_run } => run_watchdog(&settings, once, dry_run),
                Commands::Check => run_check(&settings),
                Commands::Config => run_config(&settings),
            }
        }
        Err(err) => {
            log_event!(
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "invalid configuration",
                key = err.key(),
                code = err.code(),
                error = %err
            );
            eprintln!("diskwatch: {err}");
            ExitCode::ConfigError
        }
    };

    if exit_code.is_error() {
        tracing::error!(exit_code = exit_code.code_name(), "diskwatch exiting with an error");
    }
    std::process::exit(exit_code.as_i32());
}

fn build_watchdog(settings: &Settings) -> Watchdog {
    let controller = SchedulerNodeController::new(
        JenkinsEndpoint::from_settings(&settings.scheduler),
        &settings.scheduler.node,
    );
    let reclaimer = HostReclaimer::new(DockerCli::from_settings(&settings.runtime));
    Watchdog::new(
        settings,
        Arc::new(StatvfsProbe),
        Arc::new(controller),
        Arc::new(reclaimer),
    )
}

fn run_watchdog(settings: &Settings, once: bool, dry_run: bool) -> ExitCode {
    let mut watchdog = build_watchdog(settings).with_dry_run(dry_run);

    let listener = match SignalListener::install(watchdog.stage(), watchdog.controller()) {
        Ok(listener) => listener,
        Err(err) => {
            log_event!(
                ERROR,
                event_names::RUN_STOPPED,
                Stage::Init,
                "cannot install signal handlers",
                error = %err
            );
            return ExitCode::SignalSetupError;
        }
    };

    watchdog.run_loop(once);
    listener.stop();
    ExitCode::Clean
}

fn run_check(settings: &Settings) -> ExitCode {
    let watchdog = build_watchdog(settings);
    match watchdog.sample_all() {
        Ok(samples) => {
            let critical = samples.iter().any(|s| s.critical);
            let summary = json!({
                "threshold": settings.watch.threshold_percent,
                "critical": critical,
                "samples": samples,
            });
            println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
            if critical {
                ExitCode::PressureDetected
            } else {
                ExitCode::Clean
            }
        }
        Err(err) => {
            eprintln!("diskwatch: {err}");
            ExitCode::IoError
        }
    }
}

fn run_config(settings: &Settings) -> ExitCode {
    match settings.to_redacted_json() {
        Ok(rendered) => {
            println!("{rendered}");
            ExitCode::Clean
        }
        Err(err) => {
            eprintln!("diskwatch: cannot render configuration: {err}");
            ExitCode::InternalError
        }
    }
}
