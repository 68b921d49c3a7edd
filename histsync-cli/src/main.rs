//! histsync: shell history sync over git
//!
//! Usage:
//!   histsync sync
//!   histsync watch --interval-secs 600
//!   histsync status
//!
//! Credentials come from `GIT_USERNAME`, `GIT_TOKEN` and `GIT_REPO`, or the
//! `git` section of `~/.config/config.yaml`.

use anyhow::Result;
use clap::Parser;
use histsync_cli::{exit_code, format_status, summarize, Cli, Command, PathEnv, SyncArgs};
use histsync_sync::repository::set_transport_timeouts;
use histsync_sync::{SyncEngine, SyncReport, SyncState};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(timeout) = cli.command.network_timeout() {
        // SAFETY: the runtime, and with it every other thread, starts below.
        if let Err(e) = unsafe { set_transport_timeouts(timeout) } {
            warn!("{}", e);
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("histsync: failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("histsync: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let builder = FmtSubscriber::builder().with_target(false).compact();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        let log_level = if verbose { Level::DEBUG } else { Level::INFO };
        builder.with_max_level(log_level).init();
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let env = PathEnv::current();
    match cli.command {
        Command::Sync(args) => sync_once(&args, &env).await,
        Command::Watch {
            sync,
            interval_secs,
        } => watch(&sync, &env, Duration::from_secs(interval_secs.max(1))).await,
        Command::Status(paths) => {
            let paths = paths.resolve(&env)?;
            let state = SyncState::load(&SyncState::path_for(&paths.repo))?;
            println!("history:    {}", paths.history.display());
            println!("repository: {}", paths.repo.display());
            println!("{}", format_status(state.as_ref()));
            Ok(0)
        }
    }
}

async fn sync_once(args: &SyncArgs, env: &PathEnv) -> Result<u8> {
    let engine = SyncEngine::new(args.to_config(env)?)?;
    let report = engine.run().await;
    println!("{}", summarize(&report));
    if tracing::enabled!(Level::DEBUG) {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(exit_code(&report))
}

async fn watch(args: &SyncArgs, env: &PathEnv, every: Duration) -> Result<u8> {
    let engine = SyncEngine::new(args.to_config(env)?)?;
    info!("Watching {:?} every {:?}", engine.config().history_path, every);

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cycles: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted after {} cycles", cycles);
                return Ok(0);
            }
        }

        cycles += 1;
        let run = engine.run();
        tokio::pin!(run);
        let report = tokio::select! {
            report = &mut run => report,
            _ = &mut ctrl_c => {
                info!("Interrupted; finishing cycle {}", cycles);
                let report = run.await;
                report_cycle(cycles, &report);
                return Ok(exit_code(&report));
            }
        };

        let code = report_cycle(cycles, &report);
        if code > 1 {
            error!("Stopping after a fatal error");
            return Ok(code);
        }
    }
}

fn report_cycle(cycle: u64, report: &SyncReport) -> u8 {
    let code = exit_code(report);
    match code {
        0 => info!("Cycle {}: {}", cycle, summarize(report)),
        1 => warn!("Cycle {}: {}", cycle, summarize(report)),
        _ => error!("Cycle {}: {}", cycle, summarize(report)),
    }
    code
}
