// Ginga - single-instance background streaming server
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use ginga::config::{load_config, Config, LoggingConfig};
use ginga::daemon::{
    child_args, instance_status, launch_daemon, stop_instance, InstanceStatus, LockGuard,
};
use ginga::errors::{self, LaunchError};
use ginga::server::{ShutdownCoordinator, ShutdownOutcome, SignalListener, StreamServer};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "ginga")]
#[command(about = "Single-instance background HTTP streaming server", version)]
struct Args {
    /// Run mode; omit to serve in the foreground
    #[arg(value_enum, ignore_case = true)]
    mode: Option<Mode>,

    /// Listen address (host:port), default 0.0.0.0:5200
    #[arg(long = "ip", value_name = "HOST:PORT")]
    ip: Option<String>,

    /// Config file (default: ./ginga.toml when present)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Replace any running instance and start a detached one
    Daemon,
    /// Stop the running instance
    Stop,
    /// Show whether an instance is running
    Status,
}

/// Long flags that may be written with a single dash (`-ip 0.0.0.0:80`)
const SINGLE_DASH_FLAGS: &[&str] = &["ip", "config"];

/// Rewrite `-ip`/`-ip=...` style flags to their `--` form
fn normalize_flags<I>(argv: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    argv.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split('=').next().unwrap_or(rest);
            if SINGLE_DASH_FLAGS.contains(&name) {
                OsString::from(format!("-{}", text))
            } else {
                arg
            }
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse_from(normalize_flags(std::env::args_os()));

    let mut config = load_config(args.config.as_deref())?;
    if let Some(ip) = args.ip {
        config.listen_address = ip;
    }

    init_tracing(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let lock = runtime.block_on(async {
        match args.mode {
            Some(Mode::Daemon) => run_daemon_launch(&config).await.map(|()| None),
            Some(Mode::Stop) => run_stop(&config).await.map(|()| None),
            Some(Mode::Status) => run_status(&config).map(|()| None),
            None => run_server(config).await.map(Some),
        }
    })?;

    // Connections left over from a forced drain are cancelled with the runtime
    drop(runtime);
    if let Some(lock) = lock {
        lock.release()?;
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level: {}", logging.level))?;

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match &logging.file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let file_writer = Arc::new(log_file);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(move || file_writer.clone())
                    .with_ansi(false), // No ANSI colors in log file
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
    Ok(())
}

async fn run_daemon_launch(config: &Config) -> Result<()> {
    let exe_path = std::env::current_exe().context("Failed to determine current executable path")?;
    let args = child_args(std::env::args_os());

    launch_daemon(
        &exe_path,
        &args,
        &config.lock_file,
        config.shutdown.stale_wait(),
    )
    .await?;

    // The child is on its own from here; its later output is not relayed
    Ok(())
}

async fn run_stop(config: &Config) -> Result<()> {
    match stop_instance(&config.lock_file, config.shutdown.stale_wait()).await? {
        Some(pid) => println!("✓ Stopped ginga (PID: {})", pid),
        None => println!("ginga is not running"),
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    match instance_status(&config.lock_file)? {
        InstanceStatus::Running { pid: Some(pid) } => println!("ginga is running (PID: {})", pid),
        InstanceStatus::Running { pid: None } => println!("ginga is running (PID unknown)"),
        InstanceStatus::Stopped => println!("ginga is not running"),
    }
    println!("Lock file: {}", config.lock_file.display());
    Ok(())
}

/// Serve until drained; the lock is handed back so it outlives the runtime
async fn run_server(config: Config) -> Result<LockGuard> {
    let signals = SignalListener::install()?;

    let lock = match LockGuard::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(LaunchError::LockHeld { path, pid }) => {
            bail!(errors::instance_already_running_error(
                &path.display().to_string(),
                pid
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let server = StreamServer::bind(&config.listen_address, config.stream.clone())
        .await
        .map_err(|e| {
            anyhow::anyhow!(errors::wrap_error_with_suggestion(
                e,
                "Check that the address is valid and the port is free, or pass -ip host:port"
            ))
        })?;
    tracing::info!(
        pid = std::process::id(),
        address = %server.local_addr(),
        lock = %lock.path().display(),
        "ginga started"
    );

    let coordinator = ShutdownCoordinator::new(config.shutdown.drain_timeout());
    tracing::debug!(drain_timeout = ?coordinator.drain_timeout(), "Shutdown coordinator ready");
    let running = server.spawn(&coordinator);

    let outcome = coordinator.run_until_stopped(running, signals.recv()).await;
    if let ShutdownOutcome::Forced { in_flight } = outcome {
        tracing::warn!(in_flight = in_flight, "Abandoning unfinished sessions");
    }

    Ok(lock)
}
