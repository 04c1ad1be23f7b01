use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use brew_config::{Config, Logging};
use brew_core::{BrewSession, StrategyKind};
use clap::Parser;
use eyre::WrapErr;

mod brew;
mod cli;
mod error_fmt;

use crate::brew::{BrewOpts, hms, run_brew, self_check};
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(err) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::error!(error = ?err, "coldbrew failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cli, &cfg.logging)?;

    match cli.cmd {
        Commands::Brew {
            ref trace,
            fast,
            status_every_s,
            max_hours,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .wrap_err("install Ctrl-C handler")?;
            let max_brew = Duration::try_from_secs_f64(max_hours * 3600.0)
                .wrap_err("--max-hours must be a non-negative number of hours")?;
            let opts = BrewOpts {
                trace: trace.as_deref(),
                fast,
                status_every: Duration::from_secs(status_every_s.max(1)),
                max_brew,
                json: cli.json,
            };
            let done = run_brew(&cfg, &opts, &shutdown)?;
            print_summary(&done, cli.json);
        }
        Commands::SelfCheck => {
            self_check(&cfg)?;
            if cli.json {
                println!("{}", serde_json::json!({ "self_check": "ok" }));
            } else {
                println!("self-check ok");
            }
        }
        Commands::Strategies => print_strategies(cli.json),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("read config {}", p.display()))?;
            brew_config::load_toml(&text).wrap_err("parse config")?
        }
        None => Config::default(),
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, logging: &Logging) -> eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err("invalid --log-level")?;
    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {}", path.display()))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "never" => tracing_appender::rolling::never(dir, name),
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                other => {
                    eyre::bail!("logging.rotation must be never, daily or hourly (got {other})")
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
                .wrap_err("invalid logging.level")?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install log subscriber")
}

fn print_summary(done: &BrewSession, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({ "event": "complete", "session": done })
        );
        return;
    }
    let took = done
        .time_completed
        .and_then(|end| (end - done.time_started).to_std().ok())
        .unwrap_or_default();
    println!(
        "brew complete: {:.1} g of {:.0} g in {} ({} valve steps, {} strategy)",
        done.current_weight.unwrap_or(0.0),
        done.target_weight,
        hms(took),
        done.valve_steps,
        done.strategy
    );
}

fn print_strategies(json: bool) {
    if json {
        let list: Vec<_> = StrategyKind::ALL
            .iter()
            .map(|k| {
                let params: serde_json::Map<String, serde_json::Value> = k
                    .default_params()
                    .into_iter()
                    .map(|(name, value)| (name.to_owned(), serde_json::Value::String(value)))
                    .collect();
                serde_json::json!({
                    "id": k.id(),
                    "description": k.description(),
                    "params": params,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(list));
        return;
    }
    for k in StrategyKind::ALL {
        println!("{:<26} {}", k.id(), k.description());
        let params = k.default_params();
        if params.is_empty() {
            println!("    (no parameters)");
        }
        for (name, value) in params {
            println!("    {name} = {value}");
        }
    }
}
