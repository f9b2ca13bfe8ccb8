use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::catalog::HttpCatalog;
use crate::cli::RunArgs;
use crate::launcher::{Launcher, RunSinks, ToolSpec};
use crate::ledger::JsonlLedger;
use crate::notify::NoticeQueue;

use super::{load_config, open_cache};

pub async fn run(args: &RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let cache = open_cache(&config)?;

    let catalog = HttpCatalog::new(&config.catalog, config.catalog_timeout()?)?;
    let ledger = JsonlLedger::new(ledger_path(&config.cache.dir));
    let notices = NoticeQueue::default();

    let launcher = Launcher::new(
        cache,
        config.interpreter.clone(),
        config.endpoint.clone(),
        catalog,
        ledger,
        notices.clone(),
    );

    // Ctrl-C cancels the in-flight run instead of killing the launcher
    let host = launcher.host();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            host.stop();
        }
    });

    let tool = ToolSpec {
        id: args.id.clone().unwrap_or_else(|| args.script.clone()),
        script_key: args.script.clone(),
        parameters: parse_params(&args.params)?,
        needs_elevation: args.needs_elevation,
        needs_endpoint: args.needs_endpoint,
        dependencies: args.dependencies.clone(),
    };

    let sinks = RunSinks {
        output: Some(std::sync::Arc::new(|line: &str| println!("{line}"))),
        error: Some(std::sync::Arc::new(|line: &str| eprintln!("{line}"))),
        progress: Some(std::sync::Arc::new(|percent: u8| {
            eprintln!("[{percent:>3}%]")
        })),
    };

    let report = launcher.launch(&tool, sinks, args.force).await?;

    if report.blocked() {
        eprintln!("\nPre-flight failed:");
        for check in report.preflight.iter().filter(|c| !c.passed) {
            eprintln!("  ❌ {}: {}", check.name, check.message);
        }
        bail!("execution blocked by pre-flight (use --force to override)");
    }

    for notice in notices.drain() {
        eprintln!("{}", notice.text());
    }

    let result = report.result.expect("unblocked launch carries a result");
    if !result.success {
        bail!(
            "tool failed (exit code {:?}, {:.2}s)",
            result.exit_code,
            result.duration.as_secs_f64()
        );
    }

    eprintln!(
        "completed in {:.2}s (exit code {})",
        result.duration.as_secs_f64(),
        result.exit_code.unwrap_or(0)
    );
    Ok(())
}

fn parse_params(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .with_context(|| format!("invalid parameter (expected NAME=VALUE): {pair}"))
        })
        .collect()
}

fn ledger_path(cache_dir: &str) -> std::path::PathBuf {
    Path::new(cache_dir)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("history.jsonl")
}
