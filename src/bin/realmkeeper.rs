use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use realmkeeper::commands::CommandRouter;
use realmkeeper::config::ManagerConfig;
use realmkeeper::keeper::Keeper;
use realmkeeper::realm::lifecycle;

const USAGE: &str = "\
Usage: realmkeeper [--conf FILE] [noac] [norealm] [-- COMMAND...]

With `-- COMMAND` the command runs once against a fresh manager. Realms it
starts stay up until Ctrl-C; otherwise the process exits right away. A fresh
manager owns no running realms, so `stop realm` in this form always reports
none running.";

fn print_output(output: &str) {
    if !output.is_empty() {
        println!("{}", output);
    }
}

/// Stop every running realm. A Ctrl-C during the graceful pass kills them.
async fn shutdown(keeper: &Arc<Keeper>) {
    let results = tokio::select! {
        results = lifecycle::stop_all(keeper, false) => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("[keeper] [force_shutdown]");
            lifecycle::stop_all(keeper, true).await
        }
    };
    for (fqn, result) in results {
        if let Err(e) = result {
            tracing::error!("[keeper] [stop_failed] realm={} err={}", fqn, e);
        }
    }
    tracing::info!("[keeper] [stopped]");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/realmkeeper.yaml".to_string();
    let mut no_autostart = false;
    let mut no_realms = false;
    let mut oneshot: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("{}", USAGE);
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            "noac" => no_autostart = true,
            "norealm" => no_realms = true,
            "--" => {
                oneshot = Some(args[i + 1..].join(" "));
                break;
            }
            other => eprintln!("Warning: ignoring unknown argument '{}'", other),
        }
        i += 1;
    }

    let config = ManagerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;
    let keeper = Arc::new(Keeper::from_config(config)?);
    let router = CommandRouter::new(Arc::clone(&keeper))?;

    if let Some(line) = oneshot {
        let result = router.dispatch(&line).await;
        match result {
            Ok(output) => print_output(&output),
            Err(e) => eprintln!("Error: {}", e),
        }
        let running = keeper.instances.running().len();
        if running > 0 {
            tracing::info!("[keeper] [supervising] realms={}", running);
            tokio::signal::ctrl_c().await?;
            shutdown(&keeper).await;
        }
        return Ok(());
    }

    tracing::info!("[keeper] [started] modules={}", keeper.config.modules_dir.display());

    if !no_realms {
        for (fqn, result) in router.auto_start(no_autostart).await {
            match result {
                Ok(pid) => tracing::info!("[keeper] [autostarted] realm={} pid={}", fqn, pid),
                Err(e) => eprintln!("{}: failed: {}", fqn, e),
            }
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[keeper] [interrupted]");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "exit" || line == "quit" {
                    break;
                }
                tokio::select! {
                    result = router.dispatch(line) => match result {
                        Ok(output) => print_output(&output),
                        Err(e) => eprintln!("Error: {}", e),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("[keeper] [interrupted] command={}", line);
                        break;
                    }
                }
            }
        }
    }

    shutdown(&keeper).await;
    Ok(())
}
