use anyhow::Result;
use deploy_tracker::config::Config;
use deploy_tracker::remote::HttpRemote;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn ok(label: &str, detail: &str) {
    println!("  {GREEN}[OK]{RESET}   {label}: {detail}");
}

fn fail(label: &str, detail: &str) {
    println!("  {RED}[FAIL]{RESET} {label}: {detail}");
}

fn info(label: &str, detail: &str) {
    println!("  {CYAN}[INFO]{RESET} {label}: {detail}");
}

pub async fn run(config: &Config, config_path: Option<&Path>) -> Result<()> {
    println!("deployctl doctor\n");

    // 1. Binary version
    ok("Version", env!("CARGO_PKG_VERSION"));

    // 2. Config file
    match config_path {
        Some(p) => ok("Config", &p.display().to_string()),
        None => info("Config", "(default)"),
    }
    match config.validate() {
        Ok(()) => ok("Config values", "valid"),
        Err(e) => fail("Config values", &e.to_string()),
    }

    // 3. Target
    match &config.platform.default_namespace {
        Some(ns) => ok("Namespace", ns),
        None => info("Namespace", "not set (orchestrator default)"),
    }
    info("Branch", &config.platform.branch);
    info(
        "Polling",
        &format!(
            "every {} ms, settle {} ms",
            config.tracking.poll_interval_ms, config.tracking.settle_delay_ms
        ),
    );

    // 4. Orchestrator
    check_orchestrator(config).await;

    // 5. Push channel
    if config.orchestrator.push_enabled {
        info(
            "Push channel",
            &format!(
                "{}{}",
                config.orchestrator.url.trim_end_matches('/'),
                config.orchestrator.push_path
            ),
        );
    } else {
        info("Push channel", "disabled (polling only)");
    }

    // 6. Log directory
    check_log_dir(config);

    println!();
    Ok(())
}

async fn check_orchestrator(config: &Config) {
    let url = &config.orchestrator.url;
    let remote = match HttpRemote::new(url, Duration::from_secs(5)) {
        Ok(r) => r,
        Err(_) => {
            fail("Orchestrator", "failed to build HTTP client");
            return;
        }
    };
    if remote.health_check().await {
        ok("Orchestrator", &format!("{} (reachable)", remote.base_url()));
    } else {
        fail("Orchestrator", &format!("{} (not reachable)", remote.base_url()));
    }
}

fn check_log_dir(config: &Config) {
    let dir = config
        .logging
        .directory
        .as_deref()
        .map(deploy_tracker::paths::expand_tilde)
        .unwrap_or_else(deploy_tracker::paths::logs_dir);

    if dir.exists() {
        // Check writable by trying to create a temp file
        let test_path: PathBuf = dir.join(".doctor-check");
        match std::fs::write(&test_path, "") {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                ok("Logs", &dir.display().to_string());
            }
            Err(_) => fail("Logs", &format!("{} (not writable)", dir.display())),
        }
    } else {
        info("Logs", &format!("{} (not found)", dir.display()));
    }
}
