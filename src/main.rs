mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deploy_tracker::config::Config;
use deploy_tracker::logging;
use deploy_tracker::remote::{HttpRemote, PushChannel, SsePushChannel};
use deploy_tracker::{AppsInput, Controller, DeleteInput, DeployInput, TrackerOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "deployctl", version)]
#[command(about = "Deploy, change and delete platforms on the orchestrator and follow progress", long_about = None)]
struct Cli {
    /// Orchestrator base URL (overrides config)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config file to use instead of the search path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only print the final result
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,

    /// Also write log output to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a platform with the selected applications
    Deploy {
        /// Applications to deploy (comma separated). Defaults to frontend,backend.
        #[arg(long, value_delimiter = ',')]
        apps: Vec<String>,

        #[arg(short, long)]
        namespace: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        /// Owner email recorded on the platform
        #[arg(long)]
        email: Option<String>,
    },
    /// Add applications to an existing platform
    Add {
        #[arg(long, value_delimiter = ',', required = true)]
        apps: Vec<String>,

        #[arg(short, long)]
        namespace: Option<String>,

        #[arg(long)]
        branch: Option<String>,
    },
    /// Remove applications from an existing platform
    Remove {
        #[arg(long, value_delimiter = ',', required = true)]
        apps: Vec<String>,

        #[arg(short, long)]
        namespace: Option<String>,

        #[arg(long)]
        branch: Option<String>,
    },
    /// Delete the whole platform
    Delete {
        #[arg(short, long)]
        namespace: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        /// Confirm deletion
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Show one platform (the default one when no namespace is given)
    Platform { namespace: Option<String> },
    /// List all platforms
    Platforms,
    /// Diagnose configuration and orchestrator reachability
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, config_path) = match &cli.config {
        Some(path) => (Config::load_from(path)?, Some(path.clone())),
        None => Config::load_with_path().unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config, using defaults: {e}");
            (Config::default(), None)
        }),
    };
    if let Some(url) = &cli.url {
        config.orchestrator.url = url.clone();
    }

    // Lightweight subcommand, no tracing needed.
    if let Command::Doctor = cli.cmd {
        return cli::doctor::run(&config, config_path.as_deref()).await;
    }

    config.validate()?;

    let log_dir = match logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stderr: !cli.verbose,
    }) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to initialize logging: {err}");
            None
        }
    };

    tracing::info!("--- deployctl startup ---");
    match config_path.as_ref() {
        Some(path) => tracing::info!("Config File: {}", path.display()),
        None => tracing::info!("Config File: (default)"),
    }
    tracing::info!("Orchestrator: {}", config.orchestrator.url);
    if let Some(dir) = log_dir.as_ref() {
        tracing::info!("Log Directory: {}", dir.display());
    }

    let remote = Arc::new(HttpRemote::new(
        &config.orchestrator.url,
        config.orchestrator.request_timeout(),
    )?);

    // The push stream is long-lived, so it gets a client without a total timeout.
    let push: Option<Arc<dyn PushChannel>> = if config.orchestrator.push_enabled {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Some(Arc::new(SsePushChannel::new(
            &config.orchestrator.url,
            &config.orchestrator.push_path,
            client,
        )))
    } else {
        None
    };

    let handle = Controller::spawn(remote.clone(), push, TrackerOptions::from_config(&config));
    let quiet = cli.quiet;

    match cli.cmd {
        Command::Deploy {
            apps,
            namespace,
            branch,
            email,
        } => {
            handle
                .deploy(DeployInput {
                    apps,
                    namespace,
                    branch,
                    user_email: email,
                })
                .await?;
            cli::operation::follow(&handle, quiet).await
        }
        Command::Add {
            apps,
            namespace,
            branch,
        } => {
            handle
                .add_apps(AppsInput {
                    apps,
                    namespace,
                    branch,
                })
                .await?;
            cli::operation::follow(&handle, quiet).await
        }
        Command::Remove {
            apps,
            namespace,
            branch,
        } => {
            handle
                .remove_apps(AppsInput {
                    apps,
                    namespace,
                    branch,
                })
                .await?;
            cli::operation::follow(&handle, quiet).await
        }
        Command::Delete {
            namespace,
            branch,
            yes,
        } => {
            // Deletion targets the apps the platform reports, so load it first.
            cli::platform::load(&handle, namespace.clone()).await?;
            handle
                .delete_platform(DeleteInput {
                    namespace,
                    branch,
                    confirm: yes,
                })
                .await?;
            cli::operation::follow(&handle, quiet).await
        }
        Command::Platform { namespace } => {
            let record = cli::platform::load(&handle, namespace).await?;
            cli::platform::print_record(&record);
            Ok(())
        }
        Command::Platforms => cli::platform::list(remote.as_ref()).await,
        Command::Doctor => Ok(()),
    }
}
