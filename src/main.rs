#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use a11yprobe::config::{CliOverrides, ProbeConfig};
use a11yprobe::detect::ActivationMethod;
use a11yprobe::errors::ProbeError;
use a11yprobe::types::{OutputFormat, ViewportSize};
use a11yprobe::webdriver::BrowserType;
use a11yprobe::webdriver_manager::GLOBAL_WEBDRIVER_MANAGER;

const EXIT_SUCCESS: i32 = 0;

#[derive(Parser)]
#[command(name = "a11yprobe", version)]
#[command(about = "Replay recorded activities and detect interactive widgets over WebDriver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Browser to drive
    #[arg(long, global = true)]
    browser: Option<BrowserType>,

    /// Run the browser headless
    #[arg(long, global = true, overrides_with = "no_headless")]
    headless: bool,

    /// Run the browser in visible mode
    #[arg(long = "no-headless", global = true)]
    no_headless: bool,

    /// Window size (WIDTHxHEIGHT, e.g., 1920x1080)
    #[arg(long, global = true)]
    viewport: Option<String>,

    /// Connect to this WebDriver endpoint instead of starting a driver
    #[arg(long, global = true)]
    webdriver_url: Option<String>,

    /// Config file (defaults to ~/.a11yprobe/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the activities of a page descriptor file
    Replay {
        /// Page descriptor file (JSON)
        file: PathBuf,

        /// Only replay the activity with this name
        #[arg(long)]
        activity: Option<String>,
    },

    /// Detect widgets on the pages reached by each activity
    Detect {
        /// Page descriptor file (JSON)
        file: PathBuf,

        /// Only probe the activity with this name
        #[arg(long)]
        activity: Option<String>,

        /// Probe elements matching this CSS selector instead of all activatable elements
        #[arg(long = "selector")]
        selectors: Vec<String>,

        /// Activation method; repeat to probe several (default: click)
        #[arg(long = "method", value_enum)]
        methods: Vec<ActivationMethod>,
    },

    /// Click an element and report what the click did
    Click {
        /// URL to open
        url: String,

        /// CSS selector for the element
        selector: String,
    },

    /// Open a URL and wait until network activity settles
    WaitLoad {
        /// URL to open
        url: String,
    },

    /// Show version information
    Version,
}

impl Cli {
    fn overrides(&self) -> Result<CliOverrides> {
        let headless = match (self.headless, self.no_headless) {
            (_, true) => Some(false),
            (true, false) => Some(true),
            (false, false) => None,
        };
        Ok(CliOverrides {
            browser: self.browser,
            headless,
            viewport: self.viewport.as_deref().map(ViewportSize::parse).transpose()?,
            webdriver_url: self.webdriver_url.clone(),
        })
    }
}

#[tokio::main]
async fn main() {
    let result = run().await;

    // Always clean up WebDriver processes before exiting
    GLOBAL_WEBDRIVER_MANAGER.stop_all();

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            let probe_err: ProbeError = err.into();

            // JSON on stdout for programmatic consumption
            let error_json = json!({
                "error": true,
                "message": probe_err.to_string(),
                "exit_code": probe_err.exit_code()
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            eprintln!("Error: {}", probe_err);
            std::process::exit(probe_err.exit_code());
        }
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "a11yprobe=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    if let Commands::Version = cli.command {
        return commands::version::handle_version(format).await;
    }

    let config = ProbeConfig::resolve(cli.config.as_deref(), &cli.overrides()?)?;

    match cli.command {
        Commands::Replay { file, activity } => {
            commands::replay::handle_replay(&config, format, file, activity).await?
        }
        Commands::Detect {
            file,
            activity,
            selectors,
            methods,
        } => {
            commands::detect::handle_detect(&config, format, file, activity, selectors, methods)
                .await?
        }
        Commands::Click { url, selector } => {
            commands::click::handle_click(&config, format, url, selector).await?
        }
        Commands::WaitLoad { url } => {
            commands::wait_load::handle_wait_load(&config, format, url).await?
        }
        Commands::Version => {}
    }

    Ok(())
}
