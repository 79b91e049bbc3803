//! docharvest command line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use docharvest::{BrowserDriver, ChromiumDriver, ChromiumOptions};
use docharvest_cli::harvest::is_authentication_failure;
use docharvest_cli::prompt::TerminalPrompt;
use docharvest_cli::{config, credentials, HarvestConfig, PortalKind, RecordWriter, RunOptions};

#[derive(Parser)]
#[command(
    name = "docharvest",
    about = "Harvest documents from web portals behind two-factor logins",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug)]
struct HarvestArgs {
    /// Portal to log into.
    #[arg(value_enum)]
    portal: PortalKind,

    /// Login id; otherwise DOCHARVEST_LOGIN_ID or a prompt.
    #[arg(long)]
    login_id: Option<String>,

    /// Directory the browser downloads into.
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Directory renamed documents are moved to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long)]
    headful: bool,

    /// Stop after this many documents.
    #[arg(long)]
    limit: Option<usize>,

    /// Abort on the first failed document instead of skipping it.
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, download every listed document and print one JSON line each.
    Harvest(HarvestArgs),

    /// Log in and print the listing without downloading.
    List(HarvestArgs),

    /// List supported portals.
    Portals,

    /// Print the effective configuration as TOML.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   docharvest completions bash > ~/.local/share/bash-completion/completions/docharvest
    ///   docharvest completions zsh > ~/.zfunc/_docharvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e:#}");
        let code = if is_authentication_failure(&e) { 2 } else { 1 };
        std::process::exit(code);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Harvest(args) => harvest(cli.config.as_deref(), args, false).await,

        Commands::List(args) => harvest(cli.config.as_deref(), args, true).await,

        Commands::Portals => {
            for kind in PortalKind::all() {
                println!(
                    "{:<14} {:<6} {}",
                    kind.name(),
                    kind.second_factor(),
                    kind.description()
                );
            }
            Ok(())
        }

        Commands::Config => {
            let path = config::resolve_config_path(cli.config.as_deref());
            let effective = config::load(cli.config.as_deref())?;
            println!("# {}", path.display());
            print!("{}", effective.to_toml()?);
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "docharvest", &mut std::io::stdout());
            Ok(())
        }
    }
}

async fn harvest(config_path: Option<&str>, args: HarvestArgs, list_only: bool) -> anyhow::Result<()> {
    let mut config: HarvestConfig = config::load(config_path)?;
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = Some(dir);
    }
    if args.headful {
        config.headless = false;
    }
    std::fs::create_dir_all(&config.download_dir)?;

    let portal_name = args.portal.name();
    let portal = args.portal.build();
    let credentials = credentials::resolve(portal_name, args.login_id)?;

    let driver = ChromiumDriver::launch(&ChromiumOptions {
        headless: config.headless,
        download_dir: config.download_dir.clone(),
        executable: config.chromium_path.clone(),
        ..ChromiumOptions::default()
    })
    .await?;
    let driver = Arc::new(driver);

    let options = RunOptions {
        list_only,
        limit: args.limit,
        fail_fast: args.fail_fast,
    };
    let prompt = Arc::new(TerminalPrompt::new(&config.download_dir));
    let mut records = RecordWriter::new(std::io::stdout(), portal_name);

    tracing::info!(portal = portal_name, dir = %config.download_dir.display(), "starting harvest");
    let result = docharvest_cli::run(
        Arc::clone(&driver) as Arc<dyn BrowserDriver>,
        &portal,
        &config,
        &credentials,
        prompt,
        &options,
        &mut records,
    )
    .await;

    match Arc::try_unwrap(driver) {
        Ok(driver) => {
            if let Err(e) = driver.close().await {
                tracing::warn!(error = %e, "browser did not close cleanly");
            }
        }
        Err(_) => tracing::warn!("browser still in use, leaving it to exit with the process"),
    }

    result.map(|_| ())
}
