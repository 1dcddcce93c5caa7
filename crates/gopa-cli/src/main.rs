use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gopa_core::{Action, ActionsService, ConfigLoader, Engine, Event, GopaConfig, InstallKey};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(name = "gopa", author, version, about = "Go playground toolchain manager")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, global = true, help = "Configuration file (defaults to <home>/config.yaml)")]
    config: Option<PathBuf>,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,

    #[clap(long, global = true, help = "Log to stderr instead of <home>/gopa.log")]
    log_stderr: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the newest published release
    Latest,
    /// List published releases (cached for the day)
    Versions {
        #[clap(long, help = "Print as JSON")]
        json: bool,
    },
    /// Download and install a release, e.g. go1.22.3
    Install { tag: String },
    /// List installed releases
    Installed,
    /// Remove an installed release by its key, e.g. go1.22.3.linux-amd64
    Uninstall { key: String },
    /// Run a source file ("-" for stdin) with the newest or a given release
    Run {
        file: PathBuf,

        #[clap(long, short, help = "Release to run with instead of the newest")]
        version: Option<String>,
    },
    /// Inspect the catalog cache and installations
    Cache {
        #[clap(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show manifest date, expiry and disk usage
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    init_logging(&config, &cli.log_level, cli.log_stderr)?;
    log::info!("gopa starting with home {}", config.home.display());

    let engine = Arc::new(Engine::new(config)?);

    match cli.command {
        Commands::Latest => {
            let latest = engine.latest(&CancellationToken::new()).await?;
            println!("{}", latest);
        }
        Commands::Versions { json } => {
            let versions = engine.get_versions(&CancellationToken::new()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&versions)?);
            } else {
                for version in versions {
                    println!("{}", version);
                }
            }
        }
        Commands::Install { tag } => {
            let tag = engine.parse_version(&tag)?;
            let key = engine.ensure_installed(&tag, &CancellationToken::new()).await?;
            println!("Installed {}", key);
        }
        Commands::Installed => {
            let installations = engine.installations().await?;
            if installations.is_empty() {
                println!("No toolchains installed.");
            }
            for toolchain in installations {
                println!("{:<32} {:>12}", toolchain.key, toolchain.size_human());
            }
        }
        Commands::Uninstall { key } => {
            let key = InstallKey::from_raw(key);
            engine.uninstall(&key).await?;
            println!("Removed {}", key);
        }
        Commands::Run { file, version } => {
            let source = read_source(&file).await?;
            let exit_code = run_source(engine, source, version).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Cache { action } => match action {
            CacheCommands::Info => cache_info(&engine).await?,
        },
    }

    Ok(())
}

fn init_logging(config: &GopaConfig, level: &str, to_stderr: bool) -> Result<()> {
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);

    if to_stderr {
        env_logger::Builder::new()
            .filter_level(log_level_filter)
            .init();
        return Ok(());
    }

    // Keep stdout clean for program output; the log starts fresh every session.
    let data = config.data_dir();
    data.ensure()?;
    let log_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(data.log_file())
        .with_context(|| format!("Failed to create {}", data.log_file().display()))?;

    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(())
}

async fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        tokio::io::stdin()
            .read_to_string(&mut source)
            .await
            .context("Failed to read source from stdin")?;
        return Ok(source);
    }

    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

/// Install, select and run through the background worker so Ctrl-C can abort
async fn run_source(engine: Arc<Engine>, source: String, version: Option<String>) -> Result<i32> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (action_tx, mut action_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(async move { ActionsService::start(engine, event_tx, &mut action_rx).await });

    action_tx.send(match version {
        Some(tag) => Action::Install { tag, select: true },
        None => Action::Bootstrap,
    })?;

    let mut pending = Some(source);
    let exit_code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, stopping...");
                action_tx.send(Action::Abort)?;
            }
            event = event_rx.recv() => match event {
                Some(Event::Installed { key, .. }) => {
                    log::info!("Running with {}", key);
                    if let Some(source) = pending.take() {
                        action_tx.send(Action::Run(source))?;
                    }
                }
                Some(Event::RunFinished(result)) => {
                    print!("{}", result.output);
                    std::io::stdout().flush()?;
                    break result.exit_code.unwrap_or(1);
                }
                Some(Event::Aborted { action }) => bail!("{} was interrupted", action),
                Some(Event::Failed { action, error }) => {
                    return Err(anyhow::Error::new(error).context(format!("{} failed", action)));
                }
                Some(other) => log::debug!("Ignoring event {:?}", other),
                None => bail!("Worker stopped unexpectedly"),
            }
        }
    };

    drop(action_tx);
    worker.await??;
    Ok(exit_code)
}

async fn cache_info(engine: &Engine) -> Result<()> {
    let data = engine.data_dir();
    println!("Home: {}", data.root().display());
    println!("Platform: {}", engine.platform());

    match engine.read_manifest().await? {
        Some(manifest) => {
            let state = if engine.manifest_expired().await? {
                "expired"
            } else {
                "fresh"
            };
            println!(
                "Catalog: {} releases fetched on {} ({})",
                manifest.versions.len(),
                manifest.fetched_on,
                state
            );
        }
        None => println!("Catalog: not cached"),
    }

    let stats = engine.stats().await?;
    println!(
        "Installations: {} using {}",
        stats.installations,
        stats.total_size_human()
    );
    Ok(())
}
