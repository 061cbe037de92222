use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bhl2wd_core::config::{AppConfig, DEFAULT_CONFIG_FILENAME, load_file_config};
use bhl2wd_core::identifier::classify;
use bhl2wd_core::pipeline::{LiveServices, Outcome};
use bhl2wd_core::server::{AppState, serve};
use bhl2wd_core::wikidata::{ExistingItemLookup, SparqlClient};

#[derive(Debug, Parser)]
#[command(
    name = "bhl2wd",
    version,
    about = "Turn Biodiversity Heritage Library titles into Wikidata QuickStatements"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, global = true, help = "Print resolved configuration diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the lookup page and JSON API")]
    Serve(ServeArgs),
    #[command(about = "Generate QuickStatements for one title")]
    Generate(GenerateArgs),
    #[command(about = "Print the BHL title ID extracted from an input string")]
    Normalize(NormalizeArgs),
    #[command(about = "Look for a Wikidata item that already has this BHL title ID")]
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, value_name = "ADDR", help = "Listen address (overrides BHL2WD_ADDR)")]
    addr: Option<String>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    input: String,
    #[arg(long, help = "Also print the QuickStatements import URL")]
    url: bool,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    input: String,
}

#[derive(Debug, Args)]
struct CheckArgs {
    input: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Some(Commands::Serve(args)) => run_serve(&cli, args),
        Some(Commands::Generate(args)) => run_generate(&cli, args),
        Some(Commands::Normalize(NormalizeArgs { input })) => run_normalize(input),
        Some(Commands::Check(CheckArgs { input })) => run_check(&cli, input),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_serve(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let config = resolve_config(cli)?;
    let addr = args.addr.clone().unwrap_or_else(|| config.bind_addr.clone());
    let state = Arc::new(AppState::new(config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(serve(&addr, state))
}

fn run_generate(cli: &Cli, args: &GenerateArgs) -> Result<()> {
    let config = resolve_config(cli)?;
    let services = LiveServices::connect(&config)?;

    match services.pipeline().run(&args.input) {
        Outcome::Generated(generated) => {
            println!("{}", generated.quickstatements());
            if args.url {
                println!();
                println!("{}", generated.quickstatements_url());
            }
            for note in generated.script.diagnostics() {
                eprintln!("note: {note}");
            }
            Ok(())
        }
        Outcome::Rejected(rejection) => bail!("{rejection}"),
    }
}

fn run_normalize(input: &str) -> Result<()> {
    let title_id = classify(input).map_err(|rejection| anyhow::anyhow!("{rejection}"))?;
    println!("{title_id}");
    Ok(())
}

fn run_check(cli: &Cli, input: &str) -> Result<()> {
    let title_id = classify(input).map_err(|rejection| anyhow::anyhow!("{rejection}"))?;
    let config = resolve_config(cli)?;
    let sparql = SparqlClient::new(&config)?;
    match sparql.find_existing(&title_id)? {
        Some(item) => {
            println!("title_id: {title_id}");
            println!("qid: {}", item.qid);
            println!("label: {}", item.label);
            println!("url: {}", item.url());
        }
        None => {
            println!("title_id: {title_id}");
            println!("qid: <none>");
        }
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    if cli.config.is_some() && !config_path.exists() {
        bail!("config file not found: {}", normalize_path(&config_path));
    }
    let file = load_file_config(&config_path)?;
    let config = AppConfig::from_env(&file)?;
    if cli.diagnostics {
        eprintln!(
            "[diagnostics]\nconfig_path={}\n{}",
            normalize_path(&config_path),
            config.diagnostics()
        );
    }
    Ok(config)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
