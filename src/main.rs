use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lexiquery::{config, server};

/// lexiquery - REST query layer over a lexical translation database
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTTP server host address
    #[arg(long)]
    http_host: Option<String>,

    /// HTTP server port
    #[arg(long)]
    http_port: Option<u16>,

    /// PostgreSQL connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// YAML configuration file; environment variables are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Development mode: indented JSON responses
    #[arg(long)]
    development: bool,

    /// Disable the response cache
    #[arg(long)]
    no_cache: bool,
}

impl From<&Cli> for config::CliConfig {
    fn from(cli: &Cli) -> Self {
        config::CliConfig {
            http_host: cli.http_host.clone(),
            http_port: cli.http_port,
            database_url: cli.database_url.clone(),
            development: cli.development,
            no_cache: cli.no_cache,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<config::ServerConfig> {
    let base = match &cli.config {
        Some(path) => config::ServerConfig::from_yaml_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => config::ServerConfig::from_env().context("reading environment")?,
    };
    Ok(base.merge_cli(cli.into())?)
}

#[tokio::main]
async fn main() {
    // Defaults to INFO level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = dotenvy::dotenv() {
        log::debug!("no .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    println!("\nlexiquery v{}\n", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    server::run_with_config(config).await;
}
