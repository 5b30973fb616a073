use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cms_delivery::{DeliveryClient, DeliveryConfig, Endpoint, Paginator, Params};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fetch content through the delivery pipeline and print it as JSON
#[derive(Parser)]
#[command(name = "cms-fetch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML); `CMS__*` env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (JSON, token redacted) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Extra query parameter, repeatable (`version=draft`, `cv=123`)
    #[arg(
        short,
        long = "param",
        value_name = "KEY=VALUE",
        value_parser = parse_param,
        global = true
    )]
    params: Vec<(String, String)>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one story by slug (or UUID with --uuid)
    Story {
        identifier: String,
        #[arg(long)]
        uuid: bool,
    },
    /// Fetch one page of stories
    Stories {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 25)]
        per_page: u32,
    },
    /// Fetch the links map, flattened
    Links,
    /// Fetch every item of a collection
    All {
        #[arg(value_enum)]
        collection: Collection,
        #[arg(long, default_value_t = 100)]
        page_size: u32,
        #[arg(long, default_value_t = 1000)]
        max_pages: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Collection {
    Stories,
    Links,
    Tags,
    DatasourceEntries,
}

impl From<Collection> for Endpoint {
    fn from(collection: Collection) -> Self {
        match collection {
            Collection::Stories => Self::Stories,
            Collection::Links => Self::Links,
            Collection::Tags => Self::Tags,
            Collection::DatasourceEntries => Self::DatasourceEntries,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("`{raw}` is not KEY=VALUE"))
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // 1) defaults -> 2) YAML (if provided) -> 3) env (CMS__*)
    let config = DeliveryConfig::load(cli.config.as_deref()).context("loading configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see --help");
    };

    let client = DeliveryClient::new(&config)?;
    let mut params: Params = cli.params.into_iter().collect();

    let output = match command {
        Commands::Story { identifier, uuid } => {
            if uuid {
                params.insert("find_by".to_owned(), "uuid".to_owned());
            }
            client.get_story(&identifier, params).await?
        }
        Commands::Stories { page, per_page } => {
            params.insert("page".to_owned(), page.to_string());
            params.insert("per_page".to_owned(), per_page.to_string());
            let page = client.get_stories(params).await?;
            serde_json::json!({"total": page.total, "stories": page.items})
        }
        Commands::Links => Value::Array(client.get_links(params).await?.items),
        Commands::All {
            collection,
            page_size,
            max_pages,
        } => {
            let paginator = Paginator::new()
                .page_size(page_size)
                .max_pages(max_pages)
                .on_progress(|p| {
                    tracing::info!(
                        page = p.page,
                        fetched = p.fetched,
                        total = ?p.total_hint,
                        "page fetched"
                    );
                });
            let items = client
                .with_paginator(paginator)
                .get_all(&collection.into(), &params)
                .await?;
            Value::Array(items)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
