use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use zonecast::config::ZonecastConfig;
use zonecast::logging::init_tracing;
use zonecast::pipeline::{LivePipeline, RunOptions, load_catalog, open_rotation_store};
use zonecast::{ForecastFetcher, LocalArchive, NwsClient, Rotation, ZonecastError};

#[derive(Parser)]
#[command(
    name = "zonecast",
    about = "Publish a weather post for the next US zone in the rotation",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: <config dir>/zonecast/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and publish posts for the next zones (default)
    Run {
        /// Write the local archive only, never publish
        #[arg(long)]
        dry_run: bool,

        /// Process this zone once without advancing the rotation
        #[arg(long)]
        zone: Option<String>,

        /// Number of zones to process
        #[arg(long)]
        posts: Option<u32>,
    },

    /// Print the zone the next run will process
    NextZone,

    /// List the zones and their locations
    Zones,

    /// Resolve missing NWS grid references and write the catalog
    FillGrid {
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Rebuild the archive pages and sitemap from the local index
    RebuildArchive,
}

const EXIT_CONFIG: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match ZonecastConfig::load_from_path(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(e) = init_tracing(&config.logging, cli.verbose) {
        eprintln!("warning: {e:#}");
    }

    let command = cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        zone: None,
        posts: None,
    });

    let result = match command {
        Commands::Run {
            dry_run,
            zone,
            posts,
        } => run(&config, RunOptions { dry_run, zone, posts }).await,
        Commands::NextZone => next_zone(&config).await,
        Commands::Zones => list_zones(&config),
        Commands::FillGrid { output } => fill_grid(&config, &output).await,
        Commands::RebuildArchive => rebuild_archive(&config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let fatal = e
                .downcast_ref::<ZonecastError>()
                .is_some_and(ZonecastError::is_fatal);
            match e.downcast_ref::<ZonecastError>() {
                Some(err) => eprintln!("error: {}", err.user_message()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::from(if fatal { EXIT_CONFIG } else { 1 })
        }
    }
}

async fn run(config: &ZonecastConfig, options: RunOptions) -> Result<u8> {
    let pipeline = LivePipeline::from_config(config)?;
    let report = pipeline.run(&options).await;

    for outcome in &report.completed {
        match &outcome.published {
            Some(receipt) => println!("{}: {} ({})", outcome.zone, outcome.post.title, receipt.remote.url),
            None => println!("{}: {} (local only)", outcome.zone, outcome.post.title),
        }
    }
    if let Some(failure) = &report.failure {
        eprintln!("{}: {}", failure.zone, failure.error.user_message());
    }
    Ok(report.exit_code())
}

async fn next_zone(config: &ZonecastConfig) -> Result<u8> {
    let catalog = load_catalog(config)?;
    let rotation = Rotation::new(open_rotation_store(config)?, catalog.rotation_order())?;
    println!("{}", rotation.next_zone().await);
    Ok(0)
}

fn list_zones(config: &ZonecastConfig) -> Result<u8> {
    let catalog = load_catalog(config)?;
    for zone in catalog.zones() {
        println!("{} ({} locations)", zone.name, zone.locations.len());
        for location in &zone.locations {
            let grid = location
                .addressing
                .grid()
                .map_or_else(|| "unresolved".to_string(), |g| g.path());
            println!("  {:<24} {grid}", location.display_name);
        }
    }
    Ok(0)
}

async fn fill_grid(config: &ZonecastConfig, output: &Path) -> Result<u8> {
    let mut catalog = load_catalog(config)?;
    let fetcher = ForecastFetcher::new(NwsClient::new(&config.weather)?, &config.weather);

    let (resolved, failed) = fetcher.fill_grids(catalog.zones_mut()).await;
    catalog
        .save(output)
        .with_context(|| format!("Failed to save catalog to {}", output.display()))?;

    println!("Resolved {resolved} grids ({failed} failed), written to {}", output.display());
    Ok(u8::from(failed > 0))
}

fn rebuild_archive(config: &ZonecastConfig) -> Result<u8> {
    let archive = LocalArchive::new(
        &config.archive.output_dir,
        config.publishing.blog_base_url.clone(),
    );
    let count = archive.regenerate()?;
    println!("Rebuilt archive pages for {count} posts in {}", archive.output_dir().display());
    Ok(0)
}
