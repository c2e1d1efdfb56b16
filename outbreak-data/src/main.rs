//! outbreak-data - command-line front end for the outbreak.info data layer
//!
//! Runs one assembler and prints its `Fetched` result as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use outbreak_common::config::{CliOverrides, EndpointResolver};
use outbreak_data::genomics::mutations::CHARACTERISTIC_FREQUENCY;
use outbreak_data::genomics::reports::REPORT_LIST_THRESHOLD;
use outbreak_data::resources::DEFAULT_TRIAL_INTERVENTION;
use outbreak_data::similarity::{DEFAULT_NUM_TO_RETURN, SIMILARITY_METRIC};
use outbreak_data::{AdminLevel, FetchStatus, Fetched, Location, LocationType, OutbreakApi};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for outbreak-data
#[derive(Parser, Debug)]
#[command(name = "outbreak-data")]
#[command(about = "Query the outbreak.info epidemiology, genomics and resources APIs")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(long, env = "OUTBREAK_CONFIG")]
    config: Option<PathBuf>,

    /// Epidemiology API base URL
    #[arg(long)]
    epi_url: Option<String>,

    /// Genomics API base URL
    #[arg(long)]
    genomics_url: Option<String>,

    /// Resources API base URL
    #[arg(long)]
    resources_url: Option<String>,

    /// Curated reports JSON file URL
    #[arg(long)]
    curated_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locations epidemiologically similar to one location
    Similar {
        /// Location id, e.g. `USA_US-CA`
        location_id: String,
        /// Extra variable to include in the time series
        #[arg(long, default_value = "")]
        variable: String,
        /// Metric the similarity band is computed on
        #[arg(long, default_value = SIMILARITY_METRIC)]
        metric: String,
        /// Admin level to restrict peers to (repeatable), e.g. `U.S. States`
        #[arg(long = "admin-level")]
        admin_levels: Vec<String>,
        /// Number of peers to return (ties at the boundary are kept)
        #[arg(long, default_value_t = DEFAULT_NUM_TO_RETURN)]
        num: usize,
    },

    /// Lineage or mutation report
    LineageReport {
        #[arg(long)]
        lineage: Option<String>,
        /// Comma-separated mutations, e.g. `s:n501y,s:e484k`
        #[arg(long)]
        mutations: Option<String>,
        /// Focus location
        #[arg(long, default_value = "Worldwide")]
        location: String,
        #[arg(long, value_enum, default_value_t = Granularity::World)]
        location_type: Granularity,
        /// Countries to compare (repeatable)
        #[arg(long = "country")]
        countries: Vec<String>,
    },

    /// Curated report list
    ReportList {
        #[arg(long, default_value_t = REPORT_LIST_THRESHOLD)]
        threshold: f64,
    },

    /// Characteristic mutations of several lineages side by side
    CompareLineages {
        #[arg(required = true)]
        lineages: Vec<String>,
        #[arg(long, default_value_t = CHARACTERISTIC_FREQUENCY)]
        frequency: f64,
    },

    /// Location report: lineage breakdowns plus tracked-lineage maps, table and trends
    LocationReport {
        location: String,
        #[arg(long, value_enum, default_value_t = Granularity::Country)]
        location_type: Granularity,
        #[arg(long, default_value_t = 0.03)]
        other_threshold: f64,
        #[arg(long, default_value_t = 5)]
        nday_threshold: u32,
        #[arg(long, default_value_t = 60)]
        ndays: u32,
    },

    /// Research resource search
    Resources {
        #[arg(long)]
        query: Option<String>,
        /// Filters as `key:v1,v2;key2:v3`
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, default_value_t = 10)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },

    /// Clinical trials mentioning an intervention
    Trials {
        #[arg(default_value = DEFAULT_TRIAL_INTERVENTION)]
        intervention: String,
    },

    /// Wildcard name lookup
    Lookup {
        #[arg(value_enum)]
        kind: LookupKind,
        fragment: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Granularity {
    World,
    Country,
    Division,
}

impl From<Granularity> for LocationType {
    fn from(g: Granularity) -> Self {
        match g {
            Granularity::World => LocationType::World,
            Granularity::Country => LocationType::Country,
            Granularity::Division => LocationType::Division,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LookupKind {
    Country,
    Division,
    Lineage,
}

fn location(name: String, granularity: Granularity) -> Location {
    Location {
        name,
        kind: granularity.into(),
    }
}

/// Print a result; a failed assembler is an error exit
fn emit<T: Serialize>(fetched: &Fetched<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(fetched)?);
    if fetched.status == FetchStatus::Failure {
        match &fetched.error {
            Some(e) => bail!("Query failed: {}", e),
            None => bail!("Query failed"),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LocationPage<A, B, C, D, E> {
    basic: A,
    lineages: B,
    maps: C,
    table: D,
    trends: E,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = CliOverrides {
        config_path: args.config.clone(),
        epi_url: args.epi_url.clone(),
        genomics_url: args.genomics_url.clone(),
        resources_url: args.resources_url.clone(),
        curated_url: args.curated_url.clone(),
        timeout_secs: args.timeout_secs,
        log_level: args.log_level.clone(),
    };
    let config = EndpointResolver::new(overrides).resolve();

    // RUST_LOG wins over the resolved level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting outbreak-data v{} (log level {})",
        env!("CARGO_PKG_VERSION"),
        config.log_level
    );

    let observer = Arc::new(|key: &str, loading: bool| debug!(key, loading, "Loading flag"));
    let api = OutbreakApi::from_config(&config, observer).context("Failed to build HTTP client")?;

    match args.command {
        Command::Similar {
            location_id,
            variable,
            metric,
            admin_levels,
            num,
        } => {
            let levels = admin_levels
                .iter()
                .map(|l| l.parse::<AdminLevel>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let report = api
                .epi
                .find_similar(&location_id, &variable, &metric, &levels, num)
                .await;
            emit(&report)
        }

        Command::LineageReport {
            lineage,
            mutations,
            location: name,
            location_type,
            countries,
        } => {
            let focus = location(name, location_type);
            let locations: Vec<Location> = countries.into_iter().map(Location::country).collect();
            let report = api
                .genomics
                .report_data(&locations, mutations.as_deref(), lineage.as_deref(), &focus)
                .await;
            emit(&report)
        }

        Command::ReportList { threshold } => emit(&api.genomics.report_list(threshold).await),

        Command::CompareLineages { lineages, frequency } => {
            emit(&api.genomics.compare_lineages(&lineages, frequency).await)
        }

        Command::LocationReport {
            location: name,
            location_type,
            other_threshold,
            nday_threshold,
            ndays,
        } => {
            let place = location(name, location_type);
            let genomics = &api.genomics;

            let (basic, lineages) = tokio::join!(
                genomics.basic_location_report(&place),
                genomics.location_report(&place, other_threshold, nday_threshold, ndays),
            );
            let tracked = basic.value.curated.clone();
            let (maps, table, trends) = tokio::join!(
                genomics.location_maps(&place, &tracked, Some(ndays)),
                genomics.location_table(&place, &tracked),
                genomics.all_temporal_prevalences(&place, &tracked),
            );

            let page = LocationPage {
                basic,
                lineages,
                maps,
                table,
                trends,
            };
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }

        Command::Resources {
            query,
            filter,
            sort,
            size,
            page,
        } => {
            let search = api
                .resources
                .resources(query.as_deref(), filter.as_deref(), sort.as_deref(), size, page)
                .await;
            emit(&search)
        }

        Command::Trials { intervention } => emit(&api.resources.ct_summary(&intervention).await),

        Command::Lookup { kind, fragment } => {
            let found = match kind {
                LookupKind::Country => api.genomics.find_country(&fragment).await,
                LookupKind::Division => api.genomics.find_division(&fragment).await,
                LookupKind::Lineage => api.genomics.find_lineage(&fragment).await,
            };
            emit(&Fetched::from_result(found))
        }
    }
}
