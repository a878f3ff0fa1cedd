use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use route_machine::{
    contract, customize, datastore, extract, partition, Algorithm, ContractorConfig, Coordinate,
    CustomizationConfig, EngineConfig, ExtractorConfig, PartitionConfig, QueryEngine, Response,
    RouteRequest, Status,
};
use tracing_subscriber::EnvFilter;

/// Waypoints of the default query, in Monaco.
const DEFAULT_FROM: (f64, f64) = (7.419758, 43.731142);
const DEFAULT_TO: (f64, f64) = (7.419505, 43.736825);

#[derive(Parser)]
#[command(name = "route-machine")]
#[command(about = "Preprocess road networks and answer route queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a JSON road network into a routable graph
    Extract {
        /// Road network JSON
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        base: Base,

        /// Profile JSON, the built-in car profile if omitted
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Also write the edge to way lookup
        #[arg(long)]
        edge_lookup: bool,

        #[command(flatten)]
        threads: Threads,
    },

    /// Build the contraction hierarchy
    Contract {
        #[command(flatten)]
        base: Base,

        #[command(flatten)]
        threads: Threads,
    },

    /// Partition the graph into nested cells
    Partition {
        #[command(flatten)]
        base: Base,

        /// Maximum cell size per level, finest first
        #[arg(long, value_delimiter = ',')]
        max_cell_sizes: Option<Vec<usize>>,

        #[command(flatten)]
        threads: Threads,
    },

    /// Compute the cell cliques of a partitioned graph
    Customize {
        #[command(flatten)]
        base: Base,

        #[command(flatten)]
        threads: Threads,
    },

    /// Route between coordinates on a preprocessed graph
    Route {
        #[command(flatten)]
        base: Base,

        /// Start as lon,lat
        #[arg(long, value_parser = parse_coordinate)]
        from: Coordinate,

        /// Intermediate stops as lon,lat
        #[arg(long, value_parser = parse_coordinate)]
        via: Vec<Coordinate>,

        /// Destination as lon,lat
        #[arg(long, value_parser = parse_coordinate)]
        to: Coordinate,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Extract and preprocess if needed, then route between two coordinates
    Run {
        /// Road network JSON
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        base: Base,

        /// Profile JSON, the built-in car profile if omitted
        #[arg(short, long)]
        profile: Option<PathBuf>,

        #[arg(long, value_parser = parse_coordinate)]
        from: Option<Coordinate>,

        #[arg(long, value_parser = parse_coordinate)]
        to: Option<Coordinate>,

        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        threads: Threads,
    },
}

#[derive(Args)]
struct Base {
    /// Base path of the preprocessed files
    #[arg(short, long)]
    base: PathBuf,
}

#[derive(Args)]
struct Threads {
    /// Worker threads, 0 for one per core
    #[arg(short, long, default_value = "0")]
    threads: usize,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long, default_value = "ch")]
    algorithm: Algorithm,

    /// Publish the dataset and load it from shared memory
    #[arg(long)]
    shared_memory: bool,

    /// Include the route geometry
    #[arg(long)]
    geometry: bool,

    /// Print the response document as JSON
    #[arg(long)]
    json: bool,

    /// Abort the query after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Snapping radius in meters
    #[arg(long, default_value = "1000")]
    max_snap_distance: f64,
}

fn parse_coordinate(value: &str) -> Result<Coordinate, String> {
    let (lon, lat) = value
        .split_once(',')
        .ok_or_else(|| format!("expected lon,lat, got {value:?}"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f64>()
            .map_err(|err| format!("{part:?}: {err}"))
    };

    Coordinate::new(parse(lon)?, parse(lat)?).map_err(|err| err.to_string())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    match cli.command {
        Command::Extract {
            input,
            base,
            profile,
            edge_lookup,
            threads,
        } => {
            let mut config = ExtractorConfig::new(input, base.base)
                .with_threads(threads.threads)
                .with_edge_lookup(edge_lookup);
            config.profile_path = profile;
            extract(&config).context("extraction failed")?;
        }
        Command::Contract { base, threads } => {
            contract(&ContractorConfig::new(base.base).with_threads(threads.threads))
                .context("contraction failed")?;
        }
        Command::Partition {
            base,
            max_cell_sizes,
            threads,
        } => {
            let mut config = PartitionConfig::new(base.base).with_threads(threads.threads);
            if let Some(sizes) = max_cell_sizes {
                config = config.with_max_cell_sizes(sizes);
            }
            partition(&config).context("partitioning failed")?;
        }
        Command::Customize { base, threads } => {
            customize(&CustomizationConfig::new(base.base).with_threads(threads.threads))
                .context("customization failed")?;
        }
        Command::Route {
            base,
            from,
            via,
            to,
            query,
        } => {
            let mut coordinates = vec![from];
            coordinates.extend(via);
            coordinates.push(to);
            return route(base.base, coordinates, &query);
        }
        Command::Run {
            input,
            base,
            profile,
            from,
            to,
            query,
            threads,
        } => {
            let threads = threads.threads;
            let mut config = ExtractorConfig::new(input, &base.base)
                .with_threads(threads)
                .with_edge_lookup(true);
            config.profile_path = profile;
            extract(&config).context("extraction failed")?;
            prepare(&base.base, query.algorithm, threads)?;

            let from = match from {
                Some(from) => from,
                None => Coordinate::new(DEFAULT_FROM.0, DEFAULT_FROM.1)?,
            };
            let to = match to {
                Some(to) => to,
                None => Coordinate::new(DEFAULT_TO.0, DEFAULT_TO.1)?,
            };
            return route(base.base, vec![from, to], &query);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// `RUST_LOG` directives if they parse, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Runs the preprocessing `algorithm` needs, skipping what already exists.
fn prepare(base: &Path, algorithm: Algorithm, threads: usize) -> Result<()> {
    match algorithm {
        Algorithm::Ch => {
            contract(&ContractorConfig::new(base).with_threads(threads))
                .context("contraction failed")?;
        }
        Algorithm::Mld => {
            partition(&PartitionConfig::new(base).with_threads(threads))
                .context("partitioning failed")?;
            customize(&CustomizationConfig::new(base).with_threads(threads))
                .context("customization failed")?;
        }
    }
    Ok(())
}

fn route(base: PathBuf, coordinates: Vec<Coordinate>, args: &QueryArgs) -> Result<ExitCode> {
    if args.shared_memory {
        datastore::publish(&base).context("failed to publish the dataset")?;
    }

    let config = EngineConfig::new(&base)
        .with_algorithm(args.algorithm)
        .with_shared_memory(args.shared_memory)
        .with_max_snap_distance(args.max_snap_distance);
    let engine = QueryEngine::new(&config)
        .with_context(|| format!("failed to load the dataset at {}", base.display()))?;

    let mut request = RouteRequest::new(coordinates).with_geometry(args.geometry);
    if let Some(timeout) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(timeout));
    }

    let response = engine.respond(&request);

    if args.json {
        println!("{}", response.to_json()?);
        return Ok(exit_code(&response));
    }

    Ok(report(&response))
}

fn exit_code(response: &Response) -> ExitCode {
    match response.status {
        Status::Ok => ExitCode::SUCCESS,
        Status::Error => ExitCode::FAILURE,
    }
}

fn report(response: &Response) -> ExitCode {
    for line in summary(response) {
        println!("{line}");
    }

    exit_code(response)
}

/// The human-readable lines printed for `response`.
fn summary(response: &Response) -> Vec<String> {
    let document = &response.document;
    let mut lines = vec![];

    match response.status {
        Status::Ok => {
            let route = document
                .get_array("routes")
                .and_then(|routes| routes.first())
                .and_then(|route| route.as_object());
            let distance = route.and_then(|r| r.get_number("distance")).unwrap_or(0.0);
            let duration = route.and_then(|r| r.get_number("duration")).unwrap_or(0.0);

            if distance == 0.0 || duration == 0.0 {
                lines.push("Note: distance or duration is zero.".to_string());
                lines.push(
                    "The waypoints snap to the same location or lie outside the extract.\n"
                        .to_string(),
                );
            }

            lines.push(format!("Distance: {distance} meter"));
            lines.push(format!("Duration: {duration} seconds"));
        }
        Status::Error => {
            lines.push(format!(
                "Code: {}",
                document.get_str("code").unwrap_or("Unknown")
            ));
            lines.push(format!(
                "Message: {}",
                document.get_str("message").unwrap_or("")
            ));
        }
    }

    lines
}
