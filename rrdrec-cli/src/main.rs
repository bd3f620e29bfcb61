//! CLI for the rrdrec round-robin recorder.
//!
//! Provides commands for creating, inspecting, updating and reading `.rrd`
//! files, and for printing graph arguments.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rrdrec::config::RecorderConfig;
use rrdrec::store::{Rrd, Store, unix_now};
use rrdrec::{Graph, GraphConfig, Sample, SamplePoint};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// rrdrec: round-robin sensor archives.
#[derive(Parser)]
#[command(name = "rrdrec", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the files of every database in a recorder configuration.
    Create {
        /// Path to the JSON configuration.
        #[arg(long)]
        config: PathBuf,

        /// Unix time the databases start at (defaults to now).
        #[arg(long)]
        start: Option<u64>,
    },

    /// Print file metadata as JSON.
    Info {
        /// Path to the `.rrd` file.
        file: PathBuf,
    },

    /// Apply updates in rrdtool syntax: `<ts>:<v>[:<v>...]`, `N` for now, `U` for unknown.
    Update {
        /// Path to the `.rrd` file.
        file: PathBuf,

        /// One or more updates, oldest first.
        #[arg(required = true)]
        updates: Vec<String>,
    },

    /// Read rows of one data source from one archive.
    Fetch {
        /// Path to the `.rrd` file.
        file: PathBuf,

        /// Data source name.
        ds: String,

        /// Archive index (0 = first configured archive).
        #[arg(long, default_value = "0")]
        tier: usize,

        /// Start of the range, Unix seconds (defaults to one day before end).
        #[arg(long)]
        start: Option<u64>,

        /// End of the range, exclusive, Unix seconds (defaults to now).
        #[arg(long)]
        end: Option<u64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Print rrdgraph arguments for a file.
    Graph {
        /// Path to the `.rrd` file.
        file: PathBuf,

        /// Extra plot argument, repeatable (e.g. `LINE2:Temp#FF0000:Outside`).
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Image width.
        #[arg(long, default_value = "400")]
        width: u32,

        /// Image height.
        #[arg(long, default_value = "120")]
        height: u32,

        /// How far back the graph reaches (e.g. "1d", "1w").
        #[arg(long, default_value = "1d")]
        timerange: String,
    },
}

/// Output format for fetch results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with metadata and rows.
    Json,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create { config, start } => cmd_create(&config, start),
        Commands::Info { file } => cmd_info(&file),
        Commands::Update { file, updates } => cmd_update(&file, &updates),
        Commands::Fetch {
            file,
            ds,
            tier,
            start,
            end,
            format,
        } => cmd_fetch(&file, &ds, tier, start, end, &format),
        Commands::Graph {
            file,
            args,
            width,
            height,
            timerange,
        } => cmd_graph(&file, args, width, height, &timerange),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rrdrec create --config <json>`.
fn cmd_create(config_path: &Path, start: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = RecorderConfig::from_file(config_path)?;
    let store = Store::new(&config.path);
    let start = start.unwrap_or_else(unix_now);

    for db_config in &config.databases {
        let db = db_config.database()?;
        if store.create_at(&db, start)? {
            info!(database = %db.name, path = %store.path_for(&db.name).display(), "created");
        } else {
            // Validates the existing layout against the configuration
            store.open(&db)?;
            info!(database = %db.name, "already exists");
        }
    }

    Ok(())
}

/// Implements `rrdrec info <file>`.
fn cmd_info(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let rrd = Rrd::open_path(file)?;
    println!("{}", serde_json::to_string_pretty(&rrd.info()?)?);
    Ok(())
}

/// Implements `rrdrec update <file> <updates...>`.
fn cmd_update(file: &Path, updates: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut rrd = Rrd::open_path(file)?;
    let names: Vec<String> = rrd
        .database()
        .data_sources
        .iter()
        .map(|ds| ds.name.clone())
        .collect();

    for spec in updates {
        let point = parse_update(spec, &names)?;
        rrd.update(&point)?;
    }
    rrd.sync()?;

    info!(updates = updates.len(), last_update = rrd.last_update(), "applied");
    Ok(())
}

/// Parses `<ts>:<v>[:<v>...]` with one value per data source, in file order.
fn parse_update(spec: &str, names: &[String]) -> Result<SamplePoint, Box<dyn std::error::Error>> {
    let mut fields = spec.split(':');
    let timestamp = match fields.next() {
        Some("N") => unix_now(),
        Some(ts) => ts
            .parse()
            .map_err(|e| format!("invalid timestamp '{ts}' in '{spec}': {e}"))?,
        None => return Err(format!("empty update '{spec}'").into()),
    };

    let values: Vec<&str> = fields.collect();
    if values.len() != names.len() {
        return Err(format!(
            "update '{spec}' has {} values, file has {} data sources",
            values.len(),
            names.len()
        )
        .into());
    }

    let mut point = SamplePoint::new(timestamp);
    for (name, value) in names.iter().zip(values) {
        let sample = if value == "U" {
            Sample::Unknown
        } else {
            let value: f64 = value
                .parse()
                .map_err(|e| format!("invalid value '{value}' for '{name}': {e}"))?;
            Sample::from_f64(value)
        };
        point.insert(name, sample);
    }
    Ok(point)
}

/// Implements `rrdrec fetch <file> <ds>`.
fn cmd_fetch(
    file: &Path,
    ds: &str,
    tier: usize,
    start: Option<u64>,
    end: Option<u64>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let rrd = Rrd::open_path(file)?;
    let end = end.unwrap_or_else(unix_now);
    let start = start.unwrap_or_else(|| end.saturating_sub(86_400));

    let window = rrd.read_window(ds, tier, start, end)?;
    let rows = window.collect_all();

    match format {
        OutputFormat::Csv => {
            println!(
                "# ds={ds}, tier={}, cf={}, resolution={}s, points={}",
                window.tier(),
                window.cf(),
                window.resolution(),
                rows.len()
            );
            if window.may_be_incomplete() {
                println!("# range reaches past retained rows");
            }
            println!("timestamp,value");
            for (ts, sample) in &rows {
                println!("{ts},{sample}");
            }
        }
        OutputFormat::Json => {
            let data: Vec<serde_json::Value> = rows
                .iter()
                .map(|(ts, sample)| {
                    serde_json::json!({
                        "timestamp": ts,
                        "value": sample.value(),
                    })
                })
                .collect();
            let (oldest, newest) = window.available_range();

            let output = serde_json::json!({
                "ds": ds,
                "tier": window.tier(),
                "cf": window.cf(),
                "resolution": window.resolution(),
                "requested": [start, end],
                "available": [oldest, newest],
                "incomplete": window.may_be_incomplete(),
                "count": rows.len(),
                "data": data,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `rrdrec graph <file>`.
fn cmd_graph(
    file: &Path,
    args: Vec<String>,
    width: u32,
    height: u32,
    timerange: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rrd = Rrd::open_path(file)?;
    let info = rrd.info()?;
    let name = file
        .file_stem()
        .map_or_else(|| rrd.database().name.clone(), |stem| stem.to_string_lossy().into_owned());

    let config = GraphConfig {
        name,
        rrd_file: file.display().to_string(),
        width,
        height,
        timerange: timerange.parse()?,
        args,
        options: Vec::new(),
    };
    config.validate()?;

    let graph = Graph::new(config, &info)?;
    for arg in graph.command_args(width, height) {
        println!("{arg}");
    }
    Ok(())
}
