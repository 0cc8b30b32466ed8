//! CLI for the librato metrics client.
//!
//! Submits single measurements, aggregates samples read from stdin, and
//! fetches metrics back from the API.

use std::io::BufRead;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use librato::{
    AggregatorOptions, Connection, ConnectionConfig, Protocol, QueueOptions, Sanitizer,
    SubmitOptions, Tags,
};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// librato — Submit and fetch Librato metrics.
#[derive(Parser)]
#[command(name = "librato", version, about)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command.
#[derive(Args)]
struct ConnectionArgs {
    /// Account user; overrides the config file.
    #[arg(long, env = "LIBRATO_USER", global = true)]
    user: Option<String>,

    /// API token; overrides the config file.
    #[arg(long, env = "LIBRATO_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API host, optionally with a port.
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// URL scheme (http or https).
    #[arg(long, global = true)]
    protocol: Option<Protocol>,

    /// Replace characters the API rejects in metric names.
    #[arg(long, global = true)]
    sanitize: bool,

    /// Give up after this many retries of a server error.
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Submit a single measurement.
    Submit {
        /// Metric name.
        name: String,

        /// Measured value.
        value: f64,

        /// Submit as a counter instead of a gauge.
        #[arg(long)]
        counter: bool,

        /// Measurement source.
        #[arg(long)]
        source: Option<String>,

        /// Unix time of the measurement.
        #[arg(long)]
        time: Option<i64>,

        /// Tag as key=value; any tag selects the tagged API.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// Aggregate "name value" lines from stdin and submit the summaries.
    Aggregate {
        /// Floor the measure time to this period in seconds.
        #[arg(long)]
        period: Option<i64>,

        /// Source applied to every summary.
        #[arg(long)]
        source: Option<String>,

        /// Tag as key=value; any tag selects the tagged API.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// Fetch a metric and its recent measurements.
    Get {
        /// Metric name.
        name: String,

        /// Look-back window in seconds.
        #[arg(long, default_value = "3600")]
        duration: u64,

        /// Fetch tagged series instead of legacy measurements.
        #[arg(long)]
        tagged: bool,
    },

    /// List metric definitions.
    List {
        /// Only metrics whose name contains this string.
        #[arg(long)]
        name: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = build_connection(&cli.connection).and_then(|conn| match cli.command {
        Commands::Submit {
            name,
            value,
            counter,
            source,
            time,
            tags,
        } => cmd_submit(&conn, &name, value, counter, source, time, tags),
        Commands::Aggregate {
            period,
            source,
            tags,
        } => cmd_aggregate(&conn, period, source, tags),
        Commands::Get {
            name,
            duration,
            tagged,
        } => cmd_get(&conn, &name, duration, tagged),
        Commands::List { name } => cmd_list(&conn, name),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Builds a connection from the config file and command-line overrides.
fn build_connection(args: &ConnectionArgs) -> CliResult<Connection> {
    let mut config = match &args.config {
        Some(path) => {
            debug!(path = %path.display(), "loading config file");
            let mut config = ConnectionConfig::from_file(path)?;
            if let Some(user) = &args.user {
                config.user.clone_from(user);
            }
            if let Some(token) = &args.token {
                config.token.clone_from(token);
            }
            config
        }
        None => {
            let (Some(user), Some(token)) = (&args.user, &args.token) else {
                return Err("credentials required: set --user and --token, \
                            LIBRATO_USER and LIBRATO_TOKEN, or --config"
                    .into());
            };
            ConnectionConfig::new(user.clone(), token.clone())
        }
    };

    if let Some(hostname) = &args.hostname {
        config = config.with_hostname(hostname.clone());
    }
    if let Some(protocol) = args.protocol {
        config = config.with_protocol(protocol);
    }
    if args.sanitize {
        config = config.with_sanitizer(Sanitizer::metric_name());
    }
    if let Some(max) = args.max_retries {
        config.retry = config.retry.with_max_retries(max);
    }

    Ok(Connection::new(config))
}

/// Implements `librato submit <name> <value>`.
fn cmd_submit(
    conn: &Connection,
    name: &str,
    value: f64,
    counter: bool,
    source: Option<String>,
    time: Option<i64>,
    tags: Vec<(String, String)>,
) -> CliResult {
    let mut options = if counter {
        SubmitOptions::counter()
    } else {
        SubmitOptions::default()
    };
    options.source = source;
    options.time = time;
    if !tags.is_empty() {
        options = options.with_tags(tags.into_iter().collect());
    }

    conn.submit(name, value, options)?;
    println!("submitted {name} = {value}");
    Ok(())
}

/// Implements `librato aggregate`, reading samples from stdin.
fn cmd_aggregate(
    conn: &Connection,
    period: Option<i64>,
    source: Option<String>,
    tags: Vec<(String, String)>,
) -> CliResult {
    let tagged = !tags.is_empty();
    let mut options = AggregatorOptions::default().with_tags(tags.into_iter().collect::<Tags>());
    if let Some(period) = period {
        options = options.with_period(period);
    }
    if let Some(source) = source {
        options = options.with_source(source);
    }
    let mut aggregator = conn.new_aggregator(options);

    let mut samples = 0usize;
    for (lineno, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_sample(line) {
            Some((name, value)) if tagged => aggregator.add_tagged(name, value),
            Some((name, value)) => aggregator.add(name, value),
            None => {
                warn!(line = lineno + 1, "skipping malformed sample");
                continue;
            }
        }
        samples += 1;
    }

    if aggregator.is_empty() {
        println!("no samples read");
        return Ok(());
    }

    let metrics = aggregator.measurements().len() + aggregator.tagged_measurements().len();
    conn.with_queue(QueueOptions::default(), |q| q.add_aggregator(&mut aggregator))?;
    println!("submitted {metrics} metrics from {samples} samples");
    Ok(())
}

/// Implements `librato get <name>`.
fn cmd_get(conn: &Connection, name: &str, duration: u64, tagged: bool) -> CliResult {
    let query = json!({"duration": duration, "resolution": 1});
    let query = query.as_object().cloned().unwrap_or_default();

    let body = if tagged {
        conn.get_tagged(name, &query)?
    } else {
        conn.get(name, &query)?
    };
    println!("{}", serde_json::to_string_pretty(&body.unwrap_or(Value::Null))?);
    Ok(())
}

/// Implements `librato list`.
fn cmd_list(conn: &Connection, name: Option<String>) -> CliResult {
    let mut query = Map::new();
    if let Some(name) = name {
        query.insert("name".to_string(), Value::String(name));
    }

    for metric in conn.list_metrics(&query)? {
        let name = metric.get("name").and_then(Value::as_str).unwrap_or("?");
        let kind = metric.get("type").and_then(Value::as_str).unwrap_or("?");
        println!("{name}\t{kind}");
    }
    Ok(())
}

/// Parses `key=value`.
fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() && !v.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Parses a `name value` sample line.
fn parse_sample(line: &str) -> Option<(&str, f64)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let value = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((name, value))
}
