use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use hilbench::campaign::Category;
use hilbench::config::{CampaignConfig, LogFormat, LoggingConfig};
use hilbench::pacing::PacingConfig;
use hilbench::topology::layout::{analog_topology, string_topology, TypePair};
use hilbench::topology::message::{message_dir, Protocol, MESSAGE_FILE};
use hilbench::topology::{CvtType, RawType};

#[derive(Parser)]
#[command(
    name = "hilbench",
    about = "Hardware-in-the-loop validation campaigns for RTDB test platforms",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $HILBENCH_CONFIG, then /etc/hilbench/hilbench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a validation campaign against the loopback simulator
    Run {
        /// Category to run (default: the configured list)
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Skip all settle delays
        #[arg(long)]
        fast: bool,
    },

    /// Print the points, mapping records and messages of a topology
    Topology {
        #[arg(long, value_enum, default_value = "analog")]
        kind: TopologyKind,

        /// Converted type (analog only)
        #[arg(long, default_value = "int")]
        cvt: CvtType,

        /// Raw type (analog only)
        #[arg(long, default_value = "int")]
        raw: RawType,

        #[arg(long, default_value = "tcp")]
        protocol: Protocol,

        /// Number of point pairs (analog only)
        #[arg(long, default_value = "2")]
        pairs: usize,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    Signal,
    Constants,
    Strings,
    All,
}

impl CategoryArg {
    fn categories(self) -> Vec<Category> {
        match self {
            CategoryArg::Signal => vec![Category::Signal],
            CategoryArg::Constants => vec![Category::Constants],
            CategoryArg::Strings => vec![Category::Strings],
            CategoryArg::All => Category::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    Analog,
    String,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let resolved = CampaignConfig::resolve(cli.config.as_deref())?;
    init_tracing(&resolved.config.logging);
    resolved.log();
    let mut config = resolved.config;

    match cli.command {
        Commands::Run { category, json, fast } => {
            if fast {
                config.pacing = PacingConfig::immediate();
            }
            let categories = match category {
                Some(arg) => arg.categories(),
                None => config.campaign.categories.clone(),
            };

            tracing::info!(?categories, fast, "Starting campaign");
            let report = hilbench::run_simulated(&config, &categories)
                .await
                .context("campaign aborted")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_table());
            }

            if !report.passed() {
                eprintln!("{} validation failure(s)", report.failures());
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Topology {
            kind,
            cvt,
            raw,
            protocol,
            pairs,
        } => {
            let (rtdb, topology) = match kind {
                TopologyKind::Analog => (
                    config.signal.rtdb.as_str(),
                    analog_topology(TypePair::new(cvt, raw), protocol, pairs, config.signal.message_length),
                ),
                TopologyKind::String => (
                    config.strings.rtdb.as_str(),
                    string_topology(&config.strings.shape, protocol),
                ),
            };

            println!("Points ({rtdb})");
            for point in &topology.points {
                let fields: Vec<String> = point
                    .built
                    .attributes
                    .fields()
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!("  {:<12} {}", point.name, fields.join(" "));
            }

            println!("\nMapping records");
            for (name, record) in topology.mappings() {
                let fields: Vec<String> = record.fields().into_iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("  {name}");
                println!("    {}", fields.join(" "));
            }

            println!("\nMessages ({}/{})", message_dir(rtdb), MESSAGE_FILE);
            for line in topology.message_lines() {
                println!("  {line}");
            }
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
