use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tidepool",
    about = "Tidepool — pooled connections and a layered second-level cache",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a tidepool.toml scaffold
    Init {
        /// Directory to write tidepool.toml into
        #[arg(short, long, default_value = ".")]
        path: String,
        /// Data source URL
        #[arg(long)]
        url: String,
        /// Data source username
        #[arg(long, default_value = "app")]
        username: String,
    },
    /// Validate a config file and print the resolved pool and cache settings
    Check {
        /// Path to tidepool.toml
        #[arg(short, long, default_value = "tidepool.toml")]
        config: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Run concurrent workers against a simulated database and print pool statistics.
    ///
    /// Each iteration checks out a connection, looks a row up through the
    /// cache, queries the simulated database on a miss and commits.
    Simulate {
        /// Path to tidepool.toml. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<String>,
        /// Concurrent workers
        #[arg(short, long, default_value_t = 16)]
        workers: usize,
        /// Iterations per worker
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
        /// Distinct rows the workers query
        #[arg(long, default_value_t = 32)]
        rows: u64,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tidepool=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, url, username } => commands::init::init(&path, &url, &username),
        Commands::Check { config, format } => commands::check::check(&config, &format),
        Commands::Simulate { config, workers, iterations, rows, format } => {
            let options = commands::simulate::SimulateOptions { workers, iterations, rows };
            commands::simulate::simulate(config.as_deref(), options, &format)
        }
    }
}
