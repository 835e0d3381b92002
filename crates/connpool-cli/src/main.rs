use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "connpool",
    about = "Connection pool configuration checker and load generator",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pool config file and print the resolved settings
    Check {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "connpool.toml")]
        config: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Hammer one pool from several threads over TCP.
    ///
    /// Each thread repeatedly connects, holds the connection for --hold,
    /// then releases it. Timeouts and factory failures are counted, not fatal.
    Bench {
        #[arg(short, long, default_value = "connpool.toml")]
        config: String,
        /// Concurrent client threads
        #[arg(short, long, default_value_t = 8)]
        threads: usize,
        /// Connect/release cycles per thread
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
        /// How long each checkout is held ("10ms", "1s")
        #[arg(long, default_value = "10ms")]
        hold: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("connpool=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, format } => commands::check::check(&config, &format),
        Commands::Bench {
            config,
            threads,
            iterations,
            hold,
        } => commands::bench::bench(&config, threads, iterations, &hold),
    }
}
