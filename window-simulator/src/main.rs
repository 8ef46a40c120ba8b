use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use window_simulator::models::{CacheSetup, Pattern, SimulationConfig};
use window_simulator::runner::SimulationRunner;
use window_simulator::stats::SimulationStats;

/// Windowed cache simulator CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a generated scroll trace against every cache configuration
    Simulate {
        /// Rows held by the in-memory source
        #[arg(long, default_value = "10000")]
        rows: usize,

        /// Rows per request
        #[arg(long, default_value = "50")]
        page: usize,

        /// Number of requests in the trace
        #[arg(long, default_value = "2000")]
        requests: usize,

        /// Scroll pattern
        #[arg(long, value_enum, default_value = "jumpy")]
        pattern: Pattern,

        /// Seed for the trace generator
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Export results to CSV file
        #[arg(long, value_name = "PATH")]
        output_csv: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Simulate {
            rows,
            page,
            requests,
            pattern,
            seed,
            output_csv,
        } => {
            if page == 0 {
                return Err("--page must be at least 1".into());
            }
            if rows < page {
                return Err("--rows must be at least --page".into());
            }

            println!("Window Cache Simulation");
            println!("=======================");
            println!("Rows: {rows}, page: {page}, requests: {requests}");
            println!("Pattern: {pattern}, seed: {seed}");

            let config = SimulationConfig {
                rows,
                page,
                requests,
                pattern,
                seed,
                setups: CacheSetup::all(),
            };
            run_simulation(config, output_csv)
        }
    }
}

/// Run the simulation with the given configuration
fn run_simulation(
    config: SimulationConfig,
    output_csv: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = SimulationRunner::new(config);
    let result = runner.run()?;
    let stats = SimulationStats::from_result(&result);
    stats.print_summary();
    println!("\nSimulation completed in {:.2?}", result.duration);

    if let Some(csv_path) = output_csv {
        match stats.export_csv(&csv_path) {
            Ok(()) => println!("\nResults exported to: {}", csv_path.display()),
            Err(e) => eprintln!("Failed to export CSV: {e}"),
        }
    }
    Ok(())
}
