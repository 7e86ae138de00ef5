//! antfold CLI
//!
//! Validates an observation's arguments and runs it over a simulated cluster.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod args;
mod metadata;
mod processor;

use antfold_comm::LocalClusterConfig;
use antfold_runtime::{NodeOptions, RunSummary, run_local_cluster};
use args::RunArgs;
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::bail;
use metadata::DirectoryMetadataSource;
use processor::DryRunProcessor;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "antfold")]
#[command(about = "antfold - Distributed downsampling of array observations", long_about = None)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Nodes in the simulated cluster, primary included
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    nodes: u32,

    /// Tiles in the observation
    #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u32).range(1..))]
    tiles: u32,

    /// Tiles flagged as faulty
    #[arg(long, value_delimiter = ',')]
    flagged_tiles: Vec<u32>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Observation {} from {}: {} nodes, sampling frequency {}",
        summary.observation_id,
        summary.signal_start_time,
        summary.node_count,
        summary.new_sampling_freq
    );
    for (node, assignment) in &summary.assignments {
        let reported = summary.results.get(node);
        match assignment {
            Some(range) => println!(
                "  {}: inputs {}..={}, {} of {} succeeded",
                node,
                range.begin,
                range.end,
                reported.map_or(0, |r| r.success_count()),
                reported.map_or(0, |r| r.len()),
            ),
            None => println!("  {}: no work", node),
        }
    }
    for node in &summary.failed_setup {
        println!("  {}: setup failed", node);
    }
    println!(
        "{} of {} antenna inputs processed successfully",
        summary.successful_inputs(),
        summary.antenna_input_count
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("antfold=info")),
        )
        .init();

    let cli = Cli::parse();
    let app = cli.run.to_app_config()?;

    let metadata = DirectoryMetadataSource::new(cli.tiles).with_flagged_tiles(cli.flagged_tiles);
    let processor = DryRunProcessor::new(&app.inv_polyphase_filter_path);
    let summary = run_local_cluster(
        LocalClusterConfig::new(cli.nodes),
        app,
        Arc::new(metadata),
        Arc::new(processor),
        NodeOptions::default(),
    )
    .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.distributed_error {
        bail!("An error was indicated during processing");
    }
    Ok(())
}
