use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use railnet::config::PipelineConfig;
use railnet::graph::RailwayGraph;
use railnet::io::{
    RailwayNetwork, get_input_reader, get_output_writer, read_artifact, read_settlements,
    write_artifact,
};
use railnet::snap::{mapping_artifact, snap_settlements};

/// Snap settlements to the railway network
///
/// Reads a JSON array of settlements and writes the
/// settlement_network_mapping artifact, associating every settlement with
/// the nearest node or edge of the network.
#[derive(Debug, Parser)]
#[clap(name = "snap-settlements", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// The settlement table, a JSON array. Defaults to stdin.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// The railway_network artifact
    #[clap(short, long)]
    network: PathBuf,

    /// Output file for the mapping artifact. Defaults to stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = CmdlineOptions::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(args.log_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::default();

    let settlements = read_settlements(get_input_reader(&args.input)?)?;
    let mut names = BTreeSet::new();
    for settlement in &settlements {
        if !names.insert(settlement.name.as_str()) {
            eyre::bail!("Duplicate settlement name '{}'", settlement.name);
        }
    }

    let network: RailwayNetwork = read_artifact(&args.network)?;
    let graph = RailwayGraph::from_artifacts(&network, None, &config.projection)?;
    if graph.node_count() == 0 {
        eyre::bail!("The network has no nodes; nothing to snap to");
    }
    tracing::info!(
        "Snapping {} settlements to {} nodes / {} edges",
        settlements.len(),
        graph.node_count(),
        graph.edge_count()
    );

    let records = snap_settlements(&settlements, &graph, &config);
    let mapping = mapping_artifact(records, &config);

    write_artifact(get_output_writer(&args.output)?, &mapping)?;
    tracing::info!("Wrote {} settlement mappings", mapping.mappings.len());
    Ok(())
}
