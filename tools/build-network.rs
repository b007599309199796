use std::path::PathBuf;

use clap::Parser;
use railnet::builder::{build_network, network_artifact, tracks_artifact};
use railnet::config::PipelineConfig;
use railnet::io::{TrackRecord, get_input_reader, get_output_writer, read_json_records, write_artifact};

/// Build the railway network graph from polyline track records
///
/// Reads line-delimited JSON polyline records in the projected frame and
/// writes the railway_network and railway_tracks artifacts.
#[derive(Debug, Parser)]
#[clap(name = "build-network", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Polyline records, one JSON object per line. Defaults to stdin.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Output file for the railway_network artifact
    #[clap(short, long)]
    network: PathBuf,

    /// Output file for the railway_tracks artifact
    #[clap(short, long)]
    tracks: PathBuf,

    /// Endpoint-to-node snap tolerance in meters
    #[clap(long, default_value_t = 500.0)]
    snap_tolerance: f64,

    /// Junction detection tolerance in meters
    #[clap(long, default_value_t = 500.0)]
    junction_tolerance: f64,
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

    let config = PipelineConfig {
        snap_tolerance_m: args.snap_tolerance,
        junction_tolerance_m: args.junction_tolerance,
        ..PipelineConfig::default()
    };

    let reader = get_input_reader(&args.input)?;
    let records = read_json_records::<_, TrackRecord>(reader);
    let (graph, stats) = build_network(records, &config);

    let network = network_artifact(&graph, &stats, &config);
    let tracks = tracks_artifact(&graph, &config);

    write_artifact(get_output_writer(&Some(args.network.clone()))?, &network)?;
    write_artifact(get_output_writer(&Some(args.tracks.clone()))?, &tracks)?;

    tracing::info!(
        "Wrote {} nodes and {} edges to {}",
        network.nodes.len(),
        network.edges.len(),
        args.network.display()
    );
    tracing::info!(
        "Wrote {} tracks to {}",
        tracks.track_count,
        args.tracks.display()
    );
    Ok(())
}
