use std::path::PathBuf;

use clap::Parser;
use railnet::config::PipelineConfig;
use railnet::io::{
    MergeRecord, RailwayNetwork, RailwayTracks, get_input_reader, get_output_writer,
    read_artifact, read_json_records, write_artifact,
};
use railnet::merge::{accept_record, assemble_chains, merge_into};

/// Merge a secondary polyline dataset into an existing railway network
///
/// Reads line-delimited JSON polyline records in geographic coordinates,
/// stitches them into continuous chains, and integrates the chains into the
/// railway_network and railway_tracks artifacts. Floating subgraphs are
/// attached to the main network with virtual edges.
#[derive(Debug, Parser)]
#[clap(name = "merge-network", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Polyline records, one JSON object per line. Defaults to stdin.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// The railway_network artifact to merge into
    #[clap(short, long)]
    network: PathBuf,

    /// The railway_tracks artifact to merge into
    #[clap(short, long)]
    tracks: PathBuf,

    /// Where to write the merged network. Defaults to overwriting --network.
    #[clap(long)]
    network_out: Option<PathBuf>,

    /// Where to write the merged tracks. Defaults to overwriting --tracks.
    #[clap(long)]
    tracks_out: Option<PathBuf>,

    /// Operators to accept from the incoming dataset
    #[clap(long, value_delimiter = ',', default_value = "LMR,GWR")]
    operators: Vec<String>,

    /// Track classifications to accept from the incoming dataset
    #[clap(long, value_delimiter = ',', default_value = "Main,Siding")]
    classifications: Vec<String>,

    /// Label appended to the artifacts' source metadata
    #[clap(long, default_value = "NRWN")]
    dataset_label: String,
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
        merge_operators: args.operators.iter().cloned().collect(),
        merge_classifications: args.classifications.iter().cloned().collect(),
        ..PipelineConfig::default()
    };

    let reader = get_input_reader(&args.input)?;
    let mut rejected = 0usize;
    let records: Vec<MergeRecord> = read_json_records::<_, MergeRecord>(reader)
        .filter(|record| {
            let accepted = accept_record(record, &config);
            if !accepted {
                rejected += 1;
            }
            accepted
        })
        .collect();
    tracing::info!("Accepted {} records ({} rejected)", records.len(), rejected);
    if records.is_empty() {
        eyre::bail!("No mergeable records in the input");
    }

    let chains = assemble_chains(records, &config);

    let mut network: RailwayNetwork = read_artifact(&args.network)?;
    let mut tracks: RailwayTracks = read_artifact(&args.tracks)?;

    let report = merge_into(&mut network, &mut tracks, &chains, &args.dataset_label, &config)?;
    tracing::info!(
        "Merged {} chains: {} new nodes, {} new edges, {} virtual edges",
        report.chains,
        report.new_nodes,
        report.new_edges,
        report.virtual_edges
    );

    let network_out = args.network_out.unwrap_or(args.network);
    let tracks_out = args.tracks_out.unwrap_or(args.tracks);
    write_artifact(get_output_writer(&Some(network_out.clone()))?, &network)?;
    write_artifact(get_output_writer(&Some(tracks_out))?, &tracks)?;

    tracing::info!(
        "Updated network: {} nodes, {} edges",
        network.stats.node_count,
        network.stats.edge_count
    );
    Ok(())
}
