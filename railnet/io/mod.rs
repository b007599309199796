mod artifacts;
mod records;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use artifacts::{
    CountLength, Connection, DistanceSummary, MappingMetadata, MappingStats, NetworkEdge,
    NetworkMetadata, NetworkNode, NetworkStats, RailwayNetwork, RailwayStint, RailwayTracks,
    ReportMetadata, RouteReport, RouteThresholds, SettlementConnections, SettlementInfo,
    SnapThresholds, SettlementMapping, Track, TracksMetadata,
};
pub use records::{
    MergeRecord, Settlement, TrackAttrs, TrackRecord, read_json_records, read_settlements,
};

pub fn get_input_reader(input: &Option<PathBuf>) -> eyre::Result<BufReader<Box<dyn Read>>> {
    match input {
        Some(path) => {
            let file =
                File::open(path).wrap_err_with(|| format!("Failed to open {}", path.display()))?;
            Ok(BufReader::new(Box::new(file)))
        }
        None => Ok(BufReader::new(Box::new(std::io::stdin()))),
    }
}

pub fn get_output_writer(output: &Option<PathBuf>) -> eyre::Result<BufWriter<Box<dyn Write>>> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("Failed to create {}", path.display()))?;
            Ok(BufWriter::new(Box::new(file)))
        }
        None => Ok(BufWriter::new(Box::new(std::io::stdout()))),
    }
}

/// Read a whole persisted artifact from a JSON file
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> eyre::Result<T> {
    let file = File::open(path).wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("Malformed artifact {}", path.display()))
}

/// Write an artifact as pretty-printed JSON (2-space indent, trailing newline)
pub fn write_artifact<T: Serialize, W: Write>(mut writer: W, artifact: &T) -> eyre::Result<()> {
    serde_json::to_writer_pretty(&mut writer, artifact).wrap_err("Failed to serialize artifact")?;
    writeln!(writer)?;
    Ok(())
}

/// Round to 1 decimal, as persisted for meter lengths
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round to 2 decimals, as persisted for kilometer lengths
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 4 decimals, as persisted for edge parameters
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Round to 6 decimals, as persisted for geographic coordinates
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
