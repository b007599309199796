//! Inbound record streams: line-delimited JSON, one record per line.
//!
//! Malformed lines are skipped with a warning; a bad record never aborts a
//! stage.

use std::io::{BufRead, BufReader, Lines, Read};
use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// A source polyline in the projected frame, with its opaque attribute bag
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackRecord {
    /// (xmin, ymin, xmax, ymax); records without one are degenerate
    pub bbox: Option<[f64; 4]>,
    pub points: Vec<[f64; 2]>,
    pub attrs: TrackAttrs,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackAttrs {
    /// Original length in meters, as recorded by the surveyor
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub built_year: Option<i32>,
    #[serde(default)]
    pub abandoned_year: Option<i32>,
    pub builder_code: String,
}

/// A polyline from a secondary dataset, in geographic coordinates
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MergeRecord {
    pub operator: String,
    #[serde(default)]
    pub subdivision: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    /// [lon, lat] pairs
    pub coordinates: Vec<[f64; 2]>,
}

/// One row of the settlement table; names are the primary key
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settlement {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub first_railway: Option<String>,
    #[serde(default)]
    pub railway_arrives: Option<i32>,
}

/// Read the settlement table: a single JSON array of settlement rows
pub fn read_settlements<R: Read>(reader: R) -> eyre::Result<Vec<Settlement>> {
    use eyre::WrapErr;
    serde_json::from_reader(BufReader::new(reader)).wrap_err("Malformed settlement table")
}

pub struct JsonRecords<R, T>
where
    R: Read,
{
    lines: Lines<BufReader<R>>,
    _record: PhantomData<T>,
}

impl<R, T> Iterator for JsonRecords<R, T>
where
    R: Read,
    T: DeserializeOwned,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(record) => return Some(record),
                        Err(e) => {
                            warn!("Skipping malformed record '{line}': {e}");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to read line: {e:?}");
                    return None;
                }
            }
        }
    }
}

/// Iterate line-delimited JSON records from the given reader
pub fn read_json_records<R, T>(reader: R) -> JsonRecords<R, T>
where
    R: Read,
    T: DeserializeOwned,
{
    JsonRecords {
        lines: BufReader::new(reader).lines(),
        _record: PhantomData,
    }
}
