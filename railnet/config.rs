use std::collections::{BTreeMap, BTreeSet};

use crate::projection::LambertConformalConic;

/// Geographic accept-rectangle in WGS-84 degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Process-wide configuration: tolerances, the projection pair, the accept
/// rectangle, and the operator alias table. Constructed once at stage entry
/// and passed by reference.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Endpoint-to-node snapping tolerance in the projected frame (meters)
    ///
    /// Larger than the junction tolerance on purpose: the source data has
    /// junction endpoints drifted by 100-400m.
    pub snap_tolerance_m: f64,
    /// Distance under which a polyline vertex is considered to sit on a
    /// detected junction (meters)
    pub junction_tolerance_m: f64,
    /// Grid cell size for junction detection, pass 1 (meters)
    pub junction_grid_m: f64,
    /// Great-circle tolerance for stitching merger segments into chains (meters)
    pub merge_tolerance_m: f64,

    /// Snap-quality thresholds (meters)
    pub on_network_m: f64,
    pub near_network_m: f64,
    pub max_snap_m: f64,

    /// Route-quality thresholds (kilometers)
    pub route_warn_km: f64,
    pub route_far_km: f64,

    pub projection: LambertConformalConic,
    pub accept_bounds: GeoBounds,

    /// Railway company codes to human-readable names; unknown codes pass
    /// through unchanged
    pub builder_names: BTreeMap<String, String>,

    /// Merger accept-sets
    pub merge_operators: BTreeSet<String>,
    pub merge_classifications: BTreeSet<String>,

    /// Artifact metadata
    pub description: String,
    pub source: String,
    pub projection_name: String,
    pub units: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let builder_names = [
            ("1", "CPR"),
            ("2", "CNR"),
            ("5", "CNoR"),
            ("49", "GTP"),
            ("49A", "GTP Branch"),
            ("49B", "GTP Sask"),
            ("53R", "CNoR Sask"),
        ]
        .into_iter()
        .map(|(code, name)| (code.to_string(), name.to_string()))
        .collect();

        Self {
            snap_tolerance_m: 500.0,
            junction_tolerance_m: 500.0,
            junction_grid_m: 10.0,
            merge_tolerance_m: 100.0,

            on_network_m: 5_000.0,
            near_network_m: 15_000.0,
            max_snap_m: 50_000.0,

            route_warn_km: 5.0,
            route_far_km: 15.0,

            // The NAD27 Lambert Conformal Conic the source shapefiles ship in
            projection: LambertConformalConic::nad27(49.0, 77.0, 49.0, -95.0),
            // Saskatchewan; the eastern boundary is really -101.36 but -101.0
            // catches border tracks
            accept_bounds: GeoBounds {
                min_lon: -110.0,
                max_lon: -101.0,
                min_lat: 49.0,
                max_lat: 60.0,
            },

            builder_names,

            merge_operators: ["LMR", "GWR"].into_iter().map(String::from).collect(),
            merge_classifications: ["Main", "Siding"].into_iter().map(String::from).collect(),

            description: "Saskatchewan railway network graph".to_string(),
            source: "HR_rails_NEW (Historical Railways of Canada)".to_string(),
            projection_name: "NAD27 Lambert Conformal Conic".to_string(),
            units: "meters".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Map a railway company code through the alias table
    pub fn builder_name(&self, code: &str) -> String {
        self.builder_names
            .get(code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}

/// Operator code given to the artificial edges that attach floating
/// components to the main network
pub const VIRTUAL_BUILDER_CODE: &str = "VIRTUAL";
pub const VIRTUAL_BUILDER_NAME: &str = "Virtual Connection";
