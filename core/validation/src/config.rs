//! Validation configuration.

use serde::{Deserialize, Serialize};

use fieldsync_common::{Error, Result};

/// Mobile carrier prefixes accepted for owner phone numbers.
pub const DEFAULT_PHONE_PREFIXES: &[&str] = &[
    // Viettel
    "032", "033", "034", "035", "036", "037", "038", "039", "086", "096", "097", "098",
    // Mobifone
    "070", "076", "077", "078", "079", "089", "090", "093",
    // Vinaphone
    "081", "082", "083", "084", "085", "088", "091", "094",
    // Vietnamobile
    "052", "056", "058", "092",
    // Gmobile
    "059", "099",
    // Itelecom
    "087",
];

/// Closed latitude/longitude rectangle of the deployment region.
///
/// All four bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Check whether a coordinate lies inside the box, bounds included.
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: 8.0,
            max_lat: 23.5,
            min_lng: 102.0,
            max_lng: 110.0,
        }
    }
}

/// Tunable limits for every validator in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Region a survey's GPS fix must fall inside.
    pub gps_bounding_box: BoundingBox,
    /// Fewest vertices a non-empty polygon may have.
    pub polygon_min_vertices: usize,
    /// Most vertices a polygon may have.
    pub polygon_max_vertices: usize,
    /// Accepted owner identifier lengths.
    pub owner_id_lengths: Vec<usize>,
    /// Accepted 3-digit phone prefixes.
    pub phone_prefix_allow_list: Vec<String>,
}

impl ValidationConfig {
    /// Reject internally inconsistent limits.
    pub fn validate(&self) -> Result<()> {
        let bbox = &self.gps_bounding_box;
        if !(bbox.min_lat <= bbox.max_lat && bbox.min_lng <= bbox.max_lng) {
            return Err(Error::Config(format!(
                "GPS bounding box is inverted: {:?}",
                bbox
            )));
        }
        if self.polygon_min_vertices > self.polygon_max_vertices {
            return Err(Error::Config(format!(
                "polygon_min_vertices ({}) exceeds polygon_max_vertices ({})",
                self.polygon_min_vertices, self.polygon_max_vertices
            )));
        }
        if self.owner_id_lengths.is_empty() || self.owner_id_lengths.contains(&0) {
            return Err(Error::Config(
                "owner_id_lengths must list at least one non-zero length".to_string(),
            ));
        }
        if let Some(bad) = self
            .phone_prefix_allow_list
            .iter()
            .find(|p| p.len() != 3 || !p.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(Error::Config(format!(
                "phone prefix '{}' must be exactly 3 digits",
                bad
            )));
        }
        Ok(())
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            gps_bounding_box: BoundingBox::default(),
            polygon_min_vertices: 3,
            polygon_max_vertices: 1000,
            owner_id_lengths: vec![9, 12],
            phone_prefix_allow_list: DEFAULT_PHONE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}
