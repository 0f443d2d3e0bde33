//! Survey data model.

use serde::{Deserialize, Serialize};

use fieldsync_common::{Error, Result, SurveyId};

/// A latitude/longitude pair on a boundary polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub latitude: f64,
    pub longitude: f64,
}

impl Vertex {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single field-collected record of a geolocated observation.
///
/// Surveys are built by the capture flow and are immutable once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    /// Unique identifier, also used as the remote record key.
    pub id: SurveyId,
    /// GPS latitude of the observation.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// GPS longitude of the observation.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Ordered photo references. Opaque to this crate.
    #[serde(default)]
    pub photos: Vec<String>,
    /// Free-text name of the surveyed location.
    #[serde(default)]
    pub location_name: String,
    /// Land use category code.
    #[serde(default)]
    pub land_use_type: Option<String>,
    /// Optional boundary polygon, in drawing order.
    #[serde(default)]
    pub polygon: Vec<Vertex>,
    /// National identity number of the land owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Owner's mobile number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_phone: Option<String>,
    /// Cadastral parcel identifier. Generated downstream when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_id: Option<String>,
}

impl Survey {
    /// Create an empty survey with the given identifier.
    pub fn new(id: SurveyId) -> Self {
        Self {
            id,
            latitude: None,
            longitude: None,
            photos: Vec::new(),
            location_name: String::new(),
            land_use_type: None,
            polygon: Vec::new(),
            owner_id: None,
            owner_phone: None,
            parcel_id: None,
        }
    }

    /// Set the GPS fix.
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Append a photo reference.
    pub fn with_photo(mut self, photo: impl Into<String>) -> Self {
        self.photos.push(photo.into());
        self
    }

    /// Set the location name.
    pub fn with_location_name(mut self, name: impl Into<String>) -> Self {
        self.location_name = name.into();
        self
    }

    /// Set the land use code.
    pub fn with_land_use_type(mut self, code: impl Into<String>) -> Self {
        self.land_use_type = Some(code.into());
        self
    }

    /// Set the boundary polygon.
    pub fn with_polygon(mut self, polygon: Vec<Vertex>) -> Self {
        self.polygon = polygon;
        self
    }

    /// The GPS fix, if both halves are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Serialize to the JSON payload sent to the remote store.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
