//! Survey, region and polygon rules.

use thiserror::Error;
use tracing::debug;

use crate::config::ValidationConfig;
use crate::identifiers::{self, OwnerIdError, ParcelIdError, PhoneError};
use crate::survey::{Survey, Vertex};

/// A single failed survey completeness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SurveyViolation {
    #[error("GPS location is missing")]
    MissingGps,

    #[error("At least one photo is required")]
    MissingPhotos,

    #[error("Location name must not be empty")]
    EmptyLocationName,

    #[error("Land use type is required")]
    MissingLandUseType,
}

/// Rejected boundary polygon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolygonError {
    #[error("At least {min} points required to form a boundary (got {found})")]
    TooFewPoints { min: usize, found: usize },

    #[error("Too many points: {found} exceeds the limit of {max}")]
    TooManyPoints { max: usize, found: usize },
}

/// Outcome of [`validate_survey`]: every violated rule, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<SurveyViolation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[SurveyViolation] {
        &self.violations
    }

    /// Human-readable messages, one per violation.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    pub fn into_violations(self) -> Vec<SurveyViolation> {
        self.violations
    }
}

/// Validator bound to a particular configuration.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Check survey completeness.
    ///
    /// Rules are evaluated in a fixed order and none of them short-circuits,
    /// so the same survey always yields the same violation sequence.
    pub fn validate_survey(&self, survey: &Survey) -> ValidationReport {
        let has_gps = is_present(survey.latitude) && is_present(survey.longitude);

        let rules = [
            (has_gps, SurveyViolation::MissingGps),
            (!survey.photos.is_empty(), SurveyViolation::MissingPhotos),
            (
                !survey.location_name.trim().is_empty(),
                SurveyViolation::EmptyLocationName,
            ),
            (
                survey.land_use_type.is_some(),
                SurveyViolation::MissingLandUseType,
            ),
        ];

        let violations: Vec<SurveyViolation> = rules
            .into_iter()
            .filter(|(passed, _)| !passed)
            .map(|(_, violation)| violation)
            .collect();

        if !violations.is_empty() {
            debug!("Survey {} violates {} rule(s)", survey.id, violations.len());
        }
        ValidationReport { violations }
    }

    /// Check that a coordinate lies in the deployment region.
    pub fn is_valid_region(&self, lat: f64, lng: f64) -> bool {
        self.config.gps_bounding_box.contains(lat, lng)
    }

    /// Check an optional boundary polygon.
    ///
    /// An empty polygon is accepted. Only the vertex count is checked.
    pub fn validate_polygon(&self, vertices: &[Vertex]) -> Result<(), PolygonError> {
        let found = vertices.len();
        debug!("Checking boundary with {} vertices", found);
        if found == 0 {
            return Ok(());
        }
        if found < self.config.polygon_min_vertices {
            return Err(PolygonError::TooFewPoints {
                min: self.config.polygon_min_vertices,
                found,
            });
        }
        if found > self.config.polygon_max_vertices {
            return Err(PolygonError::TooManyPoints {
                max: self.config.polygon_max_vertices,
                found,
            });
        }
        Ok(())
    }

    pub fn validate_owner_id(&self, owner_id: Option<&str>) -> Result<(), OwnerIdError> {
        identifiers::check_owner_id(owner_id, &self.config.owner_id_lengths)
    }

    pub fn validate_phone(&self, phone: Option<&str>) -> Result<(), PhoneError> {
        identifiers::check_phone(phone, &self.config.phone_prefix_allow_list)
    }

    pub fn validate_parcel_id(&self, parcel_id: Option<&str>) -> Result<(), ParcelIdError> {
        identifiers::validate_parcel_id(parcel_id)
    }
}

/// A coordinate half counts as present when it is set, finite and non-zero.
fn is_present(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v.is_finite() && v != 0.0)
}

/// Check survey completeness with the default configuration.
pub fn validate_survey(survey: &Survey) -> ValidationReport {
    Validator::default().validate_survey(survey)
}

/// Check a coordinate against the default deployment region.
pub fn is_valid_region(lat: f64, lng: f64) -> bool {
    Validator::default().is_valid_region(lat, lng)
}

/// Check a boundary polygon against the default vertex limits.
pub fn validate_polygon(vertices: &[Vertex]) -> Result<(), PolygonError> {
    Validator::default().validate_polygon(vertices)
}
