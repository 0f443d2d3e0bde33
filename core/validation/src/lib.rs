//! Admission rules for field surveys.
//!
//! This crate owns the survey data model and the pure checks that decide
//! whether a survey is well-formed enough to enter the sync queue:
//! - Survey completeness (GPS, photos, location name, land use type)
//! - Deployment-region bounding box
//! - Optional boundary polygons
//! - Owner, phone and parcel identifiers
//!
//! All checks are side-effect free and never short-circuit: every failing
//! survey rule is reported, in a fixed order.

pub mod config;
pub mod identifiers;
pub mod rules;
pub mod survey;

pub use config::{BoundingBox, ValidationConfig, DEFAULT_PHONE_PREFIXES};
pub use identifiers::{
    validate_owner_id, validate_parcel_id, validate_phone, OwnerIdError, ParcelIdError, PhoneError,
};
pub use rules::{
    is_valid_region, validate_polygon, validate_survey, PolygonError, SurveyViolation,
    ValidationReport, Validator,
};
pub use survey::{Survey, Vertex};
