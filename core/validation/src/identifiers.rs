//! Owner, phone and parcel identifier checks.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::DEFAULT_PHONE_PREFIXES;

const PHONE_LENGTH: usize = 10;
const PREFIX_LENGTH: usize = 3;

/// `NN-NN-NN-NNNNNN`, ASCII digits only.
static PARCEL_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2}-[0-9]{2}-[0-9]{2}-[0-9]{6}$").expect("parcel id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnerIdError {
    #[error("Owner ID must not be empty")]
    Empty,

    #[error("Owner ID must contain digits only")]
    NotDigits,

    #[error("Owner ID must be {} digits", join_lengths(.allowed))]
    WrongLength { found: usize, allowed: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("Phone number must be exactly 10 digits")]
    WrongLength,

    #[error("Phone number prefix {prefix} is not a recognised mobile carrier")]
    InvalidPrefix { prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParcelIdError {
    #[error("Parcel ID must have the format NN-NN-NN-NNNNNN")]
    InvalidFormat,
}

fn join_lengths(lengths: &[usize]) -> String {
    lengths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Validate an owner's national identity number against the default lengths.
pub fn validate_owner_id(owner_id: Option<&str>) -> Result<(), OwnerIdError> {
    check_owner_id(owner_id, &[9, 12])
}

/// Validate an optional owner phone number against the default prefix table.
pub fn validate_phone(phone: Option<&str>) -> Result<(), PhoneError> {
    let prefixes: Vec<String> = DEFAULT_PHONE_PREFIXES.iter().map(|p| p.to_string()).collect();
    check_phone(phone, &prefixes)
}

/// Validate an optional parcel identifier.
///
/// `None` is accepted because the identifier is generated downstream.
pub fn validate_parcel_id(parcel_id: Option<&str>) -> Result<(), ParcelIdError> {
    match parcel_id {
        None => Ok(()),
        Some(value) if PARCEL_ID_PATTERN.is_match(value) => Ok(()),
        Some(_) => Err(ParcelIdError::InvalidFormat),
    }
}

pub(crate) fn check_owner_id(owner_id: Option<&str>, allowed: &[usize]) -> Result<(), OwnerIdError> {
    let value = owner_id.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(OwnerIdError::Empty);
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(OwnerIdError::NotDigits);
    }
    if !allowed.contains(&value.len()) {
        return Err(OwnerIdError::WrongLength {
            found: value.len(),
            allowed: allowed.to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn check_phone(phone: Option<&str>, prefixes: &[String]) -> Result<(), PhoneError> {
    let value = phone.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Ok(());
    }
    if value.len() != PHONE_LENGTH || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PhoneError::WrongLength);
    }
    let prefix = &value[..PREFIX_LENGTH];
    if !prefixes.iter().any(|p| p == prefix) {
        return Err(PhoneError::InvalidPrefix {
            prefix: prefix.to_string(),
        });
    }
    Ok(())
}
