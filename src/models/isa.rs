//! Identification Service Area entity.

use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use uuid::Uuid;

use super::{version, ValidationError};

/// A spatio-temporal volume in which a provider claims jurisdiction.
///
/// `updated_at` is assigned by the store from the transaction timestamp and
/// is the sole source of the version string. Altitude bounds ride the wire
/// and this struct but are not persisted or indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationServiceArea {
    pub id: Uuid,
    pub owner: String,
    pub url: String,
    pub cells: Vec<CellID>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub altitude_lo: f32,
    pub altitude_hi: f32,
}

/// Fields of an ISA a caller wants changed. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct IsaPatch {
    pub url: Option<String>,
    pub cells: Option<Vec<CellID>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub altitude_lo: Option<f32>,
    pub altitude_hi: Option<f32>,
}

impl IdentificationServiceArea {
    /// Opaque version string for optimistic concurrency.
    pub fn version(&self) -> String {
        version::format(self.updated_at).unwrap_or_default()
    }

    /// Overlay the present fields of `patch` onto this ISA.
    ///
    /// Identity and ownership never change; `updated_at` is left for the
    /// store to stamp.
    pub fn apply(&self, patch: &IsaPatch) -> Self {
        Self {
            id: self.id,
            owner: self.owner.clone(),
            url: patch.url.clone().unwrap_or_else(|| self.url.clone()),
            cells: patch.cells.clone().unwrap_or_else(|| self.cells.clone()),
            starts_at: patch.starts_at.unwrap_or(self.starts_at),
            ends_at: patch.ends_at.unwrap_or(self.ends_at),
            updated_at: self.updated_at,
            altitude_lo: patch.altitude_lo.unwrap_or(self.altitude_lo),
            altitude_hi: patch.altitude_hi.unwrap_or(self.altitude_hi),
        }
    }

    /// Check the entity invariants: an owner, a non-empty covering, and a
    /// forward time window.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::MissingOwner);
        }
        if self.cells.is_empty() {
            return Err(ValidationError::NoCells);
        }
        if self.starts_at >= self.ends_at {
            return Err(ValidationError::InvertedTimeWindow {
                starts: self.starts_at,
                ends: self.ends_at,
            });
        }
        Ok(())
    }
}
