//! Subscription entity.

use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use uuid::Uuid;

use super::{version, ValidationError};

/// A standing interest in a spatial region.
///
/// Only the owner sees or mutates a subscription. The time window is
/// optional; a subscription outside its window is inactive and is never
/// reported as an affected subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub owner: String,
    pub url: String,
    pub notification_index: i32,
    pub cells: Vec<CellID>,
    pub begins_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub altitude_lo: f32,
    pub altitude_hi: f32,
}

/// Fields of a subscription a caller wants changed. `None` keeps the stored
/// value; `notification_index` is never patchable.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub url: Option<String>,
    pub cells: Option<Vec<CellID>>,
    pub begins_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub altitude_lo: Option<f32>,
    pub altitude_hi: Option<f32>,
}

impl Subscription {
    /// Opaque version string for optimistic concurrency.
    pub fn version(&self) -> String {
        version::format(self.updated_at).unwrap_or_default()
    }

    /// Overlay the present fields of `patch` onto this subscription.
    ///
    /// The notification index always stays at the stored value; the DSS
    /// reports it and never advances it.
    pub fn apply(&self, patch: &SubscriptionPatch) -> Self {
        Self {
            id: self.id,
            owner: self.owner.clone(),
            url: patch.url.clone().unwrap_or_else(|| self.url.clone()),
            notification_index: self.notification_index,
            cells: patch.cells.clone().unwrap_or_else(|| self.cells.clone()),
            begins_at: patch.begins_at.or(self.begins_at),
            expires_at: patch.expires_at.or(self.expires_at),
            updated_at: self.updated_at,
            altitude_lo: patch.altitude_lo.unwrap_or(self.altitude_lo),
            altitude_hi: patch.altitude_hi.unwrap_or(self.altitude_hi),
        }
    }

    /// Check the entity invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::MissingOwner);
        }
        if self.cells.is_empty() {
            return Err(ValidationError::NoCells);
        }
        if let (Some(begins), Some(expires)) = (self.begins_at, self.expires_at) {
            if begins >= expires {
                return Err(ValidationError::InvertedTimeWindow {
                    starts: begins,
                    ends: expires,
                });
            }
        }
        Ok(())
    }

    /// Whether this subscription is active at `now`.
    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(begins) = self.begins_at {
            if begins > now {
                return false;
            }
        }
        if let Some(expires) = self.expires_at {
            if expires < now {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_subscription() -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            owner: "uss-two".to_string(),
            url: "https://uss.two/notify".to_string(),
            notification_index: 3,
            cells: vec![CellID(42)],
            begins_at: None,
            expires_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            altitude_lo: 0.0,
            altitude_hi: 0.0,
        }
    }

    #[test]
    fn test_apply_preserves_notification_index() {
        let sub = sample_subscription();
        let merged = sub.apply(&SubscriptionPatch {
            url: Some("https://uss.two/v2/notify".to_string()),
            ..Default::default()
        });
        assert_eq!(merged.notification_index, 3);
        assert_eq!(merged.url, "https://uss.two/v2/notify");
    }

    #[test]
    fn test_apply_sets_absent_window() {
        let sub = sample_subscription();
        let begins = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let merged = sub.apply(&SubscriptionPatch {
            begins_at: Some(begins),
            ..Default::default()
        });
        assert_eq!(merged.begins_at, Some(begins));
        assert_eq!(merged.expires_at, None);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut sub = sample_subscription();
        sub.begins_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap());
        sub.expires_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        assert!(matches!(
            sub.validate(),
            Err(ValidationError::InvertedTimeWindow { .. })
        ));
    }

    #[test]
    fn test_half_open_window_is_valid() {
        let mut sub = sample_subscription();
        sub.expires_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_active_at() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let mut sub = sample_subscription();
        assert!(sub.active_at(now));

        sub.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!sub.active_at(now));

        sub.expires_at = None;
        sub.begins_at = Some(now + chrono::Duration::seconds(1));
        assert!(!sub.active_at(now));

        sub.begins_at = Some(now);
        assert!(sub.active_at(now));
    }
}
