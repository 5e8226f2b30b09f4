use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{DomainError, ProductId, ReservationId};

/// Lifecycle status of a reservation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Committed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "COMMITTED" => Ok(ReservationStatus::Committed),
            "RELEASED" => Ok(ReservationStatus::Released),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// A time-bounded hold against a product's available stock.
///
/// `status` is the stored status. A stored `Pending` hold whose `expires_at`
/// has passed is *effectively* expired; use [`Reservation::effective_status`]
/// whenever answering a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the reservation left `Pending` (commit, release or materialized expiry).
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Status as observed at `now` (lazy expiry).
    pub fn effective_status(&self, now: DateTime<Utc>) -> ReservationStatus {
        if self.is_lapsed(now) {
            ReservationStatus::Expired
        } else {
            self.status
        }
    }

    /// Stored as pending, but the expiry instant has been reached.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.expires_at
    }

    /// Still counts against available stock at `now`.
    pub fn is_holding(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now < self.expires_at
    }

    /// A copy carrying the effective status at `now`.
    pub fn as_of(&self, now: DateTime<Utc>) -> Reservation {
        let mut view = self.clone();
        if self.is_lapsed(now) {
            view.status = ReservationStatus::Expired;
            view.resolved_at = Some(self.expires_at);
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn pending(expires_in: Duration) -> (Reservation, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let r = Reservation {
            id: ReservationId::new(),
            product_id: ProductId::parse("sku-1").unwrap(),
            quantity: 3,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at: now + expires_in,
            resolved_at: None,
        };
        (r, now)
    }

    #[test]
    fn pending_hold_expires_at_its_deadline() {
        let (r, now) = pending(Duration::minutes(1));
        assert_eq!(r.effective_status(now), ReservationStatus::Pending);
        assert!(r.is_holding(now + Duration::seconds(59)));
        assert_eq!(
            r.effective_status(now + Duration::minutes(1)),
            ReservationStatus::Expired
        );
        assert!(!r.is_holding(now + Duration::minutes(1)));
    }

    #[test]
    fn terminal_statuses_are_not_affected_by_time() {
        let (mut r, now) = pending(Duration::minutes(1));
        r.status = ReservationStatus::Committed;
        assert_eq!(
            r.effective_status(now + Duration::hours(1)),
            ReservationStatus::Committed
        );
        assert!(!r.is_lapsed(now + Duration::hours(1)));
    }

    #[test]
    fn as_of_reports_lapsed_hold_as_expired() {
        let (r, now) = pending(Duration::minutes(1));
        let view = r.as_of(now + Duration::minutes(5));
        assert_eq!(view.status, ReservationStatus::Expired);
        assert_eq!(view.resolved_at, Some(r.expires_at));
    }

    #[test]
    fn status_parses_its_wire_form() {
        for s in [
            ReservationStatus::Pending,
            ReservationStatus::Committed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            assert_eq!(s.as_str().parse::<ReservationStatus>().unwrap(), s);
        }
        assert!("HELD".parse::<ReservationStatus>().is_err());
    }
}
