//! User account model.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// User role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Regular,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Regular => "regular",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// A user account row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, sqlx::FromRow)]
pub struct User {
    /// Opaque user id.
    pub id: String,

    /// Login identity.
    pub email: String,

    /// Role; admins bypass all plan checks.
    pub role: UserRole,

    /// Current plan tier.
    pub plan_tier: PlanTier,

    /// When the current plan was activated.
    pub plan_started_at: Option<DateTime<Utc>>,

    /// When the current plan lapses. Null for free users and admins.
    pub plan_expires_at: Option<DateTime<Utc>>,

    /// Videos generated since the last daily reset.
    pub daily_video_count: i32,

    /// The calendar date the daily counter was last reset to zero.
    pub last_count_reset: NaiveDate,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether a paid plan's expiry date has passed.
    ///
    /// Admins never expire; free accounts have nothing to expire.
    pub fn is_plan_expired(&self, now: DateTime<Utc>) -> bool {
        if self.role.is_admin() || self.plan_tier == PlanTier::Free {
            return false;
        }
        match self.plan_expires_at {
            Some(expiry) => now > expiry,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(tier: PlanTier, role: UserRole, expires_in: Option<i64>) -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            role,
            plan_tier: tier,
            plan_started_at: Some(now),
            plan_expires_at: expires_in.map(|d| now + Duration::days(d)),
            daily_video_count: 0,
            last_count_reset: now.date_naive(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expiry_ignored_for_free_and_admin() {
        let now = Utc::now();
        let free = user(PlanTier::Free, UserRole::Regular, Some(-10));
        assert!(!free.is_plan_expired(now));

        let admin = user(PlanTier::Empire, UserRole::Admin, Some(-10));
        assert!(!admin.is_plan_expired(now));
    }

    #[test]
    fn test_expiry_for_paid_plans() {
        let now = Utc::now();
        let active = user(PlanTier::Scale, UserRole::Regular, Some(10));
        assert!(!active.is_plan_expired(now));

        let lapsed = user(PlanTier::Scale, UserRole::Regular, Some(-1));
        assert!(lapsed.is_plan_expired(now));

        // No expiry recorded means the plan is treated as active.
        let open_ended = user(PlanTier::Empire, UserRole::Regular, None);
        assert!(!open_ended.is_plan_expired(now));
    }
}
