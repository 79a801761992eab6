//! Plan enforcement checks.
//!
//! Every check returns an [`AccessCheck`] verdict rather than an error, so
//! callers surface denial reasons to the user without exception control
//! flow. Admins bypass everything.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::{BulkLimits, PlanConfig, PlanTier, Tool};
use crate::user::User;

/// Result of a plan enforcement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccessCheck {
    pub allowed: bool,
    /// Human-readable denial reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Videos remaining today, where the check computed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_videos: Option<i64>,
}

impl AccessCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_videos: None,
        }
    }

    pub fn allow_with_remaining(remaining: i64) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_videos: Some(remaining),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            remaining_videos: None,
        }
    }
}

/// Whether a user may use a given tool.
pub fn can_access_tool(user: &User, tool: Tool, now: DateTime<Utc>) -> AccessCheck {
    if user.role.is_admin() {
        return AccessCheck::allow();
    }
    if user.is_plan_expired(now) {
        return AccessCheck::deny("Your plan has expired. Please renew to continue.");
    }
    let config = PlanConfig::for_tier(user.plan_tier);
    if !config.allows_tool(tool) {
        return AccessCheck::deny(format!(
            "The {} tool is not included in the {} plan.",
            tool.as_str(),
            user.plan_tier
        ));
    }
    AccessCheck::allow()
}

/// Whether a user may generate one more video today.
pub fn can_generate_video(user: &User, now: DateTime<Utc>) -> AccessCheck {
    if user.role.is_admin() {
        return AccessCheck::allow();
    }
    if user.is_plan_expired(now) {
        return AccessCheck::deny("Your plan has expired. Please renew to continue.");
    }
    let config = PlanConfig::for_tier(user.plan_tier);
    let remaining = config.daily_limit - i64::from(user.daily_video_count);
    if remaining <= 0 {
        return AccessCheck::deny(format!(
            "Daily limit of {} videos reached.",
            config.daily_limit
        ));
    }
    AccessCheck::allow_with_remaining(remaining)
}

/// Whether a user may submit a bulk batch of `prompt_count` prompts.
///
/// Checks tool access first, then the per-request prompt cap, then the
/// remaining daily quota.
pub fn can_bulk_generate(user: &User, prompt_count: usize, now: DateTime<Utc>) -> AccessCheck {
    if user.role.is_admin() {
        return AccessCheck::allow();
    }
    let tool_check = can_access_tool(user, Tool::Bulk, now);
    if !tool_check.allowed {
        return tool_check;
    }
    let config = PlanConfig::for_tier(user.plan_tier);
    if prompt_count > config.bulk.max_prompts {
        return AccessCheck::deny(format!(
            "The {} plan accepts at most {} prompts per bulk request.",
            user.plan_tier, config.bulk.max_prompts
        ));
    }
    let remaining = config.daily_limit - i64::from(user.daily_video_count);
    if prompt_count as i64 > remaining {
        return AccessCheck::deny(format!(
            "Only {} videos left in today's quota.",
            remaining.max(0)
        ));
    }
    AccessCheck::allow_with_remaining(remaining)
}

/// Bulk pacing configuration for a user. Admins get Empire limits.
pub fn batch_config(user: &User) -> BulkLimits {
    let tier = if user.role.is_admin() {
        PlanTier::Empire
    } else {
        user.plan_tier
    };
    PlanConfig::for_tier(tier).bulk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::UserRole;
    use chrono::Duration;

    fn user(tier: PlanTier, role: UserRole, daily_count: i32) -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            role,
            plan_tier: tier,
            plan_started_at: Some(now),
            plan_expires_at: match tier {
                PlanTier::Free => None,
                _ => Some(now + Duration::days(30)),
            },
            daily_video_count: daily_count,
            last_count_reset: now.date_naive(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_admin_bypasses_everything() {
        let now = Utc::now();
        let mut admin = user(PlanTier::Free, UserRole::Admin, 999_999);
        admin.plan_expires_at = Some(now - Duration::days(1));

        assert!(can_access_tool(&admin, Tool::Script, now).allowed);
        assert!(can_generate_video(&admin, now).allowed);
        assert!(can_bulk_generate(&admin, 100, now).allowed);
        assert_eq!(batch_config(&admin).max_prompts, 100);
    }

    #[test]
    fn test_tool_denied_outside_plan() {
        let now = Utc::now();
        let scale = user(PlanTier::Scale, UserRole::Regular, 0);
        assert!(can_access_tool(&scale, Tool::Bulk, now).allowed);

        let check = can_access_tool(&scale, Tool::ImageToVideo, now);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("scale"));
    }

    #[test]
    fn test_expired_plan_denied() {
        let now = Utc::now();
        let mut scale = user(PlanTier::Scale, UserRole::Regular, 0);
        scale.plan_expires_at = Some(now - Duration::hours(1));

        let check = can_generate_video(&scale, now);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("expired"));
    }

    #[test]
    fn test_daily_quota() {
        let now = Utc::now();
        let fresh = user(PlanTier::Scale, UserRole::Regular, 0);
        let check = can_generate_video(&fresh, now);
        assert!(check.allowed);
        assert_eq!(check.remaining_videos, Some(1000));

        let exhausted = user(PlanTier::Scale, UserRole::Regular, 1000);
        assert!(!can_generate_video(&exhausted, now).allowed);

        // Free tier has no daily quota at all.
        let free = user(PlanTier::Free, UserRole::Regular, 0);
        assert!(!can_generate_video(&free, now).allowed);
    }

    #[test]
    fn test_bulk_prompt_cap_before_quota() {
        let now = Utc::now();
        let scale = user(PlanTier::Scale, UserRole::Regular, 0);

        let over_cap = can_bulk_generate(&scale, 51, now);
        assert!(!over_cap.allowed);
        assert!(over_cap.reason.unwrap().contains("50 prompts"));

        assert!(can_bulk_generate(&scale, 50, now).allowed);
    }

    #[test]
    fn test_bulk_respects_remaining_quota() {
        let now = Utc::now();
        let nearly_done = user(PlanTier::Scale, UserRole::Regular, 990);

        let check = can_bulk_generate(&nearly_done, 20, now);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("10 videos left"));

        let ok = can_bulk_generate(&nearly_done, 10, now);
        assert!(ok.allowed);
        assert_eq!(ok.remaining_videos, Some(10));
    }

    #[test]
    fn test_free_tier_has_no_bulk() {
        let now = Utc::now();
        let free = user(PlanTier::Free, UserRole::Regular, 0);
        let check = can_bulk_generate(&free, 1, now);
        assert!(!check.allowed);
    }
}
