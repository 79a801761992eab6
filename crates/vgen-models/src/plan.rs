//! Plan tiers and the per-tier limit tables.
//!
//! ## Tiers
//!
//! - Free: single-video tool only, no daily quota (0 videos/day)
//! - Scale: 1,000 videos/day, bulk generation up to 50 prompts
//! - Empire: 2,000 videos/day, bulk up to 100 prompts plus script and
//!   image tools
//!
//! Admins bypass every check and resolve to Empire limits where a concrete
//! configuration is needed (batch pacing, prompt caps).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Platform tools a plan may grant access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    /// Single text-to-video generation.
    Veo,
    /// Bulk prompt submission.
    Bulk,
    /// Script generation.
    Script,
    /// Text-to-image generation.
    TextToImage,
    /// Image-to-video generation.
    ImageToVideo,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Veo => "veo",
            Tool::Bulk => "bulk",
            Tool::Script => "script",
            Tool::TextToImage => "textToImage",
            Tool::ImageToVideo => "imageToVideo",
        }
    }
}

/// Plan tier enumeration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Scale,
    Empire,
}

impl PlanTier {
    /// Parse from string (case-insensitive, unknown maps to Free).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "scale" => PlanTier::Scale,
            "empire" => PlanTier::Empire,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Scale => "scale",
            PlanTier::Empire => "empire",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bulk generation limits for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BulkLimits {
    /// Submission chunk size (videos started per pacing window).
    pub max_batch: u32,
    /// Seconds to wait between submission batches.
    pub delay_seconds: u64,
    /// Maximum prompts accepted in one bulk request.
    pub max_prompts: usize,
}

/// Full limit configuration for a plan tier.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanConfig {
    /// Plan tier this configuration belongs to.
    pub tier: PlanTier,
    /// Videos per calendar day.
    pub daily_limit: i64,
    /// Tools the tier may use.
    pub allowed_tools: Vec<Tool>,
    /// Bulk generation pacing and caps.
    pub bulk: BulkLimits,
}

impl PlanConfig {
    /// Limit table for a tier.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                tier,
                daily_limit: 0,
                allowed_tools: vec![Tool::Veo],
                bulk: BulkLimits {
                    max_batch: 0,
                    delay_seconds: 0,
                    max_prompts: 0,
                },
            },
            PlanTier::Scale => Self {
                tier,
                daily_limit: 1000,
                allowed_tools: vec![Tool::Veo, Tool::Bulk],
                bulk: BulkLimits {
                    max_batch: 7,
                    delay_seconds: 30,
                    max_prompts: 50,
                },
            },
            PlanTier::Empire => Self {
                tier,
                daily_limit: 2000,
                allowed_tools: vec![
                    Tool::Veo,
                    Tool::Bulk,
                    Tool::Script,
                    Tool::TextToImage,
                    Tool::ImageToVideo,
                ],
                bulk: BulkLimits {
                    max_batch: 10,
                    delay_seconds: 10,
                    max_prompts: 100,
                },
            },
        }
    }

    /// Whether this tier grants a tool.
    pub fn allows_tool(&self, tool: Tool) -> bool {
        self.allowed_tools.contains(&tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!(PlanTier::parse("free"), PlanTier::Free);
        assert_eq!(PlanTier::parse("Scale"), PlanTier::Scale);
        assert_eq!(PlanTier::parse("EMPIRE"), PlanTier::Empire);
        assert_eq!(PlanTier::parse("unknown"), PlanTier::Free);
    }

    #[test]
    fn test_daily_limits() {
        assert_eq!(PlanConfig::for_tier(PlanTier::Free).daily_limit, 0);
        assert_eq!(PlanConfig::for_tier(PlanTier::Scale).daily_limit, 1000);
        assert_eq!(PlanConfig::for_tier(PlanTier::Empire).daily_limit, 2000);
    }

    #[test]
    fn test_allowed_tools() {
        let free = PlanConfig::for_tier(PlanTier::Free);
        assert!(free.allows_tool(Tool::Veo));
        assert!(!free.allows_tool(Tool::Bulk));

        let scale = PlanConfig::for_tier(PlanTier::Scale);
        assert!(scale.allows_tool(Tool::Bulk));
        assert!(!scale.allows_tool(Tool::Script));
        assert!(!scale.allows_tool(Tool::ImageToVideo));

        let empire = PlanConfig::for_tier(PlanTier::Empire);
        for tool in [
            Tool::Veo,
            Tool::Bulk,
            Tool::Script,
            Tool::TextToImage,
            Tool::ImageToVideo,
        ] {
            assert!(empire.allows_tool(tool));
        }
    }

    #[test]
    fn test_bulk_limits_table() {
        let scale = PlanConfig::for_tier(PlanTier::Scale).bulk;
        assert_eq!(scale.max_batch, 7);
        assert_eq!(scale.delay_seconds, 30);
        assert_eq!(scale.max_prompts, 50);

        let empire = PlanConfig::for_tier(PlanTier::Empire).bulk;
        assert_eq!(empire.max_batch, 10);
        assert_eq!(empire.delay_seconds, 10);
        assert_eq!(empire.max_prompts, 100);
    }
}
