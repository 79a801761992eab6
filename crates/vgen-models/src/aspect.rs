//! Output aspect ratios.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Target aspect ratio for a generated video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Landscape,
    Portrait,
}

impl AspectRatio {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "landscape" => Some(AspectRatio::Landscape),
            "portrait" => Some(AspectRatio::Portrait),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "landscape",
            AspectRatio::Portrait => "portrait",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(AspectRatio::parse("landscape"), Some(AspectRatio::Landscape));
        assert_eq!(AspectRatio::parse("Portrait"), Some(AspectRatio::Portrait));
        assert_eq!(AspectRatio::parse("square"), None);
    }
}
