//! Reason reference data and reason sources.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::DomainError;

/// Identifier of a reason (reference data, never created by the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonId(pub u32);

impl fmt::Display for ReasonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A business explanation for a period of machine activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Reason {
    pub id: ReasonId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    /// Display color, `#RRGGBB`
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "#808080".to_string()
}

impl Reason {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: ReasonId(id),
            name: name.into(),
            code: None,
            color: default_color(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Provenance of a reason assignment.
///
/// Ordered by precedence: `Default < Auto < Manual`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReasonSource {
    /// Lowest-precedence fallback
    #[default]
    Default,
    /// Proposed by a rule or heuristic
    Auto,
    /// Entered by an operator; only an explicit manual reset replaces it
    Manual,
}

impl ReasonSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    pub const fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }

    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }

    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for ReasonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasonSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(DomainError::UnknownReasonSource(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_precedence() {
        assert!(ReasonSource::Default < ReasonSource::Auto);
        assert!(ReasonSource::Auto < ReasonSource::Manual);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!("Manual".parse::<ReasonSource>(), Ok(ReasonSource::Manual));
        assert!("processing".parse::<ReasonSource>().is_err());
    }

    #[test]
    fn test_reason_yaml_defaults() {
        let reason: Reason = serde_yaml::from_str("id: 3\nname: Tool change\n").unwrap();
        assert_eq!(reason.id, ReasonId(3));
        assert_eq!(reason.color, "#808080");
        assert!(reason.code.is_none());
    }
}
