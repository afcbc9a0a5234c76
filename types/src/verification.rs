//! Verification report model.
//!
//! A report is a mapping of check-category to named check values. A check
//! fails only when it is an explicit boolean `false`; numeric and textual
//! entries (sizes, hashes, modes) are informational. Overall success is
//! decided by the critical group alone - failures in other groups are
//! surfaced as warnings by the caller, never as operation failure.

use std::collections::BTreeMap;
use std::fmt;

/// Check group. Ordering matters for stable report rendering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Critical,
    Content,
    Security,
    Quality,
}

impl CheckCategory {
    pub const ALL: [Self; 4] = [Self::Critical, Self::Content, Self::Security, Self::Quality];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Content => "content",
            Self::Security => "security",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Value of a single named check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum CheckValue {
    Bool(bool),
    Count(u64),
    Text(String),
}

impl CheckValue {
    /// Only explicit boolean `false` counts as a failed check.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Bool(false))
    }
}

impl From<bool> for CheckValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for CheckValue {
    fn from(v: u64) -> Self {
        Self::Count(v)
    }
}

impl From<String> for CheckValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for CheckValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Structured, tool-specific verification outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VerificationReport {
    groups: BTreeMap<CheckCategory, BTreeMap<String, CheckValue>>,
}

impl VerificationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        category: CheckCategory,
        name: impl Into<String>,
        value: impl Into<CheckValue>,
    ) {
        self.groups
            .entry(category)
            .or_default()
            .insert(name.into(), value.into());
    }

    #[must_use]
    pub fn group(&self, category: CheckCategory) -> Option<&BTreeMap<String, CheckValue>> {
        self.groups.get(&category)
    }

    #[must_use]
    pub fn get(&self, category: CheckCategory, name: &str) -> Option<&CheckValue> {
        self.groups.get(&category).and_then(|g| g.get(name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Names of failed checks in one category.
    #[must_use]
    pub fn failures_in(&self, category: CheckCategory) -> Vec<&str> {
        self.groups
            .get(&category)
            .map(|g| {
                g.iter()
                    .filter(|(_, v)| v.is_failure())
                    .map(|(k, _)| k.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Overall verdict: no failed check in the critical group.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures_in(CheckCategory::Critical).is_empty()
    }

    /// Non-critical failures rendered as warning strings, prefixed with
    /// their category label so callers can filter user-relevant ones.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for category in [CheckCategory::Content, CheckCategory::Security, CheckCategory::Quality] {
            for name in self.failures_in(category) {
                out.push(format!("{category}: check '{name}' failed"));
            }
        }
        out
    }

    /// Per-category (passed, failed) tallies for review aggregation.
    #[must_use]
    pub fn tally(&self) -> BTreeMap<CheckCategory, (usize, usize)> {
        let mut out = BTreeMap::new();
        for (category, group) in &self.groups {
            let failed = group.values().filter(|v| v.is_failure()).count();
            out.insert(*category, (group.len() - failed, failed));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_passes() {
        assert!(VerificationReport::new().passed());
    }

    #[test]
    fn critical_false_fails_overall() {
        let mut report = VerificationReport::new();
        report.insert(CheckCategory::Critical, "exists", false);
        report.insert(CheckCategory::Content, "size", 5u64);
        assert!(!report.passed());
        assert_eq!(report.failures_in(CheckCategory::Critical), vec!["exists"]);
    }

    #[test]
    fn non_critical_failures_become_warnings_not_failure() {
        let mut report = VerificationReport::new();
        report.insert(CheckCategory::Critical, "exists", true);
        report.insert(CheckCategory::Quality, "lint_passed", false);
        assert!(report.passed());
        assert_eq!(report.warnings(), vec!["quality: check 'lint_passed' failed"]);
    }

    #[test]
    fn informational_values_never_fail() {
        let mut report = VerificationReport::new();
        report.insert(CheckCategory::Content, "size", 0u64);
        report.insert(CheckCategory::Content, "content_hash", "deadbeef");
        assert!(report.passed());
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn tally_counts_passed_and_failed() {
        let mut report = VerificationReport::new();
        report.insert(CheckCategory::Critical, "exists", true);
        report.insert(CheckCategory::Critical, "writable", false);
        let tally = report.tally();
        assert_eq!(tally[&CheckCategory::Critical], (1, 1));
    }

    #[test]
    fn serializes_as_nested_maps() {
        let mut report = VerificationReport::new();
        report.insert(CheckCategory::Critical, "exists", true);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["critical"]["exists"], serde_json::json!(true));
    }
}
