//! Plugin version strings and their ordering.
//!
//! Versions compare numerically component by component, left to right.
//! Missing trailing components count as zero, so `2` == `2.0` == `2.0.0`.
//! Each component contributes its leading digits; a component without
//! digits counts as zero (`1.2-beta` orders as `1.2`).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A plugin version as declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginVersion(String);

impl PluginVersion {
    /// Wrap a version string.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into().trim().to_string())
    }

    /// Original version text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric components in declaration order.
    pub fn components(&self) -> Vec<u64> {
        self.0.split('.').map(leading_number).collect()
    }

    /// Whether at least one component carries digits.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .split('.')
                .any(|part| part.chars().next().is_some_and(|c| c.is_ascii_digit()))
    }

    /// Whether this version is at least `minimum`.
    pub fn satisfies(&self, minimum: &PluginVersion) -> bool {
        self >= minimum
    }
}

fn leading_number(part: &str) -> u64 {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Compare two version strings numerically.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left: Vec<u64> = left.trim().split('.').map(leading_number).collect();
    let right: Vec<u64> = right.trim().split('.').map(leading_number).collect();
    let len = left.len().max(right.len());

    for index in 0..len {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PluginVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for PluginVersion {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
