//! Version matching for vulnerability feeds
//!
//! Matches fingerprinted product versions against vulnerable version ranges.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Compare two dotted version strings.
///
/// Numeric components compare numerically, alphabetic runs lexically, and a
/// numeric component sorts before an alphabetic one (`1.0` < `1.0a`).
/// Missing trailing components count as zero, so `2.4` == `2.4.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts = parse_version_parts(a);
    let b_parts = parse_version_parts(b);
    let max_len = a_parts.len().max(b_parts.len());

    for i in 0..max_len {
        let a_part = a_parts.get(i).cloned().unwrap_or(VersionPart::Numeric(0));
        let b_part = b_parts.get(i).cloned().unwrap_or(VersionPart::Numeric(0));

        let ord = match (a_part, b_part) {
            (VersionPart::Numeric(x), VersionPart::Numeric(y)) => x.cmp(&y),
            (VersionPart::Alpha(x), VersionPart::Alpha(y)) => x.cmp(&y),
            (VersionPart::Numeric(_), VersionPart::Alpha(_)) => Ordering::Less,
            (VersionPart::Alpha(_), VersionPart::Numeric(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone)]
enum VersionPart {
    Numeric(u64),
    Alpha(String),
}

fn parse_version_parts(version: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();
    let mut num = String::new();
    let mut alpha = String::new();

    let flush_num = |num: &mut String, parts: &mut Vec<VersionPart>| {
        if !num.is_empty() {
            parts.push(VersionPart::Numeric(num.parse().unwrap_or(u64::MAX)));
            num.clear();
        }
    };
    let flush_alpha = |alpha: &mut String, parts: &mut Vec<VersionPart>| {
        if !alpha.is_empty() {
            parts.push(VersionPart::Alpha(alpha.to_ascii_lowercase()));
            alpha.clear();
        }
    };

    for c in version.trim().chars() {
        if c.is_ascii_digit() {
            flush_alpha(&mut alpha, &mut parts);
            num.push(c);
        } else if c.is_ascii_alphabetic() {
            flush_num(&mut num, &mut parts);
            alpha.push(c);
        } else {
            flush_num(&mut num, &mut parts);
            flush_alpha(&mut alpha, &mut parts);
        }
    }
    flush_num(&mut num, &mut parts);
    flush_alpha(&mut alpha, &mut parts);
    parts
}

/// A vulnerable version range. Absent bounds are open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default = "default_true")]
    pub start_inclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default)]
    pub end_inclusive: bool,
}

fn default_true() -> bool {
    true
}

impl VersionRange {
    pub fn new(
        start: Option<&str>,
        start_inclusive: bool,
        end: Option<&str>,
        end_inclusive: bool,
    ) -> Self {
        Self {
            start: start.map(String::from),
            start_inclusive,
            end: end.map(String::from),
            end_inclusive,
        }
    }

    /// `< version`
    pub fn less_than(version: &str) -> Self {
        Self::new(None, false, Some(version), false)
    }

    /// `<= version`
    pub fn less_than_equal(version: &str) -> Self {
        Self::new(None, false, Some(version), true)
    }

    /// `>= start AND < end`
    pub fn between(start: &str, end: &str) -> Self {
        Self::new(Some(start), true, Some(end), false)
    }

    /// Exactly one version
    pub fn exact(version: &str) -> Self {
        Self::new(Some(version), true, Some(version), true)
    }

    pub fn contains(&self, version: &str) -> bool {
        if let Some(start) = &self.start {
            let cmp = compare_versions(version, start);
            if cmp == Ordering::Less || (cmp == Ordering::Equal && !self.start_inclusive) {
                return false;
            }
        }
        if let Some(end) = &self.end {
            let cmp = compare_versions(version, end);
            if cmp == Ordering::Greater || (cmp == Ordering::Equal && !self.end_inclusive) {
                return false;
            }
        }
        true
    }
}

/// Canonical product name used when comparing fingerprints with feed entries
pub fn canonical_product(product: &str) -> String {
    let lower = product.trim().to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "httpd" | "apache httpd" | "apache http server" | "http_server" => "apache",
        "microsoft-iis" | "internet_information_services" => "iis",
        "postgres" => "postgresql",
        "mongod" => "mongodb",
        "openbsd openssh" => "openssh",
        _ => return lower.replace(' ', "_"),
    };
    canonical.to_string()
}
